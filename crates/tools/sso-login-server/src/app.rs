//! Wires the login engine, the local collaborators and the HTTP routes together.

use crate::config::Config;
use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use serde_json::json;
use sso_identity_local::{CookieSessionConfig, CookieSessionIssuer, InMemoryUserStore};
use sso_identity_oidc::{
    HttpOidcClient, InMemoryStateStore, OidcLoginService, StaticConfig, oidc_router,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared state for the session routes
#[derive(Clone)]
struct SessionState {
    service: OidcLoginService,
    sessions: CookieSessionIssuer,
    cookie_name: String,
}

/// Everything the server needs to keep alive while it runs.
pub struct App {
    pub router: Router,
    pub service: OidcLoginService,
    pub states: Arc<InMemoryStateStore>,
    pub users: InMemoryUserStore,
    pub sessions: CookieSessionIssuer,
    pub cleanup: JoinHandle<()>,
    pub session_cleanup: JoinHandle<()>,
}

impl App {
    /// Build the application. Must be called from within a tokio runtime.
    pub fn build(config: &Config) -> Result<Self> {
        if let Err(e) = config.oidc.normalized().validate() {
            warn!("{}; logins will fail until this is fixed", e);
        }

        let engine = config.engine();
        let client = HttpOidcClient::new(engine.http_timeout())
            .context("Failed to create OIDC HTTP client")?;

        let users = InMemoryUserStore::new();
        let sessions = CookieSessionIssuer::new(CookieSessionConfig {
            cookie_name: config.session.cookie_name.clone(),
            secure: config.session.secure_cookie,
            ttl: chrono::Duration::try_seconds(config.session.ttl_seconds)
                .context("Session TTL is out of range")?,
        });

        let states = Arc::new(InMemoryStateStore::new(engine.state_ttl_seconds));
        let cleanup = states.clone().spawn_cleanup(config.cleanup_interval());
        let session_cleanup = sessions.spawn_cleanup(config.cleanup_interval());

        let service = OidcLoginService::new(
            Arc::new(StaticConfig::new(config.oidc.clone())),
            &engine,
            Arc::new(client),
            states.clone(),
            Arc::new(users.clone()),
            Arc::new(sessions.clone()),
        );

        let mount_path = config
            .mount_path()
            .context("OIDC callback path must end with /callback")?;
        let login_routes = oidc_router(service.clone());
        let login_routes = if mount_path.is_empty() {
            login_routes
        } else {
            Router::new().nest(&mount_path, login_routes)
        };

        let session_routes = Router::new()
            .route("/api/session", get(current_session))
            .route("/logout", get(logout))
            .with_state(SessionState {
                service: service.clone(),
                sessions: sessions.clone(),
                cookie_name: config.session.cookie_name.clone(),
            });

        let router = Router::new()
            .route("/health", get(|| async { "OK" }))
            .merge(login_routes)
            .merge(session_routes)
            .layer(TraceLayer::new_for_http());

        info!("Login routes mounted at '{}'", mount_path);

        Ok(Self {
            router,
            service,
            states,
            users,
            sessions,
            cleanup,
            session_cleanup,
        })
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.cleanup.abort();
        self.session_cleanup.abort();
    }
}

fn session_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

async fn current_session(State(state): State<SessionState>, headers: HeaderMap) -> Response {
    let record = session_cookie(&headers, &state.cookie_name).and_then(|id| state.sessions.get(id));

    match record {
        Some(record) => Json(json!({
            "username": record.username,
            "user_id": record.user_id,
            "is_admin": record.is_admin,
            "is_elevated": record.is_elevated,
            "expires_at": record.expires_at,
        }))
        .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthenticated", "message": "No active session" })),
        )
            .into_response(),
    }
}

async fn logout(State(state): State<SessionState>, headers: HeaderMap) -> Response {
    if let Some(id) = session_cookie(&headers, &state.cookie_name) {
        if state.sessions.revoke(id) {
            info!("Session revoked");
        }
    }

    let target = state
        .service
        .logout_uri()
        .await
        .unwrap_or_else(|| "/".to_string());
    let expired = format!("{}=; Path=/; HttpOnly; Max-Age=0", state.cookie_name);

    ([(header::SET_COOKIE, expired)], Redirect::to(&target)).into_response()
}
