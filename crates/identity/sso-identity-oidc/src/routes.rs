//! HTTP surface of the login flow.

use crate::error::OidcError;
use crate::service::OidcLoginService;
use crate::types::RequestOrigin;
use axum::{
    Json, Router,
    extract::{RawQuery, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tracing::warn;

const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// `GET /begin`, `GET /callback` and `POST /callback` (for `form_post`).
pub fn oidc_router(service: OidcLoginService) -> Router {
    Router::new()
        .route("/begin", get(begin_login))
        .route("/callback", get(callback_query).post(callback_form))
        .with_state(service)
}

impl OidcError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            OidcError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            OidcError::ProviderUnreachable(_) => StatusCode::BAD_GATEWAY,
            OidcError::MissingState
            | OidcError::InvalidOrExpiredState
            | OidcError::StateNotFound => StatusCode::BAD_REQUEST,
            OidcError::ProviderRejected { .. } | OidcError::NoIdentityClaim => {
                StatusCode::UNAUTHORIZED
            }
            OidcError::UserNotProvisioned(_) => StatusCode::FORBIDDEN,
            OidcError::DuplicateState | OidcError::Provisioning(_) | OidcError::Session(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for OidcError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.error_code(),
            "message": self.public_message(),
        }));
        (self.status_code(), body).into_response()
    }
}

fn bad_request(message: &str) -> Response {
    let body = Json(json!({ "error": "bad_request", "message": message }));
    (StatusCode::BAD_REQUEST, body).into_response()
}

/// Origin as seen by the browser, honoring a reverse proxy's `X-Forwarded-Proto`.
fn request_origin(headers: &HeaderMap) -> Option<RequestOrigin> {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())?;

    let scheme = headers
        .get(FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("http");

    Some(RequestOrigin::new(scheme, host))
}

fn found(location: &str, set_cookie: Option<&str>) -> Response {
    let Ok(location) = HeaderValue::from_str(location) else {
        warn!("Redirect location is not a valid header value: {}", location);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let mut response = StatusCode::FOUND.into_response();
    response.headers_mut().insert(header::LOCATION, location);

    if let Some(cookie) = set_cookie {
        match HeaderValue::from_str(cookie) {
            Ok(cookie) => {
                response.headers_mut().insert(header::SET_COOKIE, cookie);
            }
            Err(_) => {
                warn!("Session cookie is not a valid header value");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    response
}

async fn begin_login(State(service): State<OidcLoginService>, headers: HeaderMap) -> Response {
    let Some(origin) = request_origin(&headers) else {
        return bad_request("Host header is required");
    };

    match service.begin_login(&origin).await {
        Ok(target) => found(&target.url, None),
        Err(e) => {
            warn!("OIDC login could not be started: {}", e);
            e.into_response()
        }
    }
}

async fn finish_login(service: &OidcLoginService, raw: &str, headers: &HeaderMap) -> Response {
    let Some(origin) = request_origin(headers) else {
        return bad_request("Host header is required");
    };

    match service.handle_callback(raw, &origin).await {
        Ok(login) => found(&login.redirect_to, login.session.set_cookie.as_deref()),
        Err(e) => {
            warn!("OIDC callback failed: {}", e);
            e.into_response()
        }
    }
}

async fn callback_query(
    State(service): State<OidcLoginService>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    finish_login(&service, query.as_deref().unwrap_or_default(), &headers).await
}

async fn callback_form(
    State(service): State<OidcLoginService>,
    headers: HeaderMap,
    body: String,
) -> Response {
    finish_login(&service, &body, &headers).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            OidcError::NotConfigured("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            OidcError::ProviderUnreachable("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            OidcError::InvalidOrExpiredState.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(OidcError::NoIdentityClaim.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            OidcError::UserNotProvisioned("a".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            OidcError::DuplicateState.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_request_origin_from_headers() {
        let mut headers = HeaderMap::new();
        assert!(request_origin(&headers).is_none());

        headers.insert(header::HOST, HeaderValue::from_static("media.example.com:8096"));
        assert_eq!(
            request_origin(&headers).unwrap().to_string(),
            "http://media.example.com:8096"
        );

        headers.insert(FORWARDED_PROTO, HeaderValue::from_static("HTTPS, http"));
        assert_eq!(
            request_origin(&headers).unwrap().to_string(),
            "https://media.example.com:8096"
        );
    }

    #[test]
    fn test_found_sets_location_and_cookie() {
        let response = found("/home", Some("sso_session=abc; Path=/; HttpOnly"));
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/home");
        assert_eq!(
            response.headers()[header::SET_COOKIE],
            "sso_session=abc; Path=/; HttpOnly"
        );
    }
}
