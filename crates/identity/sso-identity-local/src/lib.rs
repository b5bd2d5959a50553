//! In-memory user accounts and cookie sessions for hosts without their own.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sso_identity_core::{
    IdentityError, IdentityResult, LocalUser, SessionHandle, SessionIssuer, UserStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Users keyed by login key, compared without regard to case.
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<String, LocalUser>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(login_key: &str) -> String {
        login_key.trim().to_lowercase()
    }

    pub async fn get(&self, login_key: &str) -> Option<LocalUser> {
        self.users.read().await.get(&Self::key(login_key)).cloned()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_key(&self, login_key: &str) -> IdentityResult<Option<LocalUser>> {
        Ok(self.get(login_key).await)
    }

    async fn create(&self, login_key: &str) -> IdentityResult<LocalUser> {
        let key = Self::key(login_key);
        if key.is_empty() {
            return Err(IdentityError::StorageError(
                "login key must not be empty".to_string(),
            ));
        }

        let mut users = self.users.write().await;
        if users.contains_key(&key) {
            return Err(IdentityError::UserAlreadyExists(login_key.to_string()));
        }

        let user = LocalUser::new(login_key.trim());
        users.insert(key, user.clone());
        debug!("Created user {}", user.username);
        Ok(user)
    }

    async fn update(&self, user: &LocalUser) -> IdentityResult<()> {
        let mut users = self.users.write().await;
        match users.get_mut(&Self::key(&user.username)) {
            Some(existing) if existing.id == user.id => {
                *existing = user.clone();
                Ok(())
            }
            _ => Err(IdentityError::UserNotFound(user.username.clone())),
        }
    }
}

/// A session created after a successful login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: Uuid,
    pub username: String,
    pub is_admin: bool,
    pub is_elevated: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct CookieSessionConfig {
    pub cookie_name: String,
    pub secure: bool,
    pub ttl: Duration,
}

impl Default for CookieSessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "sso_session".to_string(),
            secure: true,
            ttl: Duration::hours(12),
        }
    }
}

/// Issues opaque session ids and hands them to the browser as a cookie.
#[derive(Clone)]
pub struct CookieSessionIssuer {
    config: CookieSessionConfig,
    sessions: Arc<DashMap<String, SessionRecord>>,
}

impl CookieSessionIssuer {
    pub fn new(config: CookieSessionConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Live session for the id, if any. Expired sessions are dropped on lookup.
    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        let record = self.sessions.get(session_id)?.clone();
        if record.is_expired() {
            self.sessions.remove(session_id);
            return None;
        }
        Some(record)
    }

    /// Drop expired sessions, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, record| !record.is_expired());
        before.saturating_sub(self.sessions.len())
    }

    /// Run `cleanup_expired` every `interval` until the returned task is aborted.
    pub fn spawn_cleanup(&self, interval: std::time::Duration) -> JoinHandle<()> {
        let issuer = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = issuer.cleanup_expired();
                if removed > 0 {
                    debug!("Evicted {} expired sessions", removed);
                }
            }
        })
    }

    pub fn revoke(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn cookie(&self, session_id: &str) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.config.cookie_name,
            session_id,
            self.config.ttl.num_seconds()
        );
        if self.config.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

impl Default for CookieSessionIssuer {
    fn default() -> Self {
        Self::new(CookieSessionConfig::default())
    }
}

#[async_trait]
impl SessionIssuer for CookieSessionIssuer {
    async fn establish(&self, user: &LocalUser) -> IdentityResult<SessionHandle> {
        let now = Utc::now();
        let session_id = Uuid::new_v4().to_string();

        let record = SessionRecord {
            session_id: session_id.clone(),
            user_id: user.id,
            username: user.username.clone(),
            is_admin: user.is_admin,
            is_elevated: user.is_elevated,
            created_at: now,
            expires_at: now
                .checked_add_signed(self.config.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.sessions.insert(session_id.clone(), record);

        debug!("Established session for {}", user.username);

        Ok(SessionHandle {
            set_cookie: Some(self.cookie(&session_id)),
            session_id,
        })
    }
}
