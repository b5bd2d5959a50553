//! Core identity traits and types shared between the login engine and its host.
//!
//! The login engine never owns user records or sessions. It talks to the host
//! through the [`UserStore`] and [`SessionIssuer`] traits defined here, and it
//! exposes itself to the host's authentication registry through
//! [`IdentityProvider`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("User already exists: {0}")]
    UserAlreadyExists(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Unsupported authentication method: {0}")]
    UnsupportedMethod(String),

    #[error("Invalid authentication payload")]
    InvalidPayload,

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// Identity confirmed by a provider, independent of any local account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub provider_id: String,
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// A user account as persisted by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: Uuid,
    /// Unique login key (email, preferred username or subject id).
    pub username: String,
    /// Name of the provider that last authenticated this user.
    pub authentication_provider_id: Option<String>,
    pub is_admin: bool,
    /// Lesser elevation tier; never set together with `is_admin`.
    pub is_elevated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalUser {
    pub fn new(username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            authentication_provider_id: None,
            is_admin: false,
            is_elevated: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite both elevation flags. Admin wins over the lesser tier.
    pub fn set_elevation(&mut self, is_admin: bool, is_elevated: bool) {
        self.is_admin = is_admin;
        self.is_elevated = is_elevated && !is_admin;
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Host user storage used to provision accounts on login.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_key(&self, login_key: &str) -> IdentityResult<Option<LocalUser>>;

    async fn create(&self, login_key: &str) -> IdentityResult<LocalUser>;

    async fn update(&self, user: &LocalUser) -> IdentityResult<()>;
}

/// What the host's session layer hands back once a user is signed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub session_id: String,
    /// Value for a `Set-Cookie` header, if the session layer is cookie based.
    pub set_cookie: Option<String>,
}

/// The host's session layer: "this user is now authenticated".
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    async fn establish(&self, user: &LocalUser) -> IdentityResult<SessionHandle>;
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn verify(&self, auth_payload: serde_json::Value) -> IdentityResult<VerifiedIdentity>;

    async fn change_password(&self, user: &LocalUser, _new_password: &str) -> IdentityResult<()> {
        Err(IdentityError::UnsupportedMethod(format!(
            "password changes are not supported for user {}",
            user.username
        )))
    }

    fn has_password(&self, _user: &LocalUser) -> bool {
        false
    }
}
