//! OIDC configuration types.

use crate::error::{OidcError, OidcResult};
use crate::types::RequestOrigin;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

pub const DEFAULT_CALLBACK_PATH: &str = "/api/oidc/callback";
pub const DEFAULT_ROLE_CLAIM: &str = "groups";

/// Identity provider settings, as the operator enters them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcProviderConfig {
    /// Issuer URL, e.g. `https://auth.example.com/realms/main`
    pub authority: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    /// Claim holding the user's roles or groups
    pub role_claim: String,
    /// Fixed callback URL. When unset the callback URL is derived from the request origin.
    pub redirect_uri: Option<String>,
    pub callback_path: String,
    /// Where the browser lands after a successful login
    pub post_login_redirect: String,
    pub logout_uri: Option<String>,
    /// Create a local account the first time a user logs in
    pub auto_create_user: bool,
    pub use_pkce: bool,
    /// Merge claims from the userinfo endpoint when the provider has one
    pub load_user_info: bool,
}

impl Default for OidcProviderConfig {
    fn default() -> Self {
        Self {
            authority: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scopes: default_scopes(),
            role_claim: DEFAULT_ROLE_CLAIM.to_string(),
            redirect_uri: None,
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            post_login_redirect: "/".to_string(),
            logout_uri: None,
            auto_create_user: true,
            use_pkce: true,
            load_user_info: true,
        }
    }
}

fn default_scopes() -> Vec<String> {
    ["openid", "profile", "email", "groups"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl OidcProviderConfig {
    pub fn new(
        authority: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            authority: authority.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            ..Self::default()
        }
    }

    /// Trimmed copy, with empty optional values treated as unset.
    pub fn normalized(&self) -> Self {
        let trim_opt = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        let mut scopes: Vec<String> = self
            .scopes
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if scopes.is_empty() {
            scopes = default_scopes();
        }

        let role_claim = match self.role_claim.trim() {
            "" => DEFAULT_ROLE_CLAIM.to_string(),
            claim => claim.to_string(),
        };

        Self {
            authority: self.authority.trim().trim_end_matches('/').to_string(),
            client_id: self.client_id.trim().to_string(),
            client_secret: self.client_secret.trim().to_string(),
            scopes,
            role_claim,
            redirect_uri: trim_opt(&self.redirect_uri),
            callback_path: self.callback_path.trim().to_string(),
            post_login_redirect: self.post_login_redirect.trim().to_string(),
            logout_uri: trim_opt(&self.logout_uri),
            auto_create_user: self.auto_create_user,
            use_pkce: self.use_pkce,
            load_user_info: self.load_user_info,
        }
    }

    /// Checks the settings needed before any request to the provider is made.
    pub fn validate(&self) -> OidcResult<()> {
        if self.authority.trim().is_empty() {
            return Err(OidcError::NotConfigured("authority is empty".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(OidcError::NotConfigured("client id is empty".to_string()));
        }
        if self.client_secret.trim().is_empty() {
            return Err(OidcError::NotConfigured(
                "client secret is empty".to_string(),
            ));
        }

        let authority = Url::parse(self.authority.trim())
            .map_err(|e| OidcError::NotConfigured(format!("authority is not a URL: {}", e)))?;
        if !matches!(authority.scheme(), "http" | "https") {
            return Err(OidcError::NotConfigured(format!(
                "authority must use http or https, got {}",
                authority.scheme()
            )));
        }

        if let Some(redirect_uri) = self.redirect_uri.as_deref().map(str::trim) {
            if !redirect_uri.is_empty() {
                Url::parse(redirect_uri).map_err(|e| {
                    OidcError::NotConfigured(format!("redirect uri is not a URL: {}", e))
                })?;
            }
        }

        Ok(())
    }

    /// The callback URL registered with the provider for a request from `origin`.
    pub fn callback_url(&self, origin: &RequestOrigin) -> String {
        match self.redirect_uri.as_deref().map(str::trim) {
            Some(uri) if !uri.is_empty() => uri.to_string(),
            _ => {
                let path = self.callback_path.trim();
                let path = if path.is_empty() {
                    DEFAULT_CALLBACK_PATH
                } else {
                    path
                };
                if path.starts_with('/') {
                    format!("{}{}", origin, path)
                } else {
                    format!("{}/{}", origin, path)
                }
            }
        }
    }

    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub state_ttl_seconds: u64,
    pub http_timeout_seconds: u64,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: 600, // 10 minutes
            http_timeout_seconds: 30,
        }
    }
}

impl OidcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state_ttl(mut self, seconds: u64) -> Self {
        self.state_ttl_seconds = seconds;
        self
    }

    pub fn with_http_timeout(mut self, seconds: u64) -> Self {
        self.http_timeout_seconds = seconds;
        self
    }

    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http_timeout_seconds)
    }
}

/// Supplies a provider configuration snapshot for each request.
///
/// Implementations must hand out a copy so a login that is in flight keeps the
/// settings it started with.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn snapshot(&self) -> OidcProviderConfig;
}

/// Configuration that never changes.
pub struct StaticConfig(OidcProviderConfig);

impl StaticConfig {
    pub fn new(config: OidcProviderConfig) -> Self {
        Self(config)
    }
}

#[async_trait]
impl ConfigSource for StaticConfig {
    async fn snapshot(&self) -> OidcProviderConfig {
        self.0.clone()
    }
}

/// Configuration that an admin can edit at runtime.
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<OidcProviderConfig>>,
}

impl SharedConfig {
    pub fn new(config: OidcProviderConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Replace the configuration. Applies to requests that start afterwards.
    pub async fn update(&self, config: OidcProviderConfig) {
        let mut current = self.inner.write().await;
        *current = config;
    }
}

#[async_trait]
impl ConfigSource for SharedConfig {
    async fn snapshot(&self) -> OidcProviderConfig {
        self.inner.read().await.clone()
    }
}
