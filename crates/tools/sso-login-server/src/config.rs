//! Configuration for the login server
//!
//! Values are layered, later sources winning:
//! - Defaults
//! - Configuration file (`config.toml`, or `SSO_CONFIG_FILE`, or `--config`)
//! - Environment variables with the `SSO__` prefix, e.g. `SSO__OIDC__CLIENT_SECRET`
//! - Command line flags

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use sso_identity_oidc::{OidcConfig, OidcProviderConfig};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const REDACTED: &str = "********";

/// Upper bound for state and session lifetimes (one year)
const MAX_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

/// Main configuration struct for the login server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,

    /// Identity provider settings
    pub oidc: OidcProviderConfig,

    /// Pending login state
    pub state: StateConfig,

    /// Outbound calls to the identity provider
    pub http: HttpConfig,

    pub session: SessionConfig,

    pub logging: LoggingConfig,
}

/// Server network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1)
    pub host: IpAddr,

    /// Port to bind to (default: 3000)
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// How long a started login stays valid (default: 600)
    pub ttl_seconds: u64,

    /// How often expired logins are evicted (default: 60)
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Timeout for discovery, token and userinfo calls (default: 30)
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,

    /// Mark the session cookie `Secure` (default: true)
    pub secure_cookie: bool,

    /// Session lifetime in seconds (default: 43200 = 12 hours)
    pub ttl_seconds: i64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,

    /// Log format (pretty, json, compact)
    pub format: String,

    /// Whether to include the target module
    pub target: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3000,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 600,
            cleanup_interval_seconds: 60,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "sso_session".to_string(),
            secure_cookie: true,
            ttl_seconds: 43200,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            target: true,
        }
    }
}

impl Config {
    /// Load configuration from an optional file and the environment.
    ///
    /// Without an explicit path, `SSO_CONFIG_FILE` or `config.toml` is used when it exists.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        match config_file {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                let config_path = std::env::var("SSO_CONFIG_FILE")
                    .unwrap_or_else(|_| "config.toml".to_string());

                if Path::new(&config_path).exists() {
                    info!("Loading configuration from {}", config_path);
                    builder = builder.add_source(File::with_name(&config_path));
                } else {
                    debug!("No config file found at {}, using defaults", config_path);
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SSO")
                .prefix_separator("__")
                .separator("__") // e.g. SSO__SERVER__PORT
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut settings: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        settings.apply_env_overrides();
        settings.validate()?;

        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            info!("Using RUST_LOG environment variable");
            self.logging.level = log_level;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.state.ttl_seconds == 0 {
            anyhow::bail!("State TTL must be greater than 0");
        }

        if self.state.ttl_seconds > MAX_TTL_SECONDS as u64 {
            anyhow::bail!("State TTL cannot exceed {} seconds", MAX_TTL_SECONDS);
        }

        if self.state.cleanup_interval_seconds == 0 {
            anyhow::bail!("State cleanup interval must be greater than 0");
        }

        if self.http.timeout_seconds == 0 {
            anyhow::bail!("HTTP timeout must be greater than 0");
        }

        if self.session.cookie_name.trim().is_empty() {
            anyhow::bail!("Session cookie name cannot be empty");
        }

        if self.session.ttl_seconds <= 0 {
            anyhow::bail!("Session TTL must be positive");
        }

        if self.session.ttl_seconds > MAX_TTL_SECONDS {
            anyhow::bail!("Session TTL cannot exceed {} seconds", MAX_TTL_SECONDS);
        }

        if self.mount_path().is_none() {
            anyhow::bail!(
                "OIDC callback path '{}' must start with '/' and end with '/callback'",
                self.oidc.callback_path
            );
        }

        // Full filter directives such as "info,hyper=warn" are passed through
        let level = self.logging.level.to_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !level.contains('=')
            && !level.contains(',')
            && !valid_levels.contains(&level.as_str())
        {
            anyhow::bail!(
                "Invalid log level '{}'. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        let valid_formats = ["pretty", "json", "compact"];
        let format_lower = self.logging.format.to_lowercase();
        if !valid_formats.contains(&format_lower.as_str()) {
            anyhow::bail!(
                "Invalid log format '{}'. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            );
        }

        Ok(())
    }

    /// Get the socket address for the server
    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from((self.server.host, self.server.port))
    }

    /// Path the login router is nested under, derived from the callback path.
    pub fn mount_path(&self) -> Option<String> {
        let path = self.oidc.callback_path.trim();
        if !path.starts_with('/') {
            return None;
        }
        path.strip_suffix("/callback").map(String::from)
    }

    pub fn engine(&self) -> OidcConfig {
        OidcConfig::new()
            .with_state_ttl(self.state.ttl_seconds)
            .with_http_timeout(self.http.timeout_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.state.cleanup_interval_seconds)
    }

    /// Get the log filter string for tracing
    pub fn log_filter(&self) -> String {
        if self.logging.level.contains('=') || self.logging.level.contains(',') {
            self.logging.level.clone()
        } else {
            format!(
                "sso_login_server={level},sso_identity_oidc={level},tower_http={level},{level}",
                level = self.logging.level
            )
        }
    }

    /// Copy safe to print, with the client secret masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.oidc.client_secret.is_empty() {
            copy.oidc.client_secret = REDACTED.to_string();
        }
        copy
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:3000");
        assert_eq!(config.mount_path().as_deref(), Some("/api/oidc"));
    }

    #[test]
    fn test_invalid_config() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        config.server.port = 3000;
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "info,hyper=warn".to_string();
        assert!(config.validate().is_ok());

        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());

        config.logging.format = "JSON".to_string();
        config.oidc.callback_path = "/api/oidc/return".to_string();
        assert!(config.validate().is_err());

        config.oidc.callback_path = "/callback".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.mount_path().as_deref(), Some(""));
    }

    #[test]
    fn test_ttl_upper_bounds() {
        let mut config = Config::default();
        config.state.ttl_seconds = MAX_TTL_SECONDS as u64;
        config.session.ttl_seconds = MAX_TTL_SECONDS;
        assert!(config.validate().is_ok());

        config.state.ttl_seconds = 10_000_000_000_000;
        assert!(config.validate().is_err());

        config.state.ttl_seconds = 600;
        config.session.ttl_seconds = i64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redacted_hides_secret() {
        let mut config = Config::default();
        config.oidc.client_secret = "top-secret".to_string();

        let rendered = config.redacted().to_toml().unwrap();
        assert!(!rendered.contains("top-secret"));
        assert!(rendered.contains(REDACTED));
        assert_eq!(config.oidc.client_secret, "top-secret");
    }

    #[test]
    fn test_log_filter() {
        let mut config = Config::default();
        assert!(config.log_filter().starts_with("sso_login_server=info"));

        config.logging.level = "warn,sso_identity_oidc=debug".to_string();
        assert_eq!(config.log_filter(), "warn,sso_identity_oidc=debug");
    }
}
