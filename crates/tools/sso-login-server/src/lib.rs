//! Standalone login server built on `sso-identity-oidc`.
//!
//! Serves `/api/oidc/begin` and `/api/oidc/callback` (the prefix follows the
//! configured callback path), plus `/api/session`, `/logout` and `/health`.

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;

pub use app::App;
pub use cli::{Args, Command};
pub use config::Config;
