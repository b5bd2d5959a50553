//! Tracing subscriber setup.

use crate::config::Config;
use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|e| anyhow!("Invalid log filter '{}': {}", config.log_filter(), e))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.logging.target)
        .with_level(true);

    let result = match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder.with_ansi(true).pretty().try_init(),
    };

    result.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}
