use crate::config::Config;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

/// Single sign-on login server for OpenID Connect providers
#[derive(Debug, Parser)]
#[command(name = "sso-login-server")]
#[command(about = "Single sign-on login server for OpenID Connect providers")]
#[command(version)]
pub struct Args {
    /// Path to the configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to bind to
    #[arg(long, value_name = "IP")]
    pub host: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level or filter directive
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the server (default)
    Serve,
    /// Print the effective configuration with secrets masked, then exit
    CheckConfig,
}

impl Args {
    /// Load configuration and apply command line overrides on top.
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }

    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from([
            "sso-login-server",
            "--config",
            "/etc/sso/config.toml",
            "--port",
            "8096",
            "--log-level",
            "debug",
        ]);

        assert_eq!(args.config, Some(PathBuf::from("/etc/sso/config.toml")));
        assert_eq!(args.command(), Command::Serve);

        let mut config = Config::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.server.port, 8096);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_check_config_subcommand() {
        let args = Args::parse_from(["sso-login-server", "--host", "0.0.0.0", "check-config"]);
        assert_eq!(args.command(), Command::CheckConfig);
        assert_eq!(args.host, Some("0.0.0.0".parse().unwrap()));
    }
}
