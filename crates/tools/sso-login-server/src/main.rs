use anyhow::{Context, Result};
use clap::Parser;
use sso_login_server::{App, Args, Command, logging};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = args.load_config()?;

    if args.command() == Command::CheckConfig {
        println!("{}", config.redacted().to_toml()?);
        return Ok(());
    }

    logging::init(&config)?;

    let app = App::build(&config)?;
    let addr = config.socket_addr();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Login server listening on http://{}", addr);

    axum::serve(listener, app.router.clone())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Login server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
