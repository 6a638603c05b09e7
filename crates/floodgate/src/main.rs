#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use floodgate::config::{Args, ServerConfig};
use floodgate::metrics::{start_admin_server, HealthState};
use floodgate::server::ServerState;
use floodgate::run_with_shutdown;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config: ServerConfig = args.into();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let state = ServerState::new(config.clone());
    info!(
        captcha = config.captcha,
        trusted_proxies = config.trusted_proxies.len(),
        "flood protection configured"
    );

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);

    let health_state = HealthState::new();

    tokio::spawn({
        let antispam = state.antispam.clone();
        let health_state = health_state.clone();
        async move {
            if let Err(e) = start_admin_server(config.admin_addr, antispam, health_state).await {
                warn!("admin server error: {}", e);
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let server = tokio::spawn(run_with_shutdown(listener, state, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    health_state.set_ready(false);
    drop(shutdown_tx);

    match server.await {
        Ok(Err(e)) => tracing::error!("server error: {}", e),
        Err(e) => tracing::error!("server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}
