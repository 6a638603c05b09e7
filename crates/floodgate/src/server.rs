use crate::antispam::{AntiSpam, ChallengeSwitch};
use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::error::FloodgateError;
use crate::feeds::Feeds;
use crate::registry::Registry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for the feed server.
pub struct ServerState {
    /// Client IP → live connections.
    pub feeds: Arc<Feeds>,
    /// Flood policy shared by every connection.
    pub antispam: Arc<AntiSpam>,
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// Number of upgraded connections currently served.
    pub active_connections: AtomicUsize,
    /// Bounds sockets that have not finished the WebSocket upgrade.
    pub handshake_slots: Semaphore,
}

impl ServerState {
    /// Builds a fresh registry, feed table and policy from `config`.
    #[must_use]
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let feeds = Arc::new(Feeds::default());
        let antispam = Arc::new(AntiSpam::new(
            Arc::new(Registry::new()),
            ChallengeSwitch::new(config.captcha),
            feeds.clone(),
        ));
        let handshake_slots = Semaphore::new(config.max_pending);
        Arc::new(Self {
            feeds,
            antispam,
            config,
            active_connections: AtomicUsize::new(0),
            handshake_slots,
        })
    }
}

/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), FloodgateError> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    run_with_shutdown(listener, state, shutdown_rx).await
}

/// Run the server accept loop with an externally-controlled shutdown signal.
///
/// The idle source sweep runs alongside the accept loop. When `shutdown`
/// fires or its sender is dropped, the loop stops accepting, asks every live
/// connection to close and waits for them to finish.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), FloodgateError> {
    let local_addr = listener.local_addr()?;
    info!("server listening on {}", local_addr);

    let sweeper = state.antispam.registry().spawn_sweeper(
        state.config.sweep_interval,
        state.config.idle_expiry,
        shutdown.clone(),
    );
    let conn_shutdown = shutdown.clone();
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let pending = state
                            .config
                            .max_pending
                            .saturating_sub(state.handshake_slots.available_permits());
                        let active = state.active_connections.load(Ordering::Relaxed);
                        if active + pending >= state.config.max_conns {
                            warn!("max connections reached, rejecting {}", addr);
                            drop(stream);
                            continue;
                        }
                        let state = Arc::clone(&state);
                        let shutdown = conn_shutdown.clone();
                        tasks.spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, state, shutdown).await {
                                tracing::debug!("connection from {} closed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            _ = shutdown.changed() => {
                info!("shutdown signal received, draining {} connections", tasks.len());
                break;
            }
        }
    }

    drop(listener);
    state.feeds.close_all("server shutting down");

    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while !tasks.is_empty() {
        if tokio::time::timeout_at(deadline, tasks.join_next())
            .await
            .is_err()
        {
            warn!(
                "drain timeout reached with {} connections still active",
                tasks.len()
            );
            tasks.abort_all();
            break;
        }
    }

    if let Err(e) = sweeper.await {
        error!("expiry sweep task failed: {}", e);
    }

    info!("server shut down gracefully");
    Ok(())
}
