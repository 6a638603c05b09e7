use crate::antispam::Verdict;
use crate::error::FloodgateError;
use crate::feeds::{ConnHandle, Outbound};
use crate::metrics::{counters, gauges};
use crate::proxy::extract_client_ip;
use crate::server::ServerState;
use floodgate_proto::{encode, split_frame, MessageType};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout};
use tokio_tungstenite::tungstenite::http::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsRecv = SplitStream<WebSocketStream<TcpStream>>;

/// Close reason sent to sources cut off for flooding.
pub const SPAM_CLOSE_REASON: &str = "spam detected";

/// Removes a connection from the feed table and the counters when its task
/// ends, however it ends.
struct ConnGuard {
    state: Arc<ServerState>,
    handle: Arc<ConnHandle>,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.state.feeds.unregister(&self.handle);
        self.state.active_connections.fetch_sub(1, Ordering::Relaxed);
        gauges::dec_connections_active();
    }
}

/// Upgrades `stream`, registers it under its client IP and serves it until
/// either side closes.
///
/// Sockets arriving while every handshake slot is taken are dropped at once.
/// An upgrade is abandoned when it outlives the handshake timeout or when
/// `shutdown` fires first.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), FloodgateError> {
    let permit = state.handshake_slots.try_acquire().map_err(|_| {
        debug!("handshake slots exhausted, dropping {}", peer_addr);
        FloodgateError::HandshakeBacklog
    })?;

    let ws_config = WebSocketConfig {
        max_message_size: Some(state.config.max_payload),
        max_frame_size: Some(state.config.max_payload),
        ..WebSocketConfig::default()
    };

    let client_ip = Arc::new(OnceLock::new());
    let ip_cell = client_ip.clone();
    let trusted = state.config.trusted_proxies.clone();
    let upgrade = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        move |req: &Request<()>, resp: Response<()>| {
            let _ = ip_cell.set(extract_client_ip(req, &peer_addr, &trusted));
            Ok(resp)
        },
        Some(ws_config),
    );
    let ws_stream = tokio::select! {
        result = timeout(state.config.handshake_timeout, upgrade) => {
            result.map_err(|_| FloodgateError::HandshakeTimeout)??
        }
        _ = shutdown.changed() => return Err(FloodgateError::ConnectionClosed),
    };
    drop(permit);

    let ip = client_ip
        .get()
        .copied()
        .unwrap_or_else(|| peer_addr.ip())
        .to_string();

    let (handle, mut outbound_rx) = state.feeds.register(&ip);
    state.active_connections.fetch_add(1, Ordering::Relaxed);
    gauges::inc_connections_active();
    let _guard = ConnGuard {
        state: state.clone(),
        handle: handle.clone(),
    };
    debug!(ip = %ip, conn = handle.id(), "feed connection opened");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let result = run_message_loop(&mut ws_tx, &mut ws_rx, &mut outbound_rx, &state, &ip).await;

    debug!(
        ip = %ip,
        conn = handle.id(),
        secs = handle.connected_at().elapsed().as_secs(),
        "feed connection closed"
    );
    result
}

/// Drive the select loop of an upgraded connection.
async fn run_message_loop(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    outbound_rx: &mut mpsc::Receiver<Outbound>,
    state: &ServerState,
    ip: &str,
) -> Result<(), FloodgateError> {
    let mut ping_interval = interval(state.config.ping_interval);
    let idle_timeout = state.config.idle_timeout;
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if let Err(e) = process_frame(&data, state, ws_tx, ip).await {
                            if matches!(e, FloodgateError::Spam(_)) {
                                let _ = send_close(ws_tx, SPAM_CLOSE_REASON.to_owned()).await;
                            }
                            return Err(e);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            debug!("failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(FloodgateError::WebSocket(e)),
                    _ => {}
                }
            }
            Some(out) = outbound_rx.recv() => {
                match out {
                    Outbound::Frame(frame) => {
                        ws_tx.send(Message::Binary(frame)).await?;
                    }
                    Outbound::Close(reason) => {
                        debug!(ip = %ip, reason = %reason, "closing on request");
                        let _ = send_close(ws_tx, reason).await;
                        return Ok(());
                    }
                }
            }
            _ = ping_interval.tick() => {
                if last_activity.elapsed() >= idle_timeout {
                    debug!("idle timeout reached, closing connection");
                    return Ok(());
                }
                if let Err(e) = ws_tx.send(Message::Ping(vec![])).await {
                    debug!("failed to send ping: {}", e);
                }
            }
        }
    }
}

async fn send_close<T>(ws_tx: &mut T, reason: String) -> Result<(), T::Error>
where
    T: Sink<Message> + Unpin,
{
    ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: Cow::Owned(reason),
        })))
        .await
}

/// Gates one client frame through the flood policy.
///
/// Mutating frames are posting actions: a limited source gets a captcha
/// back and its action is dropped, anyone else is charged the action's
/// cost. Control frames are never charged.
async fn process_frame<T>(
    data: &[u8],
    state: &ServerState,
    ws_tx: &mut T,
    ip: &str,
) -> Result<(), FloodgateError>
where
    T: Sink<Message> + Unpin,
    T::Error: std::fmt::Debug,
{
    let (typ, payload) = match split_frame(data) {
        Ok(parts) => parts,
        Err(e) => {
            counters::actions_total("malformed");
            debug!(ip = %ip, error = %e, "ignoring malformed frame");
            return Ok(());
        }
    };

    if !typ.is_mutating() {
        if typ != MessageType::Noop {
            debug!(ip = %ip, frame_type = typ.code(), "ignoring control frame");
        }
        return Ok(());
    }

    let antispam = &state.antispam;
    if !antispam.can_post(ip) {
        counters::actions_total("challenged");
        let captcha = encode(MessageType::Captcha, &0u8)?;
        ws_tx
            .send(Message::Binary(captcha))
            .await
            .map_err(|_| FloodgateError::ConnectionClosed)?;
        return Ok(());
    }

    let cost = state.config.scores.cost(typ, payload.len());
    match antispam.increment_score(ip, cost)? {
        Verdict::Challenged(fan_out) => {
            counters::actions_total("limited");
            debug!(
                ip = %ip,
                delivered = fan_out.delivered,
                failed = fan_out.failed,
                "source limited"
            );
        }
        Verdict::Clear | Verdict::Disabled => counters::actions_total("accepted"),
    }
    Ok(())
}
