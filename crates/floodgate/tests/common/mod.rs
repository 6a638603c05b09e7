#![allow(dead_code)]

use floodgate::config::{ScoreTable, ServerConfig};
use floodgate::server::ServerState;
use floodgate_proto::MessageType;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

pub const QUIET: Duration = Duration::from_millis(300);

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        admin_addr: "127.0.0.1:0".parse().unwrap(),
        captcha: true,
        max_conns: 1000,
        max_pending: 100,
        handshake_timeout: Duration::from_secs(5),
        max_payload: 65_536,
        ping_interval: Duration::from_secs(30),
        idle_timeout: Duration::from_secs(120),
        sweep_interval: Duration::from_secs(600),
        idle_expiry: Duration::from_secs(900),
        trusted_proxies: vec!["127.0.0.0/8".parse().unwrap()],
        scores: ScoreTable {
            post: Duration::from_secs(20),
            ..ScoreTable::default()
        },
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    pub shutdown: watch::Sender<()>,
    pub task: JoinHandle<()>,
}

pub async fn start_server_with(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = test_config(addr);
    configure(&mut config);
    let state = ServerState::new(config);

    let (shutdown, shutdown_rx) = watch::channel(());
    let state_clone = state.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = floodgate::run_with_shutdown(listener, state_clone, shutdown_rx).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        addr,
        state,
        shutdown,
        task,
    }
}

pub async fn start_server() -> TestServer {
    start_server_with(|_| {}).await
}

impl TestServer {
    /// Waits until the server has registered `n` connections in total.
    pub async fn wait_for_connections(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.state.feeds.connection_count() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connections were not registered");
    }

    /// Waits until `n` sockets are parked in the WebSocket handshake.
    pub async fn wait_for_pending(&self, n: usize) {
        let max_pending = self.state.config.max_pending;
        tokio::time::timeout(Duration::from_secs(5), async {
            while max_pending - self.state.handshake_slots.available_permits() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("sockets did not reach the handshake");
    }

    /// Waits until every connection has been unregistered.
    pub async fn wait_for_drain(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.state.feeds.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connections were not released");
    }
}

/// Opens a TCP connection that never starts the WebSocket handshake.
pub async fn connect_raw(addr: &SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

/// Whether the server hangs up on `stream` within `within`.
pub async fn closed_by_server(stream: &mut TcpStream, within: Duration) -> bool {
    let mut buf = [0u8; 64];
    match tokio::time::timeout(within, stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => true,
        Ok(Ok(_)) | Err(_) => false,
    }
}

pub struct TestClient {
    pub ws_tx: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >,
    pub ws_rx: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >,
}

impl TestClient {
    /// Connects as `client_ip`, forwarded through the loopback proxy.
    pub async fn connect_as(addr: &SocketAddr, client_ip: &str) -> Self {
        let mut req = format!("ws://{addr}").into_client_request().unwrap();
        req.headers_mut()
            .insert("X-Forwarded-For", client_ip.parse().unwrap());
        let (ws, _) = tokio_tungstenite::connect_async(req).await.unwrap();
        let (ws_tx, ws_rx) = ws.split();
        Self { ws_tx, ws_rx }
    }

    pub async fn send_frame(&mut self, typ: MessageType, payload: &[u8]) {
        let mut frame = vec![typ.code()];
        frame.extend_from_slice(payload);
        self.ws_tx.send(Message::Binary(frame)).await.unwrap();
    }

    pub async fn send_raw(&mut self, data: Vec<u8>) {
        self.ws_tx.send(Message::Binary(data)).await.unwrap();
    }

    /// Next non-ping message, or `None` if nothing arrives within `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, async {
            loop {
                match self.ws_rx.next().await {
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(msg)) => return Some(msg),
                    Some(Err(_)) | None => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    pub async fn recv_binary(&mut self) -> Vec<u8> {
        match self.recv_timeout(Duration::from_secs(5)).await {
            Some(Message::Binary(data)) => data,
            other => panic!("expected binary frame, got {other:?}"),
        }
    }
}
