use crate::directory::{Client, ConnectionDirectory, SendError};
use dashmap::DashMap;
use floodgate_proto::{encode, MessageType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

const DEFAULT_BUFFER: usize = 256;

/// Work queued for a connection's task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write this frame to the socket.
    Frame(Vec<u8>),
    /// Close the socket with this reason.
    Close(String),
}

impl<T> From<mpsc::error::TrySendError<T>> for SendError {
    fn from(err: mpsc::error::TrySendError<T>) -> Self {
        match err {
            mpsc::error::TrySendError::Full(_) => Self::Full,
            mpsc::error::TrySendError::Closed(_) => Self::Closed,
        }
    }
}

/// Handle held in the feed table, used to reach a connection's task.
#[derive(Debug)]
pub struct ConnHandle {
    tx: mpsc::Sender<Outbound>,
    ip: String,
    id: u64,
    connected_at: Instant,
}

impl ConnHandle {
    /// Per-process unique connection number.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Instant the connection was registered.
    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }
}

impl Client for ConnHandle {
    fn send(&self, frame: &[u8]) -> Result<(), SendError> {
        self.tx.try_send(Outbound::Frame(frame.to_vec()))?;
        Ok(())
    }

    fn ip(&self) -> &str {
        &self.ip
    }

    fn redirect(&self, board: &str) -> Result<(), SendError> {
        let frame = encode(MessageType::Redirect, board)?;
        self.tx.try_send(Outbound::Frame(frame))?;
        Ok(())
    }

    fn close(&self, reason: &str) -> Result<(), SendError> {
        self.tx.try_send(Outbound::Close(reason.to_owned()))?;
        Ok(())
    }
}

/// Concurrent client IP → live connections table.
///
/// One IP may hold several connections (tabs, devices, shared NAT).
#[derive(Debug)]
pub struct Feeds {
    clients: DashMap<String, Vec<Arc<ConnHandle>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Feeds {
    /// Create an empty table whose connections buffer `buffer` frames each.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Registers a new connection for `ip`, returning its handle and the
    /// receiving end of its outbound queue.
    pub fn register(&self, ip: &str) -> (Arc<ConnHandle>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let handle = Arc::new(ConnHandle {
            tx,
            ip: ip.to_owned(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            connected_at: Instant::now(),
        });
        self.clients
            .entry(ip.to_owned())
            .or_default()
            .push(Arc::clone(&handle));
        (handle, rx)
    }

    /// Removes one connection, leaving the IP's other connections in place.
    pub fn unregister(&self, handle: &ConnHandle) {
        if let Some(mut conns) = self.clients.get_mut(&handle.ip) {
            conns.retain(|c| c.id != handle.id);
        }
        self.clients.remove_if(&handle.ip, |_, conns| conns.is_empty());
    }

    /// Number of distinct IPs with at least one connection.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Total live connections across all IPs.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.clients.iter().map(|entry| entry.value().len()).sum()
    }

    /// Asks every live connection to close. Returns how many were asked.
    pub fn close_all(&self, reason: &str) -> usize {
        let mut asked = 0;
        for entry in self.clients.iter() {
            for conn in entry.value() {
                if conn.close(reason).is_ok() {
                    asked += 1;
                }
            }
        }
        asked
    }
}

impl Default for Feeds {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl ConnectionDirectory for Feeds {
    fn lookup(&self, id: &str) -> Vec<Arc<dyn Client>> {
        self.clients
            .get(id)
            .map(|conns| {
                conns
                    .iter()
                    .map(|c| Arc::clone(c) as Arc<dyn Client>)
                    .collect()
            })
            .unwrap_or_default()
    }
}
