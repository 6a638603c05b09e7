use floodgate_proto::CodecError;
use std::sync::Arc;
use thiserror::Error;

/// Errors delivering a frame to a single connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The connection's outbound buffer is full.
    #[error("send buffer full")]
    Full,
    /// The connection's task has already exited.
    #[error("connection closed")]
    Closed,
    /// The frame could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] CodecError),
}

impl SendError {
    /// Short label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Closed => "closed",
            Self::Encode(_) => "encode",
        }
    }
}

/// A live client connection, as seen by code outside its own task.
pub trait Client: Send + Sync {
    /// Queues a frame without waiting. Frames to one connection keep their
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the frame cannot be queued.
    fn send(&self, frame: &[u8]) -> Result<(), SendError>;

    /// The identifier (client IP) this connection is tracked under.
    fn ip(&self) -> &str;

    /// Points the client at another board.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the redirect frame cannot be queued.
    fn redirect(&self, board: &str) -> Result<(), SendError>;

    /// Asks the connection to close with `reason`.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the connection is already gone.
    fn close(&self, reason: &str) -> Result<(), SendError>;
}

/// Resolves an identifier to its live connections.
pub trait ConnectionDirectory: Send + Sync {
    /// Returns every live connection tracked under `id`. An empty result is
    /// not an error.
    fn lookup(&self, id: &str) -> Vec<Arc<dyn Client>>;
}
