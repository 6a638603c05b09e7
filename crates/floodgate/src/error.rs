use thiserror::Error;

/// Accounting outcome that must reject the triggering action.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamError {
    /// The source's schedule ran further ahead of real time than any human
    /// posting rate could explain.
    #[error("spam detected")]
    SpamDetected,
}

/// Errors that can occur while serving a feed connection.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The WebSocket upgrade did not finish in time.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// Every handshake slot was taken when the socket arrived.
    #[error("too many pending handshakes")]
    HandshakeBacklog,
    /// The connection was closed by the remote peer.
    #[error("connection closed")]
    ConnectionClosed,
    /// Frame encoding or tag parsing error.
    #[error("codec error: {0}")]
    Codec(#[from] floodgate_proto::CodecError),
    /// The client was cut off for flooding.
    #[error(transparent)]
    Spam(#[from] SpamError),
}
