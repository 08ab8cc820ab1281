//! Network Errors
//!
//! Failure taxonomy for the sync layer. Errors on one session never
//! escape that session's task; they are logged and turned into a
//! disconnect notification instead.

/// Errors raised by framing, the envelope codec, and the transport.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to bind a listener or dial a host.
    #[error("connection to {addr} failed: {source}")]
    Connection {
        /// Address we tried to bind or dial
        addr: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Malformed or mismatched handshake, or an envelope that breaks its invariants.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Frame length prefix above the limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared size
        size: usize,
        /// Limit
        max: usize,
    },

    /// Socket read/write failed mid-session.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer did not complete the handshake in time.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// Transport was stopped.
    #[error("transport stopped")]
    Stopped,
}

impl NetError {
    /// Build a connection error for a socket address.
    pub fn connection(addr: impl ToString, source: std::io::Error) -> Self {
        Self::Connection { addr: addr.to_string(), source }
    }

    /// Build a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// True for a clean end of stream (peer closed the socket).
    pub fn is_eof(&self) -> bool {
        matches!(self, NetError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
