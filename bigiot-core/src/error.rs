//! Domain-specific error types for the BigIoT device client.
//!
//! All fallible operations return `Result<T, BigiotError>`.
//! Nothing in here is fatal to the process: handshake errors are retried,
//! steady-state send errors are logged, malformed input is dropped.

use thiserror::Error;

/// The canonical error type for the BigIoT client.
#[derive(Debug, Error)]
pub enum BigiotError {
    // ── Connection Errors ────────────────────────────────────────
    /// The broker host name could not be resolved.
    #[error("failed to resolve {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The TCP connect step failed for every resolved address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The socket could not be switched to nonblocking mode.
    #[error("failed to configure socket: {0}")]
    Configuration(#[source] std::io::Error),

    /// A write to the connection failed.
    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    /// A read from the connection failed.
    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    // ── Protocol Errors ──────────────────────────────────────────
    /// Inbound text was not a well-formed message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// An inbound line exceeded the receive buffer bound.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// No check-in acknowledgement arrived within the polling bound.
    #[error("handshake timed out after {rounds} polling rounds")]
    HandshakeTimeout { rounds: u32 },

    /// A session state change that the state machine does not allow.
    #[error("invalid session transition: {0}")]
    InvalidTransition(&'static str),

    /// A write was attempted while the session is not authenticated.
    #[error("session is not authenticated")]
    NotAuthenticated,

    // ── Identity Store Errors ────────────────────────────────────
    /// No network identity has been provisioned.
    #[error("network identity not configured")]
    NotConfigured,

    /// The identity store holds data that could not be read back.
    #[error("identity storage error: {0}")]
    Storage(String),

    // ── Lifecycle ────────────────────────────────────────────────
    /// The client was asked to stop.
    #[error("client shutdown requested")]
    Cancelled,

    /// A local filesystem operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl BigiotError {
    /// Returns `true` for read-path errors that mean the connection is gone.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::Receive(_) | Self::ConnectionClosed)
    }
}

impl From<serde_json::Error> for BigiotError {
    fn from(e: serde_json::Error) -> Self {
        BigiotError::MalformedMessage(e.to_string())
    }
}
