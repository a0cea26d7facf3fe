use airband_protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by [`crate::client::Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("disconnected from server")]
    Disconnected,

    /// Oversized frame or malformed message; the connection is closed.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out: {0}")]
    Timeout(String),
}
