//! Error types for wirecall.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all wirecall operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (configuration loading only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol violation (header length out of bounds, malformed envelope).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection closed, locally or by the peer.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No input arrived within the idle timeout.
    #[error("Idle timeout after {0:?}")]
    IdleTimeout(Duration),

    /// Every connect attempt failed or timed out.
    #[error("Failed to connect to {addr} after {attempts} attempt(s)")]
    ConnectFailed {
        /// Target address.
        addr: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// No reply arrived within the wait timeout.
    #[error("Timed out waiting for reply to request {0}")]
    WaitTimeout(u64),

    /// The server answered with a FAIL envelope.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation requires a running server.
    #[error("Server is not running")]
    NotRunning,

    /// `start` called on a server that is already running.
    #[error("Server is already running")]
    AlreadyRunning,
}

impl RpcError {
    /// Whether this error means the transport is gone.
    ///
    /// Callers typically reconnect after a transport error and give up
    /// (or report) after an application error.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcError::Io(_)
                | RpcError::ConnectionClosed
                | RpcError::IdleTimeout(_)
                | RpcError::ConnectFailed { .. }
                | RpcError::Protocol(_)
        )
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(RpcError::ConnectionClosed.is_transport());
        assert!(RpcError::IdleTimeout(Duration::from_secs(1)).is_transport());
        assert!(RpcError::Protocol("bad header".into()).is_transport());
        assert!(!RpcError::Remote("unknown function: x".into()).is_transport());
        assert!(!RpcError::WaitTimeout(7).is_transport());
    }

    #[test]
    fn test_display_messages() {
        let err = RpcError::ConnectFailed {
            addr: "127.0.0.1:9".into(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "Failed to connect to 127.0.0.1:9 after 3 attempt(s)"
        );
        assert_eq!(
            RpcError::Remote("boom".into()).to_string(),
            "Remote error: boom"
        );
    }
}
