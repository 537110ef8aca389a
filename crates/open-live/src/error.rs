//! Open Live error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, OpenLiveError>;

/// Gateway response codes after which negotiation must not be retried.
///
/// `7007` is an invalid room key, `7010` means too many sessions are already
/// running for the room.
pub const FATAL_GATEWAY_CODES: [i64; 2] = [7007, 7010];

/// Errors that can occur while collecting danmu from the Open Live channel.
#[derive(Error, Debug)]
pub enum OpenLiveError {
    /// Connection-related errors (socket connect, read, write).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed or incomplete gateway responses.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A compressed frame body could not be inflated.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// The gateway answered with a non-zero business code.
    #[error("Gateway error: code={code}, message={message}, request_id={request_id}")]
    Gateway {
        code: i64,
        message: String,
        request_id: String,
    },

    /// HTTP transport errors.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid listener configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl OpenLiveError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a decompression error.
    pub fn decompression(msg: impl Into<String>) -> Self {
        Self::Decompression(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a gateway error from a response envelope.
    pub fn gateway(code: i64, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::Gateway {
            code,
            message: message.into(),
            request_id: request_id.into(),
        }
    }

    /// Whether the listener must stop instead of negotiating again.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Gateway { code, .. } => FATAL_GATEWAY_CODES.contains(code),
            Self::Configuration(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(OpenLiveError::gateway(7007, "invalid code", "r1").is_fatal());
        assert!(OpenLiveError::gateway(7010, "too many sessions", "r2").is_fatal());
        assert!(!OpenLiveError::gateway(5000, "busy", "r3").is_fatal());
        assert!(!OpenLiveError::connection("reset by peer").is_fatal());
        assert!(OpenLiveError::config("missing room key").is_fatal());
    }

    #[test]
    fn test_gateway_display() {
        let err = OpenLiveError::gateway(7010, "limit", "abc");
        assert_eq!(
            err.to_string(),
            "Gateway error: code=7010, message=limit, request_id=abc"
        );
    }
}
