//! Error types for the WebSocket client

use std::time::Duration;
use thiserror::Error;

/// Failures reported by a transport session
///
/// These never reach the caller of [`send`](crate::WebSocketClient::send).
/// They are delivered to the event strategy through the failure path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection or handshake failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Opening handshake or frame write did not finish in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Writing a frame failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Reading a frame failed
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Stream ended without a close frame
    #[error("connection closed")]
    ConnectionClosed,

    /// Peer closed with a code other than normal closure
    #[error("unexpected close {code}: {reason}")]
    UnexpectedClose { code: u16, reason: String },

    /// Session is not open (yet, or any more)
    #[error("not connected")]
    NotConnected,
}

/// Configuration validation error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A transport timeout was zero
    #[error("{name} must be greater than zero")]
    ZeroTimeout { name: &'static str },

    /// Base retry interval was zero
    #[error("retry interval must be greater than zero")]
    ZeroRetryInterval,

    /// Backoff multiplier below 1.0 or not finite
    #[error("invalid backoff multiplier: {value} (must be a finite number >= 1.0)")]
    InvalidBackoffMultiplier { value: f64 },

    /// Jitter outside the unit interval
    #[error("invalid jitter: {value} (must be within 0.0..=1.0)")]
    InvalidJitter { value: f64 },

    /// Bounded queue with no room
    #[error("queue capacity must be greater than zero")]
    ZeroQueueCapacity,

    /// Config document could not be parsed
    #[error("invalid config document: {0}")]
    Parse(String),
}

/// Errors returned to callers of the client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Rejected configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// URL is not a usable WebSocket URL
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Client was closed; the message was not queued
    #[error("client is closed")]
    Closed,

    /// Bounded queue is full (only from `try_send`)
    #[error("outbound queue is full")]
    QueueFull,
}

impl ClientError {
    /// Returns true if retrying the same call later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::UnexpectedClose {
            code: 1011,
            reason: "internal error".into(),
        };
        assert_eq!(err.to_string(), "unexpected close 1011: internal error");

        let err = ClientError::from(ConfigError::ZeroTimeout {
            name: "connect_timeout",
        });
        assert!(err.to_string().contains("connect_timeout"));
    }

    #[test]
    fn test_retryable() {
        assert!(ClientError::QueueFull.is_retryable());
        assert!(!ClientError::Closed.is_retryable());
    }
}
