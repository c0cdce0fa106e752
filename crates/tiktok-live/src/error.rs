//! Live adapter error types.

use std::time::Duration;

use thiserror::Error;

use crate::rate_limit::is_rate_limit_message;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, LiveError>;

/// Errors that can occur while talking to a live room.
#[derive(Error, Debug)]
pub enum LiveError {
    /// Connection-related errors (WebSocket, DNS, refused upgrade, ...)
    #[error("Connection error: {0}")]
    Connection(String),

    /// The platform (or the signing service in front of it) is throttling us.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Protocol parsing errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The operation did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LiveError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a rate-limit error.
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Build a connection-level error from a free-form message, promoting it to
    /// [`LiveError::RateLimited`] when the text carries a known throttling marker.
    pub fn classify(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        if is_rate_limit_message(&msg) {
            Self::RateLimited(msg)
        } else {
            Self::Connection(msg)
        }
    }

    /// Whether this error represents a rate-limit condition.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}
