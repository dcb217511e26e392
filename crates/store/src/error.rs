//! Error types for store operations.

use redis::{ErrorKind, RedisError};
use std::io;
use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors returned by a [`StoreBackend`](crate::StoreBackend).
///
/// Transient errors ([`StoreError::is_transient`]) mark a shard as
/// disconnected; everything else is a property of the data or the call and
/// leaves the connection state alone.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The client lost, or never got, its connection to the server.
    #[error("connection error: {0}")]
    Connection(#[source] RedisError),

    /// Connect, read or write deadline elapsed.
    #[error("operation timed out")]
    Timeout,

    /// The server sent something that is not valid protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server rejected the command.
    #[error("server error: {0}")]
    Server(String),

    /// The shard is marked down and its reconnect budget is spent, or the
    /// reconnect attempt itself failed.
    #[error("store unavailable: {target}: {reason}")]
    Unavailable { target: String, reason: String },

    /// Operation against a key holding another type of value.
    #[error("wrong type: {0}")]
    WrongType(String),

    /// Increment of a value that is not an integer.
    #[error("value is not an integer: {0}")]
    NotInteger(String),

    /// Increment past `i64` range.
    #[error("increment would overflow: {0}")]
    Overflow(String),

    /// Routing failure.
    #[error(transparent)]
    Ring(#[from] corelib::Error),

    /// Invalid store configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether this error says something about the connection rather than
    /// about the request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_)
                | StoreError::Connection(_)
                | StoreError::Timeout
                | StoreError::Protocol(_)
                | StoreError::Unavailable { .. }
        )
    }

}

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_timeout() {
            return StoreError::Timeout;
        }
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            return StoreError::Connection(err);
        }
        if err.code() == Some("WRONGTYPE") {
            return StoreError::WrongType(err.to_string());
        }
        match err.kind() {
            // Plain ERR replies; the server only tells these apart in the text.
            ErrorKind::ResponseError => match err.detail() {
                Some(detail) if detail.contains("not an integer") => {
                    StoreError::NotInteger(detail.to_string())
                }
                Some(detail) if detail.contains("overflow") => {
                    StoreError::Overflow(detail.to_string())
                }
                _ => StoreError::Server(err.to_string()),
            },
            ErrorKind::TypeError => StoreError::Protocol(err.to_string()),
            _ => StoreError::Server(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Timeout.is_transient());
        assert!(StoreError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)).is_transient());
        assert!(!StoreError::Overflow("k".into()).is_transient());
        assert!(!StoreError::WrongType("k".into()).is_transient());
        assert!(!StoreError::Ring(corelib::Error::EmptyRing).is_transient());
    }

    #[test]
    fn test_redis_connection_errors_are_transient() {
        let refused = RedisError::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        let err = StoreError::from(refused);
        assert!(matches!(err, StoreError::Connection(_)));
        assert!(err.is_transient());

        let timed_out = RedisError::from(io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(StoreError::from(timed_out), StoreError::Timeout));
    }

    #[test]
    fn test_redis_reply_errors_keep_connection() {
        let not_integer = RedisError::from((
            ErrorKind::ResponseError,
            "An error was signalled by the server",
            "value is not an integer or out of range".to_string(),
        ));
        let err = StoreError::from(not_integer);
        assert!(matches!(err, StoreError::NotInteger(_)));
        assert!(!err.is_transient());

        let overflow = RedisError::from((
            ErrorKind::ResponseError,
            "An error was signalled by the server",
            "increment or decrement would overflow".to_string(),
        ));
        assert!(matches!(StoreError::from(overflow), StoreError::Overflow(_)));

        let other = RedisError::from((ErrorKind::ResponseError, "An error was signalled by the server"));
        assert!(matches!(StoreError::from(other), StoreError::Server(_)));
    }
}
