//! Error types for cache operations.

use std::io;
use store::StoreError;
use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Failure in a store-backed backend.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Failure in the file backend.
    #[error("cache file I/O: {0}")]
    Io(#[from] io::Error),

    /// A value could not be serialized for storage.
    #[error("cannot encode value: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("value is not an integer: {0}")]
    NotInteger(String),

    #[error("increment would overflow: {0}")]
    Overflow(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Whether a counter increment ran past `i64` range, whichever backend
    /// reported it.
    pub fn is_overflow(&self) -> bool {
        matches!(
            self,
            CacheError::Overflow(_) | CacheError::Store(StoreError::Overflow(_))
        )
    }
}
