//! Error types for the core library.

use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or querying the ring.
///
/// All of these are configuration or programmer errors: they are raised at
/// construction time (or on a lookup against a ring nobody populated) and are
/// never used to signal transient store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A target with this id is already on the ring.
    #[error("target already on the ring: {0}")]
    DuplicateTarget(String),
    /// No target with this id is on the ring.
    #[error("unknown target: {0}")]
    UnknownTarget(String),
    /// Lookup against a ring without targets.
    #[error("hash ring has no targets")]
    EmptyRing,
    /// Weight must be finite and strictly positive.
    #[error("invalid weight {weight} for target {target}")]
    InvalidWeight { target: String, weight: String },
    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}
