//! Consistent hash ring implementation.
//!
//! The ring manages token positions and provides efficient lookup
//! operations for finding the target responsible for a key.

pub mod ring;

pub use ring::{HashRing, RingBuilder, DEFAULT_REPLICAS};
