//! Backing-store layer.
//!
//! This crate defines what the cache and queue layers need from a key-value
//! engine and provides three implementations of it:
//! - [`MemoryStore`]: in-process, TTL-aware, for tests and single-process use
//! - [`RespStore`]: blocking client for a Redis-compatible server
//! - [`ShardedStore`]: routes every call to one of N stores via the hash ring

pub mod backend;
pub mod config;
pub mod error;
pub mod memory;
pub mod resp;
pub mod sharded;

pub use backend::{StoreBackend, Ttl};
pub use config::{StoreConfig, TargetConfig};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use resp::{RespConfig, RespStore};
pub use sharded::{routing_key, ShardedStore};
