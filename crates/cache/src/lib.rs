//! Grouped, generation-stamped cache.
//!
//! Keys are partitioned into named groups. Invalidating a group bumps its
//! generation instead of deleting its keys, so a clear costs one increment.
//! The same cache runs on a local directory ([`FileBackend`]), a single
//! server, or the sharded store ([`KvBackend`]).
//!
//! ```
//! use cache::{CacheConfig, GroupedCache, KvBackend};
//! use store::MemoryStore;
//!
//! let cache = GroupedCache::new(KvBackend::new(MemoryStore::new()), CacheConfig::default());
//! let users = cache.group("users").unwrap();
//! users.set("42", "alice", 0).unwrap();
//! assert_eq!(users.get::<String>("42").unwrap().as_deref(), Some("alice"));
//!
//! cache.clear("users").unwrap();
//! assert_eq!(cache.group("users").unwrap().get::<String>("42").unwrap(), None);
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod file;
pub mod grouped;
pub mod keys;
pub mod limiter;

pub use backend::{CacheBackend, KvBackend, ServerBackend, ShardedBackend};
pub use config::{CacheConfig, DEFAULT_TTL};
pub use error::{CacheError, Result};
pub use file::FileBackend;
pub use grouped::{CacheGroup, Fetch, GroupedCache};
pub use keys::KeyLayout;
