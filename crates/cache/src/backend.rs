//! Physical storage behind a [`GroupedCache`](crate::GroupedCache).
//!
//! The cache only needs six scalar operations. Any [`StoreBackend`] provides
//! them through [`KvBackend`]; [`FileBackend`](crate::FileBackend) provides
//! them on a local directory.

use crate::error::Result;
use store::{RespStore, ShardedStore, StoreBackend};

/// Scalar key-value operations with whole-second TTLs (`0` = no expiry).
///
/// `incr` and `set_nx` must be atomic per key: generation counters, rate
/// limits and locks depend on it.
pub trait CacheBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()>;

    fn delete(&self, key: &str) -> Result<bool>;

    /// Add `delta` to an integer value (missing counts as 0). Keeps the
    /// key's TTL.
    fn incr(&self, key: &str, delta: i64) -> Result<i64>;

    /// Set only if absent. Returns whether the value was set.
    fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool>;

    /// Returns whether the key exists.
    fn expire(&self, key: &str, ttl: u64) -> Result<bool>;
}

/// Cache backend over any store.
#[derive(Debug)]
pub struct KvBackend<S> {
    store: S,
    name: &'static str,
}

/// One Redis-compatible server.
pub type ServerBackend = KvBackend<RespStore>;

/// Several servers behind the hash ring.
pub type ShardedBackend = KvBackend<ShardedStore>;

impl<S: StoreBackend> KvBackend<S> {
    pub fn new(store: S) -> Self {
        Self { store, name: "kv" }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl KvBackend<RespStore> {
    pub fn server(store: RespStore) -> Self {
        Self::new(store).with_name("server")
    }
}

impl KvBackend<ShardedStore> {
    pub fn sharded(store: ShardedStore) -> Self {
        Self::new(store).with_name("sharded")
    }
}

impl<S: StoreBackend> CacheBackend for KvBackend<S> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.store.get(key)?)
    }

    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        Ok(self.store.set(key, value, ttl)?)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.store.delete(key)?)
    }

    fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        Ok(self.store.incr(key, delta)?)
    }

    fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool> {
        Ok(self.store.set_nx(key, value, ttl)?)
    }

    fn expire(&self, key: &str, ttl: u64) -> Result<bool> {
        Ok(self.store.expire(key, ttl)?)
    }
}

/// Shared handles forward to the backend they point at.
impl<T: CacheBackend + ?Sized> CacheBackend for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        (**self).set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key)
    }

    fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        (**self).incr(key, delta)
    }

    fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool> {
        (**self).set_nx(key, value, ttl)
    }

    fn expire(&self, key: &str, ttl: u64) -> Result<bool> {
        (**self).expire(key, ttl)
    }
}
