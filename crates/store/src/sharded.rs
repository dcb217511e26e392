//! Ring-routed facade over N backing stores.
//!
//! Every call is routed by its primary identifier: the key for scalar
//! operations, the structure name for hash, sorted-set and queue operations.
//! Fields and members never influence placement, so a whole structure lives
//! on one shard.
//!
//! # Hash tags
//!
//! If the identifier contains `{tag}` with a non-empty tag, only the tag is
//! hashed. `delay_queue:{mail}:items` and `delay_queue:{mail}:due` therefore
//! land on the same shard.
//!
//! # Availability
//!
//! ```text
//!   connected ──transient error──▶ disconnected
//!       ▲                               │ next call: reconnect()
//!       │◀────────── ok ────────────────┤
//!       │                               │ failed max_retries times
//!       └──── health_check() ok ──── fail fast (Unavailable)
//! ```
//!
//! No keys are moved when a shard goes down; its key range is simply
//! unavailable until it returns.

use crate::backend::{StoreBackend, Ttl};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::resp::RespStore;
use corelib::{HashRing, TargetId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, info, warn};

/// The part of `key` that decides its shard.
///
/// # Examples
///
/// ```
/// use store::routing_key;
///
/// assert_eq!(routing_key("delay_queue:{mail}:due"), "mail");
/// assert_eq!(routing_key("plain"), "plain");
/// assert_eq!(routing_key("empty:{}:tag"), "empty:{}:tag");
/// ```
pub fn routing_key(key: &str) -> &str {
    let Some(start) = key.find('{') else {
        return key;
    };
    let rest = &key[start + 1..];
    match rest.find('}') {
        Some(end) if end > 0 => &rest[..end],
        _ => key,
    }
}

struct Shard {
    backend: Box<dyn StoreBackend>,
    connected: AtomicBool,
    failed_reconnects: AtomicU32,
}

impl Shard {
    fn new(backend: Box<dyn StoreBackend>) -> Self {
        Self {
            backend,
            connected: AtomicBool::new(true),
            failed_reconnects: AtomicU32::new(0),
        }
    }

    fn mark_up(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.failed_reconnects.store(0, Ordering::SeqCst);
    }
}

/// [`StoreBackend`] that spreads keys over several stores.
pub struct ShardedStore {
    ring: HashRing,
    shards: HashMap<TargetId, Shard>,
    max_retries: u32,
}

impl std::fmt::Debug for ShardedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedStore")
            .field("ring", &self.ring)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl ShardedStore {
    /// Pair a ring with one backend per ring target.
    ///
    /// Fails if the ring is empty, or if the ring targets and the backend
    /// ids are not the same set.
    pub fn new<I, K>(ring: HashRing, backends: I, max_retries: u32) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Box<dyn StoreBackend>)>,
        K: Into<TargetId>,
    {
        if ring.is_empty() {
            return Err(StoreError::Config("hash ring has no targets".into()));
        }

        let mut shards = HashMap::new();
        for (id, backend) in backends {
            let id = id.into();
            if !ring.contains(id.as_str()) {
                return Err(StoreError::Config(format!(
                    "backend {} is not a ring target",
                    id
                )));
            }
            if shards.insert(id.clone(), Shard::new(backend)).is_some() {
                return Err(StoreError::Config(format!("backend {} given twice", id)));
            }
        }

        if let Some(missing) = ring.targets().into_iter().find(|t| !shards.contains_key(&t.id)) {
            return Err(StoreError::Config(format!(
                "ring target {} has no backend",
                missing.id
            )));
        }

        Ok(Self {
            ring,
            shards,
            max_retries,
        })
    }

    /// Build a RESP client per configured target.
    pub fn connect(config: &StoreConfig) -> Result<Self> {
        let ring = config.ring()?;
        let backends = config.targets.iter().map(|target| {
            let store: Box<dyn StoreBackend> =
                Box::new(RespStore::new(target.resp(config.timeout())));
            (target.id(), store)
        });
        let store = Self::new(ring, backends, config.max_retries)?;
        info!(
            shards = store.shards.len(),
            hasher = store.ring.partitioner_name(),
            "sharded store ready"
        );
        Ok(store)
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    /// The target owning `key`.
    pub fn shard_for(&self, key: &str) -> Result<TargetId> {
        Ok(self.ring.lookup(routing_key(key).as_bytes())?)
    }

    /// Whether the shard is currently considered reachable.
    pub fn is_connected(&self, id: &str) -> bool {
        self.shards
            .get(id)
            .map_or(false, |s| s.connected.load(Ordering::SeqCst))
    }

    /// Ping every shard, restoring any that answer. Results are ordered by
    /// target id.
    pub fn health_check(&self) -> Vec<(TargetId, Result<()>)> {
        let mut ids: Vec<&TargetId> = self.shards.keys().collect();
        ids.sort();

        ids.into_iter()
            .map(|id| {
                let shard = &self.shards[id];
                let was_up = shard.connected.load(Ordering::SeqCst);
                let result = if was_up {
                    shard.backend.ping()
                } else {
                    shard.backend.reconnect()
                };
                match &result {
                    Ok(()) => {
                        if !was_up {
                            info!(shard = %id, "shard restored by health check");
                        }
                        shard.mark_up();
                    }
                    Err(err) => {
                        warn!(shard = %id, error = %err, "health check failed");
                        if err.is_transient() {
                            shard.connected.store(false, Ordering::SeqCst);
                        }
                    }
                }
                (id.clone(), result)
            })
            .collect()
    }

    /// Reconnect a disconnected shard if its budget allows.
    fn ensure_available(&self, id: &TargetId, shard: &Shard) -> Result<()> {
        if shard.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let attempts = shard.failed_reconnects.load(Ordering::SeqCst);
        if attempts >= self.max_retries {
            return Err(StoreError::Unavailable {
                target: id.to_string(),
                reason: format!("{} reconnect attempts failed", attempts),
            });
        }

        match shard.backend.reconnect() {
            Ok(()) => {
                info!(shard = %id, attempts, "shard reconnected");
                shard.mark_up();
                Ok(())
            }
            Err(err) => {
                let attempts = shard.failed_reconnects.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(shard = %id, attempts, error = %err, "reconnect failed");
                Err(StoreError::Unavailable {
                    target: id.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    fn route<T>(&self, key: &str, op: impl FnOnce(&dyn StoreBackend) -> Result<T>) -> Result<T> {
        let id = self.shard_for(key)?;
        let shard = self.shards.get(&id).ok_or_else(|| {
            StoreError::Config(format!("ring target {} has no backend", id))
        })?;
        debug!(key, shard = %id, "route");

        self.ensure_available(&id, shard)?;

        let result = op(shard.backend.as_ref());
        if let Err(err) = &result {
            if err.is_transient() && shard.connected.swap(false, Ordering::SeqCst) {
                warn!(shard = %id, error = %err, "shard marked disconnected");
            }
        }
        result
    }
}

impl StoreBackend for ShardedStore {
    /// Ping every shard; the first failure is returned.
    fn ping(&self) -> Result<()> {
        self.health_check()
            .into_iter()
            .map(|(_, result)| result)
            .collect()
    }

    fn reconnect(&self) -> Result<()> {
        self.ping()
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.route(key, |b| b.get(key))
    }

    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        self.route(key, |b| b.set(key, value, ttl))
    }

    fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool> {
        self.route(key, |b| b.set_nx(key, value, ttl))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.route(key, |b| b.delete(key))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.route(key, |b| b.exists(key))
    }

    fn expire(&self, key: &str, ttl: u64) -> Result<bool> {
        self.route(key, |b| b.expire(key, ttl))
    }

    fn ttl(&self, key: &str) -> Result<Ttl> {
        self.route(key, |b| b.ttl(key))
    }

    fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        self.route(key, |b| b.incr(key, delta))
    }

    fn hset(&self, name: &str, field: &str, value: &str) -> Result<()> {
        self.route(name, |b| b.hset(name, field, value))
    }

    fn hget(&self, name: &str, field: &str) -> Result<Option<String>> {
        self.route(name, |b| b.hget(name, field))
    }

    fn hdel(&self, name: &str, field: &str) -> Result<bool> {
        self.route(name, |b| b.hdel(name, field))
    }

    fn hincr(&self, name: &str, field: &str, delta: i64) -> Result<i64> {
        self.route(name, |b| b.hincr(name, field, delta))
    }

    fn hexists(&self, name: &str, field: &str) -> Result<bool> {
        self.route(name, |b| b.hexists(name, field))
    }

    fn hsize(&self, name: &str) -> Result<u64> {
        self.route(name, |b| b.hsize(name))
    }

    fn hgetall(&self, name: &str) -> Result<Vec<(String, String)>> {
        self.route(name, |b| b.hgetall(name))
    }

    fn hscan(
        &self,
        name: &str,
        field_start: &str,
        field_end: &str,
        limit: usize,
    ) -> Result<Vec<(String, String)>> {
        self.route(name, |b| b.hscan(name, field_start, field_end, limit))
    }

    fn hclear(&self, name: &str) -> Result<u64> {
        self.route(name, |b| b.hclear(name))
    }

    fn zset(&self, name: &str, member: &str, score: i64) -> Result<()> {
        self.route(name, |b| b.zset(name, member, score))
    }

    fn zget(&self, name: &str, member: &str) -> Result<Option<i64>> {
        self.route(name, |b| b.zget(name, member))
    }

    fn zdel(&self, name: &str, member: &str) -> Result<bool> {
        self.route(name, |b| b.zdel(name, member))
    }

    fn zincr(&self, name: &str, member: &str, delta: i64) -> Result<i64> {
        self.route(name, |b| b.zincr(name, member, delta))
    }

    fn zexists(&self, name: &str, member: &str) -> Result<bool> {
        self.route(name, |b| b.zexists(name, member))
    }

    fn zsize(&self, name: &str) -> Result<u64> {
        self.route(name, |b| b.zsize(name))
    }

    fn zrange(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<(String, i64)>> {
        self.route(name, |b| b.zrange(name, offset, limit))
    }

    fn zrrange(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<(String, i64)>> {
        self.route(name, |b| b.zrrange(name, offset, limit))
    }

    fn zscan(
        &self,
        name: &str,
        member_start: &str,
        score_start: Option<i64>,
        score_end: Option<i64>,
        limit: usize,
    ) -> Result<Vec<(String, i64)>> {
        self.route(name, |b| {
            b.zscan(name, member_start, score_start, score_end, limit)
        })
    }

    fn qpush_front(&self, name: &str, item: &str) -> Result<u64> {
        self.route(name, |b| b.qpush_front(name, item))
    }

    fn qpush_back(&self, name: &str, item: &str) -> Result<u64> {
        self.route(name, |b| b.qpush_back(name, item))
    }

    fn qpop_front(&self, name: &str, count: usize) -> Result<Vec<String>> {
        self.route(name, |b| b.qpop_front(name, count))
    }

    fn qpop_back(&self, name: &str, count: usize) -> Result<Vec<String>> {
        self.route(name, |b| b.qpop_back(name, count))
    }

    fn qsize(&self, name: &str) -> Result<u64> {
        self.route(name, |b| b.qsize(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_key_edge_cases() {
        assert_eq!(routing_key("{a}"), "a");
        assert_eq!(routing_key("x{a}y{b}"), "a");
        assert_eq!(routing_key("x{a"), "x{a");
        assert_eq!(routing_key("x}{a}"), "a");
        assert_eq!(routing_key(""), "");
    }
}
