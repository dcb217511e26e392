//! The backing-store contract.
//!
//! Four families of operations over named values:
//!
//! ```text
//!   scalar   key                -> value (optional TTL)
//!   hash     (name, field)      -> value, fields ordered
//!   zset     (name, member)     -> i64 score, ordered by (score, member)
//!   queue    name               -> deque of values
//! ```
//!
//! TTLs are whole seconds; `0` means "no expiry". Only scalar keys expire.
//! Every implementation must make single-key operations atomic; `incr` and
//! `set_nx` in particular are what locks, counters and sequence ids are built
//! on.

use crate::error::Result;

/// Remaining lifetime of a scalar key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key does not exist.
    Missing,
    /// The key exists and never expires.
    Persistent,
    /// The key expires in this many seconds.
    Expires(u64),
}

/// Operations the cache and queue layers need from a key-value engine.
pub trait StoreBackend: Send + Sync {
    /// Health check.
    fn ping(&self) -> Result<()>;

    /// Drop any broken connection and establish a fresh one.
    fn reconnect(&self) -> Result<()> {
        self.ping()
    }

    // ------------------------------------------------------------------
    // Scalar
    // ------------------------------------------------------------------

    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()>;

    /// Set only if the key does not exist. Returns whether it was set.
    fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool>;

    /// Returns whether the key existed.
    fn delete(&self, key: &str) -> Result<bool>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Set a key's TTL; `0` makes it persistent. Returns whether the key
    /// exists.
    fn expire(&self, key: &str, ttl: u64) -> Result<bool>;

    fn ttl(&self, key: &str) -> Result<Ttl>;

    /// Atomically add `delta` (a missing key counts as 0) and return the new
    /// value. Fails with `NotInteger` or `Overflow` rather than wrapping.
    fn incr(&self, key: &str, delta: i64) -> Result<i64>;

    // ------------------------------------------------------------------
    // Hash
    // ------------------------------------------------------------------

    fn hset(&self, name: &str, field: &str, value: &str) -> Result<()>;

    fn hget(&self, name: &str, field: &str) -> Result<Option<String>>;

    fn hdel(&self, name: &str, field: &str) -> Result<bool>;

    fn hincr(&self, name: &str, field: &str, delta: i64) -> Result<i64>;

    fn hexists(&self, name: &str, field: &str) -> Result<bool>;

    fn hsize(&self, name: &str) -> Result<u64>;

    fn hgetall(&self, name: &str) -> Result<Vec<(String, String)>>;

    /// Fields in `(field_start, field_end]`, ascending. An empty bound is
    /// unbounded.
    fn hscan(
        &self,
        name: &str,
        field_start: &str,
        field_end: &str,
        limit: usize,
    ) -> Result<Vec<(String, String)>>;

    /// Remove the whole hash. Returns the number of fields removed.
    fn hclear(&self, name: &str) -> Result<u64>;

    // ------------------------------------------------------------------
    // Sorted set
    // ------------------------------------------------------------------

    fn zset(&self, name: &str, member: &str, score: i64) -> Result<()>;

    fn zget(&self, name: &str, member: &str) -> Result<Option<i64>>;

    fn zdel(&self, name: &str, member: &str) -> Result<bool>;

    fn zincr(&self, name: &str, member: &str, delta: i64) -> Result<i64>;

    fn zexists(&self, name: &str, member: &str) -> Result<bool> {
        Ok(self.zget(name, member)?.is_some())
    }

    fn zsize(&self, name: &str) -> Result<u64>;

    /// Members by ascending (score, member) rank.
    fn zrange(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<(String, i64)>>;

    /// Members by descending (score, member) rank.
    fn zrrange(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<(String, i64)>>;

    /// Range scan by score.
    ///
    /// With a non-empty `member_start` and a `score_start`, the scan resumes
    /// after that member: it returns members whose score equals
    /// `score_start` and that sort after `member_start`, followed by members
    /// with a strictly greater score. Scores are bounded above by
    /// `score_end`, inclusive. `None` bounds are unbounded.
    fn zscan(
        &self,
        name: &str,
        member_start: &str,
        score_start: Option<i64>,
        score_end: Option<i64>,
        limit: usize,
    ) -> Result<Vec<(String, i64)>>;

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Returns the new queue length.
    fn qpush_front(&self, name: &str, item: &str) -> Result<u64>;

    /// Returns the new queue length.
    fn qpush_back(&self, name: &str, item: &str) -> Result<u64>;

    fn qpop_front(&self, name: &str, count: usize) -> Result<Vec<String>>;

    fn qpop_back(&self, name: &str, count: usize) -> Result<Vec<String>>;

    fn qsize(&self, name: &str) -> Result<u64>;
}

/// Shared handles forward to the store they point at, so one store can be
/// handed to several owners (and still be poked at directly in tests).
impl<T: StoreBackend + ?Sized> StoreBackend for std::sync::Arc<T> {
    fn ping(&self) -> Result<()> {
        (**self).ping()
    }

    fn reconnect(&self) -> Result<()> {
        (**self).reconnect()
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        (**self).set(key, value, ttl)
    }

    fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool> {
        (**self).set_nx(key, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key)
    }

    fn expire(&self, key: &str, ttl: u64) -> Result<bool> {
        (**self).expire(key, ttl)
    }

    fn ttl(&self, key: &str) -> Result<Ttl> {
        (**self).ttl(key)
    }

    fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        (**self).incr(key, delta)
    }

    fn hset(&self, name: &str, field: &str, value: &str) -> Result<()> {
        (**self).hset(name, field, value)
    }

    fn hget(&self, name: &str, field: &str) -> Result<Option<String>> {
        (**self).hget(name, field)
    }

    fn hdel(&self, name: &str, field: &str) -> Result<bool> {
        (**self).hdel(name, field)
    }

    fn hincr(&self, name: &str, field: &str, delta: i64) -> Result<i64> {
        (**self).hincr(name, field, delta)
    }

    fn hexists(&self, name: &str, field: &str) -> Result<bool> {
        (**self).hexists(name, field)
    }

    fn hsize(&self, name: &str) -> Result<u64> {
        (**self).hsize(name)
    }

    fn hgetall(&self, name: &str) -> Result<Vec<(String, String)>> {
        (**self).hgetall(name)
    }

    fn hscan(
        &self,
        name: &str,
        field_start: &str,
        field_end: &str,
        limit: usize,
    ) -> Result<Vec<(String, String)>> {
        (**self).hscan(name, field_start, field_end, limit)
    }

    fn hclear(&self, name: &str) -> Result<u64> {
        (**self).hclear(name)
    }

    fn zset(&self, name: &str, member: &str, score: i64) -> Result<()> {
        (**self).zset(name, member, score)
    }

    fn zget(&self, name: &str, member: &str) -> Result<Option<i64>> {
        (**self).zget(name, member)
    }

    fn zdel(&self, name: &str, member: &str) -> Result<bool> {
        (**self).zdel(name, member)
    }

    fn zincr(&self, name: &str, member: &str, delta: i64) -> Result<i64> {
        (**self).zincr(name, member, delta)
    }

    fn zexists(&self, name: &str, member: &str) -> Result<bool> {
        (**self).zexists(name, member)
    }

    fn zsize(&self, name: &str) -> Result<u64> {
        (**self).zsize(name)
    }

    fn zrange(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<(String, i64)>> {
        (**self).zrange(name, offset, limit)
    }

    fn zrrange(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<(String, i64)>> {
        (**self).zrrange(name, offset, limit)
    }

    fn zscan(
        &self,
        name: &str,
        member_start: &str,
        score_start: Option<i64>,
        score_end: Option<i64>,
        limit: usize,
    ) -> Result<Vec<(String, i64)>> {
        (**self).zscan(name, member_start, score_start, score_end, limit)
    }

    fn qpush_front(&self, name: &str, item: &str) -> Result<u64> {
        (**self).qpush_front(name, item)
    }

    fn qpush_back(&self, name: &str, item: &str) -> Result<u64> {
        (**self).qpush_back(name, item)
    }

    fn qpop_front(&self, name: &str, count: usize) -> Result<Vec<String>> {
        (**self).qpop_front(name, count)
    }

    fn qpop_back(&self, name: &str, count: usize) -> Result<Vec<String>> {
        (**self).qpop_back(name, count)
    }

    fn qsize(&self, name: &str) -> Result<u64> {
        (**self).qsize(name)
    }
}
