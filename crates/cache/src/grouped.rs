//! Generation-stamped cache groups.
//!
//! Each group has a counter, its *generation*, stored under its own key.
//! Entries are written under a physical key that embeds the generation read
//! when the group handle was taken:
//!
//! ```text
//!   group("users")      reads  cache_ver_users = 3
//!   .set("42", v)       writes 3:users:42
//!   .clear()            cache_ver_users = 4
//!   group("users")      reads 4; 3:users:42 is now unreachable
//! ```
//!
//! Clearing a group is therefore one increment, no matter how many entries
//! it holds. Old entries are never deleted; they age out through their TTL.

use crate::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::keys::KeyLayout;
use crate::limiter;
use corelib::{Clock, SystemClock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of [`CacheGroup::fetch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch<T> {
    /// The entry was cached.
    Hit(T),
    /// This caller computed and stored the entry.
    Computed(T),
    /// Another caller is computing it; back off and read again.
    Contended,
}

impl<T> Fetch<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Fetch::Hit(v) | Fetch::Computed(v) => Some(v),
            Fetch::Contended => None,
        }
    }
}

/// Grouped cache over one [`CacheBackend`].
pub struct GroupedCache {
    backend: Box<dyn CacheBackend>,
    keys: KeyLayout,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for GroupedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupedCache")
            .field("backend", &self.backend.name())
            .field("keys", &self.keys)
            .finish()
    }
}

impl GroupedCache {
    pub fn new(backend: impl CacheBackend + 'static, config: CacheConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        backend: impl CacheBackend + 'static,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend: Box::new(backend),
            keys: config.key_layout(),
            config,
            clock,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn keys(&self) -> &KeyLayout {
        &self.keys
    }

    /// A handle on `name` at its current generation.
    ///
    /// The generation is read from the backend on every call, so a handle
    /// taken after another process cleared the group sees the new one.
    pub fn group(&self, name: &str) -> Result<CacheGroup<'_>> {
        let generation = self.generation(name)?;
        Ok(CacheGroup {
            cache: self,
            name: name.to_string(),
            generation,
        })
    }

    /// The configured default group.
    pub fn default_group(&self) -> Result<CacheGroup<'_>> {
        self.group(&self.config.default_group)
    }

    /// Current generation of `name`; a group never cleared is at 0.
    pub fn generation(&self, name: &str) -> Result<u64> {
        let key = self.keys.generation(name);
        Ok(match self.backend.get(&key)? {
            None => 0,
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(n) if n >= 0 => n as u64,
                _ => {
                    warn!(key = %key, value = %raw, "ignoring malformed generation");
                    0
                }
            },
        })
    }

    /// Invalidate every entry in `name`. Returns the new generation.
    pub fn clear(&self, name: &str) -> Result<u64> {
        let key = self.keys.generation(name);
        let next = match self.backend.incr(&key, 1) {
            Ok(n) if n > 0 && n <= self.config.max_generation => return Ok(n as u64),
            Ok(n) => n.to_string(),
            Err(e) if e.is_overflow() => "overflow".to_string(),
            Err(e) => return Err(e),
        };
        warn!(key = %key, reached = %next, "generation counter reset");
        self.backend.set(&key, "1", 0)?;
        Ok(1)
    }

    /// Take the lock `id` for `ttl` seconds (`0` = configured lock TTL).
    /// Never blocks: returns `false` if someone else holds it.
    pub fn lock(&self, id: &str, ttl: u64) -> Result<bool> {
        let ttl = if ttl == 0 { self.config.lock_ttl } else { ttl };
        let acquired = self.backend.set_nx(&self.keys.lock(id), "1", ttl)?;
        if !acquired {
            debug!(lock = id, "lock contended");
        }
        Ok(acquired)
    }

    /// Release `id`. Returns whether it was held.
    pub fn unlock(&self, id: &str) -> Result<bool> {
        self.backend.delete(&self.keys.lock(id))
    }

    /// Count one `action` by `actor` against a fixed window of `period`
    /// seconds. Returns `false` once more than `max_count` actions fall in
    /// the current window.
    ///
    /// The increment and the TTL are two calls; a crash between them leaves
    /// a counter without TTL whose key names an already-closed window, so it
    /// is never consulted again.
    pub fn act_limit(&self, actor: &str, action: &str, max_count: u64, period: u64) -> Result<bool> {
        if period == 0 {
            return Err(CacheError::Config("act_limit period must be positive".into()));
        }
        let now = self.clock.now();
        let key = self
            .keys
            .limit(actor, action, limiter::window_end(now, period));

        let count = self.backend.incr(&key, 1)?;
        if count == 1 {
            self.backend
                .expire(&key, limiter::window_remaining(now, period))?;
        }
        let allowed = count > 0 && count as u64 <= max_count;
        if !allowed {
            debug!(actor, action, count, "action limited");
        }
        Ok(allowed)
    }

    fn ttl_or_default(&self, ttl: u64) -> u64 {
        if ttl == 0 {
            self.config.default_ttl
        } else {
            ttl
        }
    }

    // Shortcuts on the default group.

    pub fn get<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        self.default_group()?.get(id)
    }

    pub fn set<T: Serialize + ?Sized>(&self, id: &str, value: &T, ttl: u64) -> Result<()> {
        self.default_group()?.set(id, value, ttl)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        self.default_group()?.delete(id)
    }
}

/// A cache group pinned at the generation read when it was taken.
#[derive(Debug)]
pub struct CacheGroup<'a> {
    cache: &'a GroupedCache,
    name: String,
    generation: u64,
}

impl<'a> CacheGroup<'a> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn key(&self, id: &str) -> String {
        self.cache.keys.entry(&self.name, self.generation, id)
    }

    /// Read an entry. An undecodable value is logged and reported as a miss.
    pub fn get<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        let key = self.key(id);
        let raw = match self.cache.backend.get(&key)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %key, error = %e, "discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, id: &str, default: T) -> Result<T> {
        Ok(self.get(id)?.unwrap_or(default))
    }

    /// Store `value` as JSON. `ttl = 0` applies the default TTL.
    pub fn set<T: Serialize + ?Sized>(&self, id: &str, value: &T, ttl: u64) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.cache
            .backend
            .set(&self.key(id), &raw, self.cache.ttl_or_default(ttl))
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        self.cache.backend.delete(&self.key(id))
    }

    /// Bump the group's generation. This handle keeps its old generation;
    /// take a new one with [`GroupedCache::group`] to see the cleared group.
    pub fn clear(&self) -> Result<u64> {
        self.cache.clear(&self.name)
    }

    /// Read-through with stampede protection.
    ///
    /// On a miss, only the caller that wins the per-entry lock runs
    /// `compute`; the others get [`Fetch::Contended`] immediately.
    pub fn fetch<T, F>(&self, id: &str, ttl: u64, compute: F) -> Result<Fetch<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get(id)? {
            return Ok(Fetch::Hit(value));
        }

        let lock_id = format!("{}{}{}", self.name, self.cache.config.separator, id);
        if !self.cache.lock(&lock_id, 0)? {
            return Ok(Fetch::Contended);
        }

        let value = compute();
        let stored = self.set(id, &value, ttl);
        self.cache.unlock(&lock_id)?;
        stored?;
        Ok(Fetch::Computed(value))
    }
}
