//! Delayed queue on a hash plus a sorted-set index.
//!
//! # Layout
//!
//! ```text
//!   delay_queue_seq                 counter     item ids
//!   delay_queue:{name}:items        hash        id -> payload
//!   delay_queue:{name}:due          zset        id, score = due time
//!   lock_delay_queue:{name}:due     scalar      drain lock, with TTL
//!   delay_queue:registry            zset        name, score = backlog
//! ```
//!
//! Ids are zero-padded to 20 digits so that members with equal due times
//! sort by id, i.e. in push order.
//!
//! # Delivery
//!
//! A drain reads each due payload, hands it on, then removes the due entry
//! and finally the payload. A crash after the hand-off delivers the item
//! again on a later drain; a crash between the two removals leaves an orphan
//! payload that [`DelayedQueue::recover`] puts back on the index. Items are
//! therefore delivered at least once, never silently lost.

use crate::config::QueueConfig;
use crate::distributed::decode_all;
use crate::error::Result;
use corelib::{Clock, SystemClock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use store::{StoreBackend, StoreError};
use tracing::{debug, info, warn};

const SEQUENCE_KEY: &str = "delay_queue_seq";
const REGISTRY_KEY: &str = "delay_queue:registry";

fn items_key(name: &str) -> String {
    format!("delay_queue:{{{}}}:items", name)
}

fn due_key(name: &str) -> String {
    format!("delay_queue:{{{}}}:due", name)
}

fn lock_key(name: &str) -> String {
    format!("lock_delay_queue:{{{}}}:due", name)
}

fn member(id: u64) -> String {
    format!("{:020}", id)
}

/// One queue in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueInfo {
    pub name: String,
    pub backlog_size: u64,
}

/// A page of [`DelayedQueue::list_queues`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuePage {
    /// Number of registered queues.
    pub total: u64,
    /// 1-based page number actually served.
    pub page: usize,
    pub list: Vec<QueueInfo>,
}

pub struct DelayedQueue<S> {
    store: S,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
}

impl<S> std::fmt::Debug for DelayedQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedQueue")
            .field("config", &self.config)
            .finish()
    }
}

impl<S: StoreBackend> DelayedQueue<S> {
    pub fn new(store: S, config: QueueConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Schedule `payload` for `delay` seconds from now. A delay of zero or
    /// less becomes the configured minimum. Returns the item id.
    pub fn push<T: Serialize + ?Sized>(&self, name: &str, payload: &T, delay: i64) -> Result<u64> {
        let raw = serde_json::to_string(payload)?;
        let id = self.next_id()?;
        let delay = if delay <= 0 { self.config.min_delay } else { delay };
        let due_at = (self.clock.now() as i64).saturating_add(delay);
        let member = member(id);

        // Payload before index: a crash in between leaves an orphan that
        // recover() re-indexes, never an index entry without a payload.
        self.store.hset(&items_key(name), &member, &raw)?;
        self.store.zset(&due_key(name), &member, due_at)?;
        self.store.zincr(REGISTRY_KEY, name, 1)?;

        debug!(queue = name, id, due_at, "scheduled");
        Ok(id)
    }

    /// Remove up to `count` due payloads, oldest due time first.
    ///
    /// Returns an empty list when nothing is due, when the queue has no
    /// backlog, or when another caller is draining it right now.
    pub fn pop<T: DeserializeOwned>(&self, name: &str, count: usize) -> Result<Vec<T>> {
        let mut raw = Vec::new();
        self.drain(name, count, |payload| {
            raw.push(payload.to_string());
            Ok(())
        })?;
        Ok(decode_all(name, raw))
    }

    /// Move up to `count` due payloads onto the plain queue `name`, verbatim.
    /// Returns how many were moved.
    pub fn promote_to_live_queue(&self, name: &str, count: usize) -> Result<usize> {
        let moved = self.drain(name, count, |payload| {
            self.store.qpush_back(name, payload)?;
            Ok(())
        })?;
        if moved > 0 {
            debug!(queue = name, moved, "promoted");
        }
        Ok(moved)
    }

    /// Items scheduled and not yet drained.
    pub fn size(&self, name: &str) -> Result<u64> {
        Ok(self.store.zsize(&due_key(name))?)
    }

    /// Re-index payloads that have no due entry, as due now. Returns how many
    /// were recovered, or 0 if the queue is being drained.
    pub fn recover(&self, name: &str) -> Result<usize> {
        self.with_lock(name, || {
            let now = self.clock.now() as i64;
            let due = due_key(name);
            let mut recovered = 0;
            for (member, _) in self.store.hgetall(&items_key(name))? {
                if self.store.zget(&due, &member)?.is_none() {
                    self.store.zset(&due, &member, now)?;
                    recovered += 1;
                }
            }
            self.sync_backlog(name)?;
            if recovered > 0 {
                info!(queue = name, recovered, "re-indexed orphaned items");
            }
            Ok(recovered)
        })
        .map(|r| r.unwrap_or(0))
    }

    /// Registered queues by backlog, largest first. Pages are 1-based; page
    /// 0 is read as 1.
    pub fn list_queues(&self, page: usize, page_size: usize) -> Result<QueuePage> {
        let page = page.max(1);
        let total = self.store.zsize(REGISTRY_KEY)?;
        let empty = |total| QueuePage {
            total,
            page,
            list: Vec::new(),
        };

        let total_items = usize::try_from(total).unwrap_or(usize::MAX);
        if page_size == 0 || page > total_items.div_ceil(page_size) {
            return Ok(empty(total));
        }

        // page <= max_page, so the offset lies inside the registry.
        let offset = (page - 1) * page_size;
        let len = page_size.min(total_items - offset);

        // Past the midpoint, walk from the cheap end and flip.
        let entries = if offset > total_items / 2 {
            let mut entries = self
                .store
                .zrange(REGISTRY_KEY, total_items - offset - len, len)?;
            entries.reverse();
            entries
        } else {
            self.store.zrrange(REGISTRY_KEY, offset, len)?
        };

        Ok(QueuePage {
            total,
            page,
            list: entries
                .into_iter()
                .map(|(name, backlog)| QueueInfo {
                    name,
                    backlog_size: backlog.max(0) as u64,
                })
                .collect(),
        })
    }

    fn next_id(&self) -> Result<u64> {
        let reached = match self.store.incr(SEQUENCE_KEY, 1) {
            Ok(id) if id > 0 && id < self.config.max_sequence => return Ok(id as u64),
            Ok(id) => id.to_string(),
            Err(StoreError::Overflow(_)) => "overflow".to_string(),
            Err(e) => return Err(e.into()),
        };
        warn!(reached = %reached, "item sequence reseeded");
        self.store.set(SEQUENCE_KEY, "1", 0)?;
        Ok(1)
    }

    /// Run `f` holding the drain lock. `None` if the lock is held elsewhere.
    /// The lock is released whatever `f` returns.
    fn with_lock<R>(&self, name: &str, f: impl FnOnce() -> Result<R>) -> Result<Option<R>> {
        let lock = lock_key(name);
        if !self.store.set_nx(&lock, "1", self.config.lock_ttl)? {
            debug!(queue = name, "drain already in progress");
            return Ok(None);
        }
        let result = f();
        // The TTL frees a lock whose release failed; what `f` did still counts.
        if let Err(e) = self.store.delete(&lock) {
            warn!(queue = name, error = %e, "failed to release drain lock");
        }
        result.map(Some)
    }

    /// Hand up to `count` due payloads to `sink`, then remove them.
    ///
    /// Once something has reached the sink, a store failure ends the drain
    /// early instead of failing it: the caller keeps what it was given and
    /// the rest stays queued.
    fn drain<F>(&self, name: &str, count: usize, mut sink: F) -> Result<usize>
    where
        F: FnMut(&str) -> Result<()>,
    {
        if count == 0 {
            return Ok(0);
        }
        let backlog = self.store.zget(REGISTRY_KEY, name)?.unwrap_or(0);
        if backlog <= 0 {
            return Ok(0);
        }

        let drained = self.with_lock(name, || {
            let now = self.clock.now() as i64;
            let mut drained = 0;
            for (member, _) in self.store.zscan(&due_key(name), "", None, Some(now), count)? {
                if let Err(e) = self.drain_item(name, &member, &mut sink, &mut drained) {
                    if drained == 0 {
                        return Err(e);
                    }
                    warn!(queue = name, id = %member, error = %e, drained, "drain cut short");
                    break;
                }
            }
            match self.sync_backlog(name) {
                Err(e) if drained == 0 => return Err(e),
                Err(e) => warn!(queue = name, error = %e, "backlog not updated"),
                Ok(()) => {}
            }
            Ok(drained)
        })?;
        Ok(drained.unwrap_or(0))
    }

    /// Read, hand off, then unindex and delete one item. `drained` counts
    /// hand-offs, so it is accurate even when a later step fails.
    fn drain_item<F>(&self, name: &str, member: &str, sink: &mut F, drained: &mut usize) -> Result<()>
    where
        F: FnMut(&str) -> Result<()>,
    {
        match self.store.hget(&items_key(name), member)? {
            Some(payload) => {
                sink(&payload)?;
                *drained += 1;
            }
            None => warn!(queue = name, id = %member, "due entry without payload"),
        }
        self.store.zdel(&due_key(name), member)?;
        self.store.hdel(&items_key(name), member)?;
        Ok(())
    }

    /// Reset the registry score to the true index size.
    fn sync_backlog(&self, name: &str) -> Result<()> {
        let remaining = self.store.zsize(&due_key(name))?;
        self.store
            .zset(REGISTRY_KEY, name, remaining.min(i64::MAX as u64) as i64)?;
        Ok(())
    }
}
