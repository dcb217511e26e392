//! In-process store.
//!
//! Every structure lives in its own `DashMap` keyed by name, so each
//! single-key operation runs under that key's shard lock and is atomic with
//! respect to every other operation on the same key. Scalar TTLs are checked
//! lazily on access; there is no background reaper.
//!
//! Sorted sets keep two indexes, member -> score for point lookups and an
//! ordered (score, member) set for range scans.

use crate::backend::{StoreBackend, Ttl};
use crate::error::{Result, StoreError};
use corelib::{Clock, SystemClock};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    /// Absolute unix second after which the entry is gone.
    expires_at: Option<u64>,
}

impl Entry {
    fn new(value: &str, ttl: u64, now: u64) -> Self {
        Self {
            value: value.to_string(),
            expires_at: (ttl > 0).then(|| now + ttl),
        }
    }

    #[inline]
    fn is_live(&self, now: u64) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Sorted set with O(log n) rank walks.
#[derive(Debug, Clone, Default)]
struct ZSet {
    scores: HashMap<String, i64>,
    by_score: BTreeSet<(i64, String)>,
}

impl ZSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.by_score.remove(&(old, member.to_string()));
        }
        self.by_score.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(old) => {
                self.by_score.remove(&(old, member.to_string()));
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.scores.len()
    }

    fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    fn scan(
        &self,
        member_start: &str,
        score_start: Option<i64>,
        score_end: Option<i64>,
        limit: usize,
    ) -> Vec<(String, i64)> {
        let lower = match score_start {
            None => Bound::Unbounded,
            // "" sorts before every member, so this includes the whole score.
            Some(score) if member_start.is_empty() => Bound::Included((score, String::new())),
            Some(score) => Bound::Excluded((score, member_start.to_string())),
        };

        self.by_score
            .range((lower, Bound::Unbounded))
            .take_while(|(score, _)| score_end.map_or(true, |end| *score <= end))
            .take(limit)
            .map(|(score, member)| (member.clone(), *score))
            .collect()
    }
}

/// In-process implementation of [`StoreBackend`].
#[derive(Debug)]
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    kv: DashMap<String, Entry>,
    hashes: DashMap<String, BTreeMap<String, String>>,
    zsets: DashMap<String, ZSet>,
    queues: DashMap<String, VecDeque<String>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            kv: DashMap::new(),
            hashes: DashMap::new(),
            zsets: DashMap::new(),
            queues: DashMap::new(),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every operation fail as if the server were unreachable.
    ///
    /// Used to exercise the availability handling of the layers above.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live scalar keys.
    pub fn key_count(&self) -> usize {
        let now = self.clock.now();
        self.kv.iter().filter(|e| e.value().is_live(now)).count()
    }

    #[inline]
    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "memory store is offline",
            )));
        }
        Ok(())
    }

    fn parse_int(key: &str, value: &str) -> Result<i64> {
        value
            .parse::<i64>()
            .map_err(|_| StoreError::NotInteger(key.to_string()))
    }

    fn add(key: &str, current: i64, delta: i64) -> Result<i64> {
        current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Overflow(key.to_string()))
    }

    fn pop(&self, name: &str, count: usize, front: bool) -> Result<Vec<String>> {
        self.check()?;
        let items = match self.queues.get_mut(name) {
            Some(mut queue) => {
                let n = count.min(queue.len());
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    let item = if front {
                        queue.pop_front()
                    } else {
                        queue.pop_back()
                    };
                    items.extend(item);
                }
                items
            }
            None => return Ok(Vec::new()),
        };
        self.queues.remove_if(name, |_, q| q.is_empty());
        Ok(items)
    }

    fn push(&self, name: &str, item: &str, front: bool) -> Result<u64> {
        self.check()?;
        let mut queue = self.queues.entry(name.to_string()).or_default();
        if front {
            queue.push_front(item.to_string());
        } else {
            queue.push_back(item.to_string());
        }
        Ok(queue.len() as u64)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBackend for MemoryStore {
    fn ping(&self) -> Result<()> {
        self.check()
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let now = self.clock.now();
        if let Some(entry) = self.kv.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }
        self.kv.remove_if(key, |_, e| !e.is_live(now));
        Ok(None)
    }

    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        self.check()?;
        let now = self.clock.now();
        self.kv.insert(key.to_string(), Entry::new(value, ttl, now));
        Ok(())
    }

    fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool> {
        self.check()?;
        let now = self.clock.now();
        match self.kv.entry(key.to_string()) {
            MapEntry::Occupied(mut e) => {
                if e.get().is_live(now) {
                    return Ok(false);
                }
                e.insert(Entry::new(value, ttl, now));
                Ok(true)
            }
            MapEntry::Vacant(e) => {
                e.insert(Entry::new(value, ttl, now));
                Ok(true)
            }
        }
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        let now = self.clock.now();
        Ok(self
            .kv
            .remove(key)
            .map_or(false, |(_, entry)| entry.is_live(now)))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn expire(&self, key: &str, ttl: u64) -> Result<bool> {
        self.check()?;
        let now = self.clock.now();
        match self.kv.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = (ttl > 0).then(|| now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn ttl(&self, key: &str) -> Result<Ttl> {
        self.check()?;
        let now = self.clock.now();
        Ok(match self.kv.get(key) {
            Some(entry) if entry.is_live(now) => match entry.expires_at {
                Some(at) => Ttl::Expires(at - now),
                None => Ttl::Persistent,
            },
            _ => Ttl::Missing,
        })
    }

    fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        self.check()?;
        let now = self.clock.now();
        match self.kv.entry(key.to_string()) {
            MapEntry::Occupied(mut e) => {
                let next = if e.get().is_live(now) {
                    let current = Self::parse_int(key, &e.get().value)?;
                    Self::add(key, current, delta)?
                } else {
                    e.get_mut().expires_at = None;
                    delta
                };
                e.get_mut().value = next.to_string();
                Ok(next)
            }
            MapEntry::Vacant(e) => {
                e.insert(Entry::new(&delta.to_string(), 0, now));
                Ok(delta)
            }
        }
    }

    fn hset(&self, name: &str, field: &str, value: &str) -> Result<()> {
        self.check()?;
        self.hashes
            .entry(name.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hget(&self, name: &str, field: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self
            .hashes
            .get(name)
            .and_then(|hash| hash.get(field).cloned()))
    }

    fn hdel(&self, name: &str, field: &str) -> Result<bool> {
        self.check()?;
        let removed = match self.hashes.get_mut(name) {
            Some(mut hash) => hash.remove(field).is_some(),
            None => false,
        };
        self.hashes.remove_if(name, |_, h| h.is_empty());
        Ok(removed)
    }

    fn hincr(&self, name: &str, field: &str, delta: i64) -> Result<i64> {
        self.check()?;
        let mut hash = self.hashes.entry(name.to_string()).or_default();
        let current = match hash.get(field) {
            Some(value) => Self::parse_int(field, value)?,
            None => 0,
        };
        let next = Self::add(field, current, delta)?;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    fn hexists(&self, name: &str, field: &str) -> Result<bool> {
        Ok(self.hget(name, field)?.is_some())
    }

    fn hsize(&self, name: &str) -> Result<u64> {
        self.check()?;
        Ok(self.hashes.get(name).map_or(0, |h| h.len() as u64))
    }

    fn hgetall(&self, name: &str) -> Result<Vec<(String, String)>> {
        self.check()?;
        Ok(self.hashes.get(name).map_or_else(Vec::new, |hash| {
            hash.iter()
                .map(|(f, v)| (f.clone(), v.clone()))
                .collect()
        }))
    }

    fn hscan(
        &self,
        name: &str,
        field_start: &str,
        field_end: &str,
        limit: usize,
    ) -> Result<Vec<(String, String)>> {
        self.check()?;
        if !field_start.is_empty() && !field_end.is_empty() && field_start >= field_end {
            return Ok(Vec::new());
        }
        let lower = if field_start.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(field_start)
        };
        let upper = if field_end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(field_end)
        };

        Ok(self.hashes.get(name).map_or_else(Vec::new, |hash| {
            hash.range::<str, _>((lower, upper))
                .take(limit)
                .map(|(f, v)| (f.clone(), v.clone()))
                .collect()
        }))
    }

    fn hclear(&self, name: &str) -> Result<u64> {
        self.check()?;
        Ok(self
            .hashes
            .remove(name)
            .map_or(0, |(_, hash)| hash.len() as u64))
    }

    fn zset(&self, name: &str, member: &str, score: i64) -> Result<()> {
        self.check()?;
        self.zsets
            .entry(name.to_string())
            .or_default()
            .insert(member, score);
        Ok(())
    }

    fn zget(&self, name: &str, member: &str) -> Result<Option<i64>> {
        self.check()?;
        Ok(self
            .zsets
            .get(name)
            .and_then(|zset| zset.scores.get(member).copied()))
    }

    fn zdel(&self, name: &str, member: &str) -> Result<bool> {
        self.check()?;
        let removed = match self.zsets.get_mut(name) {
            Some(mut zset) => zset.remove(member),
            None => false,
        };
        self.zsets.remove_if(name, |_, z| z.is_empty());
        Ok(removed)
    }

    fn zincr(&self, name: &str, member: &str, delta: i64) -> Result<i64> {
        self.check()?;
        let mut zset = self.zsets.entry(name.to_string()).or_default();
        let current = zset.scores.get(member).copied().unwrap_or(0);
        let next = Self::add(member, current, delta)?;
        zset.insert(member, next);
        Ok(next)
    }

    fn zsize(&self, name: &str) -> Result<u64> {
        self.check()?;
        Ok(self.zsets.get(name).map_or(0, |z| z.len() as u64))
    }

    fn zrange(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<(String, i64)>> {
        self.check()?;
        Ok(self.zsets.get(name).map_or_else(Vec::new, |zset| {
            zset.by_score
                .iter()
                .skip(offset)
                .take(limit)
                .map(|(score, member)| (member.clone(), *score))
                .collect()
        }))
    }

    fn zrrange(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<(String, i64)>> {
        self.check()?;
        Ok(self.zsets.get(name).map_or_else(Vec::new, |zset| {
            zset.by_score
                .iter()
                .rev()
                .skip(offset)
                .take(limit)
                .map(|(score, member)| (member.clone(), *score))
                .collect()
        }))
    }

    fn zscan(
        &self,
        name: &str,
        member_start: &str,
        score_start: Option<i64>,
        score_end: Option<i64>,
        limit: usize,
    ) -> Result<Vec<(String, i64)>> {
        self.check()?;
        Ok(self.zsets.get(name).map_or_else(Vec::new, |zset| {
            zset.scan(member_start, score_start, score_end, limit)
        }))
    }

    fn qpush_front(&self, name: &str, item: &str) -> Result<u64> {
        self.push(name, item, true)
    }

    fn qpush_back(&self, name: &str, item: &str) -> Result<u64> {
        self.push(name, item, false)
    }

    fn qpop_front(&self, name: &str, count: usize) -> Result<Vec<String>> {
        self.pop(name, count, true)
    }

    fn qpop_back(&self, name: &str, count: usize) -> Result<Vec<String>> {
        self.pop(name, count, false)
    }

    fn qsize(&self, name: &str) -> Result<u64> {
        self.check()?;
        Ok(self.queues.get(name).map_or(0, |q| q.len() as u64))
    }
}
