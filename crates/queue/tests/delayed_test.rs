//! Tests for the delayed queue.
//!
//! Time is driven by a `ManualClock`; crashes are simulated by editing the
//! queue's structures directly through the store.

use corelib::{ManualClock, RingBuilder};
use queue::{DelayedQueue, DistributedQueue, QueueConfig, QueueError, QueueInfo};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use store::{MemoryStore, ShardedStore, StoreBackend, StoreError, Ttl};

const T0: u64 = 1_000_000;

fn delayed(config: QueueConfig) -> (Arc<ManualClock>, DelayedQueue<Arc<MemoryStore>>) {
    let clock = Arc::new(ManualClock::new(T0));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    (clock.clone(), DelayedQueue::with_clock(store, config, clock))
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_due_order_not_push_order() {
    let (clock, queue) = delayed(QueueConfig::default());
    queue.push("mail", "five", 5).unwrap();
    queue.push("mail", "one", 1).unwrap();
    queue.push("mail", "three", 3).unwrap();

    assert!(queue.pop::<String>("mail", 10).unwrap().is_empty());

    clock.advance(1);
    assert_eq!(queue.pop::<String>("mail", 10).unwrap(), ["one"]);
    clock.advance(4);
    assert_eq!(queue.pop::<String>("mail", 10).unwrap(), ["three", "five"]);
    assert_eq!(queue.size("mail").unwrap(), 0);
}

#[test]
fn test_same_second_items_drain_in_push_order() {
    let (clock, queue) = delayed(QueueConfig::default());
    // Crosses 9 -> 10 -> 11 ids, where unpadded ids would sort wrongly.
    for i in 0..25u32 {
        queue.push("mail", &i, 30).unwrap();
    }
    clock.advance(30);

    let first: Vec<u32> = queue.pop("mail", 12).unwrap();
    let rest: Vec<u32> = queue.pop("mail", 100).unwrap();
    assert_eq!(first, (0..12).collect::<Vec<_>>());
    assert_eq!(rest, (12..25).collect::<Vec<_>>());
}

#[test]
fn test_zero_delay_coerced_to_minimum() {
    let (clock, queue) = delayed(QueueConfig::default());
    for i in 0..5u32 {
        queue.push("mail", &i, 0).unwrap();
    }
    assert_eq!(queue.size("mail").unwrap(), 5);

    // Not due immediately.
    assert!(queue.pop::<u32>("mail", 10).unwrap().is_empty());
    clock.advance(9);
    assert!(queue.pop::<u32>("mail", 10).unwrap().is_empty());
    assert_eq!(queue.size("mail").unwrap(), 5);

    clock.advance(1);
    assert_eq!(queue.pop::<u32>("mail", 10).unwrap(), [0, 1, 2, 3, 4]);
    assert_eq!(queue.size("mail").unwrap(), 0);

    let page = queue.list_queues(1, 10).unwrap();
    assert_eq!(
        page.list,
        vec![QueueInfo {
            name: "mail".into(),
            backlog_size: 0
        }]
    );
}

#[test]
fn test_negative_delay_coerced_to_minimum() {
    let (clock, queue) = delayed(QueueConfig::default());
    queue.push("mail", "late", -5).unwrap();
    clock.advance(9);
    assert!(queue.pop::<String>("mail", 10).unwrap().is_empty());
    clock.advance(1);
    assert_eq!(queue.pop::<String>("mail", 10).unwrap(), ["late"]);
}

// ============================================================================
// Delivery guarantees
// ============================================================================

#[test]
fn test_orphan_payload_recovered_after_crash() {
    let (clock, queue) = delayed(QueueConfig::default());
    let id = queue.push("mail", "important", 1).unwrap();
    clock.advance(1);

    // Crash after removing the due entry, before removing the payload.
    let member = format!("{:020}", id);
    assert!(queue.store().zdel("delay_queue:{mail}:due", &member).unwrap());

    assert!(queue.pop::<String>("mail", 10).unwrap().is_empty());
    assert_eq!(queue.recover("mail").unwrap(), 1);
    assert_eq!(queue.pop::<String>("mail", 10).unwrap(), ["important"]);
    assert_eq!(queue.recover("mail").unwrap(), 0);
}

#[test]
fn test_payload_without_index_recovered() {
    let (_, queue) = delayed(QueueConfig::default());
    // Crash during push, after the payload write.
    queue
        .store()
        .hset("delay_queue:{mail}:items", &format!("{:020}", 99), "\"late\"")
        .unwrap();

    assert_eq!(queue.recover("mail").unwrap(), 1);
    assert_eq!(queue.size("mail").unwrap(), 1);
    assert_eq!(queue.pop::<String>("mail", 10).unwrap(), ["late"]);
}

#[test]
fn test_held_lock_returns_empty_without_waiting() {
    let (clock, queue) = delayed(QueueConfig::default());
    queue.push("mail", "a", 1).unwrap();
    clock.advance(1);

    let lock = "lock_delay_queue:{mail}:due";
    assert!(queue.store().set_nx(lock, "other", 60).unwrap());
    assert!(queue.pop::<String>("mail", 10).unwrap().is_empty());
    assert_eq!(queue.recover("mail").unwrap(), 0);
    assert_eq!(queue.size("mail").unwrap(), 1);

    // A crashed holder's lock runs out.
    clock.advance(60);
    assert_eq!(queue.pop::<String>("mail", 10).unwrap(), ["a"]);
    assert!(!queue.store().exists(lock).unwrap());
}

#[test]
fn test_empty_backlog_short_circuits() {
    let (_, queue) = delayed(QueueConfig::default());
    assert!(queue.pop::<String>("nobody", 10).unwrap().is_empty());
    // No lock was taken.
    assert_eq!(queue.store().key_count(), 0);
}

#[test]
fn test_undecodable_payload_dropped() {
    let (clock, queue) = delayed(QueueConfig::default());
    queue.push("mail", "text", 1).unwrap();
    queue.push("mail", &7u32, 1).unwrap();
    clock.advance(1);

    assert_eq!(queue.pop::<u32>("mail", 10).unwrap(), [7]);
    assert_eq!(queue.size("mail").unwrap(), 0);
}

/// A store whose `n`th `hget` (or `qpush_back`) fails, counting from 1.
/// Everything else goes straight to the inner store.
struct FailingStore {
    inner: Arc<MemoryStore>,
    fail_hget: usize,
    fail_push: usize,
    hgets: AtomicUsize,
    pushes: AtomicUsize,
}

impl FailingStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_hget: 0,
            fail_push: 0,
            hgets: AtomicUsize::new(0),
            pushes: AtomicUsize::new(0),
        }
    }

    fn trip(counter: &AtomicUsize, at: usize) -> store::Result<()> {
        if counter.fetch_add(1, Ordering::SeqCst) + 1 == at {
            return Err(StoreError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset")));
        }
        Ok(())
    }
}

impl StoreBackend for FailingStore {
    fn ping(&self) -> store::Result<()> {
        self.inner.ping()
    }
    fn get(&self, key: &str) -> store::Result<Option<String>> {
        self.inner.get(key)
    }
    fn set(&self, key: &str, value: &str, ttl: u64) -> store::Result<()> {
        self.inner.set(key, value, ttl)
    }
    fn set_nx(&self, key: &str, value: &str, ttl: u64) -> store::Result<bool> {
        self.inner.set_nx(key, value, ttl)
    }
    fn delete(&self, key: &str) -> store::Result<bool> {
        self.inner.delete(key)
    }
    fn exists(&self, key: &str) -> store::Result<bool> {
        self.inner.exists(key)
    }
    fn expire(&self, key: &str, ttl: u64) -> store::Result<bool> {
        self.inner.expire(key, ttl)
    }
    fn ttl(&self, key: &str) -> store::Result<Ttl> {
        self.inner.ttl(key)
    }
    fn incr(&self, key: &str, delta: i64) -> store::Result<i64> {
        self.inner.incr(key, delta)
    }
    fn hset(&self, name: &str, field: &str, value: &str) -> store::Result<()> {
        self.inner.hset(name, field, value)
    }
    fn hget(&self, name: &str, field: &str) -> store::Result<Option<String>> {
        Self::trip(&self.hgets, self.fail_hget)?;
        self.inner.hget(name, field)
    }
    fn hdel(&self, name: &str, field: &str) -> store::Result<bool> {
        self.inner.hdel(name, field)
    }
    fn hincr(&self, name: &str, field: &str, delta: i64) -> store::Result<i64> {
        self.inner.hincr(name, field, delta)
    }
    fn hexists(&self, name: &str, field: &str) -> store::Result<bool> {
        self.inner.hexists(name, field)
    }
    fn hsize(&self, name: &str) -> store::Result<u64> {
        self.inner.hsize(name)
    }
    fn hgetall(&self, name: &str) -> store::Result<Vec<(String, String)>> {
        self.inner.hgetall(name)
    }
    fn hscan(&self, name: &str, start: &str, end: &str, limit: usize) -> store::Result<Vec<(String, String)>> {
        self.inner.hscan(name, start, end, limit)
    }
    fn hclear(&self, name: &str) -> store::Result<u64> {
        self.inner.hclear(name)
    }
    fn zset(&self, name: &str, member: &str, score: i64) -> store::Result<()> {
        self.inner.zset(name, member, score)
    }
    fn zget(&self, name: &str, member: &str) -> store::Result<Option<i64>> {
        self.inner.zget(name, member)
    }
    fn zdel(&self, name: &str, member: &str) -> store::Result<bool> {
        self.inner.zdel(name, member)
    }
    fn zincr(&self, name: &str, member: &str, delta: i64) -> store::Result<i64> {
        self.inner.zincr(name, member, delta)
    }
    fn zsize(&self, name: &str) -> store::Result<u64> {
        self.inner.zsize(name)
    }
    fn zrange(&self, name: &str, offset: usize, limit: usize) -> store::Result<Vec<(String, i64)>> {
        self.inner.zrange(name, offset, limit)
    }
    fn zrrange(&self, name: &str, offset: usize, limit: usize) -> store::Result<Vec<(String, i64)>> {
        self.inner.zrrange(name, offset, limit)
    }
    fn zscan(
        &self,
        name: &str,
        member_start: &str,
        score_start: Option<i64>,
        score_end: Option<i64>,
        limit: usize,
    ) -> store::Result<Vec<(String, i64)>> {
        self.inner.zscan(name, member_start, score_start, score_end, limit)
    }
    fn qpush_front(&self, name: &str, item: &str) -> store::Result<u64> {
        self.inner.qpush_front(name, item)
    }
    fn qpush_back(&self, name: &str, item: &str) -> store::Result<u64> {
        Self::trip(&self.pushes, self.fail_push)?;
        self.inner.qpush_back(name, item)
    }
    fn qpop_front(&self, name: &str, count: usize) -> store::Result<Vec<String>> {
        self.inner.qpop_front(name, count)
    }
    fn qpop_back(&self, name: &str, count: usize) -> store::Result<Vec<String>> {
        self.inner.qpop_back(name, count)
    }
    fn qsize(&self, name: &str) -> store::Result<u64> {
        self.inner.qsize(name)
    }
}

fn failing(store: FailingStore, clock: Arc<ManualClock>) -> DelayedQueue<FailingStore> {
    DelayedQueue::with_clock(store, QueueConfig::default(), clock)
}

#[test]
fn test_failure_mid_pop_keeps_drained_items() {
    let clock = Arc::new(ManualClock::new(T0));
    let inner = Arc::new(MemoryStore::with_clock(clock.clone()));
    let queue = failing(
        FailingStore {
            fail_hget: 2,
            ..FailingStore::new(Arc::clone(&inner))
        },
        clock.clone(),
    );
    queue.push("mail", "first", 1).unwrap();
    queue.push("mail", "second", 1).unwrap();
    clock.advance(1);

    // The second read fails; the first item is already out of the store and
    // must reach the caller.
    assert_eq!(queue.pop::<String>("mail", 10).unwrap(), ["first"]);
    assert_eq!(queue.size("mail").unwrap(), 1);
    assert_eq!(queue.pop::<String>("mail", 10).unwrap(), ["second"]);
    assert_eq!(queue.size("mail").unwrap(), 0);
    assert!(!inner.exists("lock_delay_queue:{mail}:due").unwrap());
}

#[test]
fn test_failure_before_any_delivery_is_an_error() {
    let clock = Arc::new(ManualClock::new(T0));
    let inner = Arc::new(MemoryStore::with_clock(clock.clone()));
    let queue = failing(
        FailingStore {
            fail_hget: 1,
            ..FailingStore::new(Arc::clone(&inner))
        },
        clock.clone(),
    );
    queue.push("mail", "first", 1).unwrap();
    queue.push("mail", "second", 1).unwrap();
    clock.advance(1);

    assert!(queue.pop::<String>("mail", 10).is_err());
    // Nothing was removed, and the lock was released.
    assert_eq!(queue.size("mail").unwrap(), 2);
    assert_eq!(queue.pop::<String>("mail", 10).unwrap(), ["first", "second"]);
}

#[test]
fn test_failure_mid_promote_keeps_moved_items() {
    let clock = Arc::new(ManualClock::new(T0));
    let inner = Arc::new(MemoryStore::with_clock(clock.clone()));
    let queue = failing(
        FailingStore {
            fail_push: 2,
            ..FailingStore::new(Arc::clone(&inner))
        },
        clock.clone(),
    );
    for job in ["a", "b", "c"] {
        queue.push("jobs", job, 1).unwrap();
    }
    clock.advance(1);

    assert_eq!(queue.promote_to_live_queue("jobs", 10).unwrap(), 1);
    assert_eq!(queue.size("jobs").unwrap(), 2);
    assert_eq!(queue.promote_to_live_queue("jobs", 10).unwrap(), 2);

    let live = DistributedQueue::new(inner);
    assert_eq!(live.pop::<String>("jobs", 10).unwrap(), ["a", "b", "c"]);
}

// ============================================================================
// Promotion
// ============================================================================

#[test]
fn test_promote_to_live_queue() {
    let (clock, queue) = delayed(QueueConfig::default());
    for job in ["a", "b", "c"] {
        queue.push("jobs", job, 2).unwrap();
    }
    assert_eq!(queue.promote_to_live_queue("jobs", 10).unwrap(), 0);

    clock.advance(2);
    assert_eq!(queue.promote_to_live_queue("jobs", 2).unwrap(), 2);
    assert_eq!(queue.promote_to_live_queue("jobs", 2).unwrap(), 1);
    assert_eq!(queue.size("jobs").unwrap(), 0);

    let live = DistributedQueue::new(Arc::clone(queue.store()));
    assert_eq!(live.size("jobs").unwrap(), 3);
    assert_eq!(live.pop::<String>("jobs", 10).unwrap(), ["a", "b", "c"]);
}

// ============================================================================
// Sequence
// ============================================================================

#[test]
fn test_sequence_reseeds_at_max() {
    let config = QueueConfig {
        max_sequence: 3,
        ..QueueConfig::default()
    };
    let (_, queue) = delayed(config);
    let ids: Vec<u64> = (0..4).map(|i| queue.push("q", &i, 5).unwrap()).collect();
    assert_eq!(ids, [1, 2, 1, 2]);
}

#[test]
fn test_sequence_reseeds_on_overflow() {
    let (_, queue) = delayed(QueueConfig::default());
    queue
        .store()
        .set("delay_queue_seq", &i64::MAX.to_string(), 0)
        .unwrap();
    assert_eq!(queue.push("q", "x", 5).unwrap(), 1);
    assert_eq!(queue.push("q", "y", 5).unwrap(), 2);
}

// ============================================================================
// Registry paging
// ============================================================================

fn registry_names(queue: &DelayedQueue<Arc<MemoryStore>>, page: usize, size: usize) -> Vec<String> {
    queue
        .list_queues(page, size)
        .unwrap()
        .list
        .into_iter()
        .map(|q| q.name)
        .collect()
}

#[test]
fn test_list_queues_pages() {
    let (_, queue) = delayed(QueueConfig::default());
    for i in 0..10 {
        queue
            .store()
            .zset("delay_queue:registry", &format!("q{:02}", i), i + 1)
            .unwrap();
    }

    assert_eq!(registry_names(&queue, 1, 3), ["q09", "q08", "q07"]);
    assert_eq!(registry_names(&queue, 2, 3), ["q06", "q05", "q04"]);
    // Pages past the midpoint take the reverse path.
    assert_eq!(registry_names(&queue, 3, 3), ["q03", "q02", "q01"]);
    assert_eq!(registry_names(&queue, 4, 3), ["q00"]);
    assert!(registry_names(&queue, 5, 3).is_empty());
    // Page 0 is page 1.
    assert_eq!(registry_names(&queue, 0, 3), registry_names(&queue, 1, 3));

    let page = queue.list_queues(4, 3).unwrap();
    assert_eq!(page.total, 10);
    assert_eq!(page.page, 4);
    assert_eq!(page.list[0].backlog_size, 1);
}

#[test]
fn test_list_queues_matches_naive_paging_with_ties() {
    let (_, queue) = delayed(QueueConfig::default());
    for (name, backlog) in [("a", 2), ("b", 1), ("c", 2), ("d", 1), ("e", 1), ("f", 3), ("g", 2)] {
        queue.store().zset("delay_queue:registry", name, backlog).unwrap();
    }

    let naive: Vec<String> = queue
        .store()
        .zrrange("delay_queue:registry", 0, 100)
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();

    for size in 1..=7 {
        let paged: Vec<String> = (1..=7).flat_map(|p| registry_names(&queue, p, size)).collect();
        assert_eq!(paged, naive, "page size {}", size);
    }
}

#[test]
fn test_list_queues_huge_page_arguments() {
    let (_, queue) = delayed(QueueConfig::default());
    queue.store().zset("delay_queue:registry", "a", 2).unwrap();
    queue.store().zset("delay_queue:registry", "b", 1).unwrap();

    let page = queue.list_queues(1, usize::MAX).unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(registry_names(&queue, 1, usize::MAX), ["a", "b"]);
    assert!(queue.list_queues(usize::MAX, 3).unwrap().list.is_empty());
    assert!(queue.list_queues(usize::MAX, usize::MAX).unwrap().list.is_empty());
}

#[test]
fn test_list_queues_empty_registry() {
    let (_, queue) = delayed(QueueConfig::default());
    let page = queue.list_queues(1, 10).unwrap();
    assert_eq!(page.total, 0);
    assert!(page.list.is_empty());
    assert!(queue.list_queues(1, 0).unwrap().list.is_empty());
}

// ============================================================================
// Sharded store
// ============================================================================

#[test]
fn test_delayed_queue_on_sharded_store() {
    let clock = Arc::new(ManualClock::new(T0));
    let ring = RingBuilder::new()
        .add_target("a")
        .add_target("b")
        .add_target("c")
        .build()
        .unwrap();
    let shards = ["a", "b", "c"].map(|id| {
        let store: Box<dyn StoreBackend> = Box::new(MemoryStore::with_clock(clock.clone()));
        (id, store)
    });
    let store = ShardedStore::new(ring, shards, 3).unwrap();

    for name in ["mail", "sms", "push"] {
        let items = store.shard_for(&format!("delay_queue:{{{}}}:items", name)).unwrap();
        let due = store.shard_for(&format!("delay_queue:{{{}}}:due", name)).unwrap();
        let lock = store.shard_for(&format!("lock_delay_queue:{{{}}}:due", name)).unwrap();
        assert_eq!(items, due);
        assert_eq!(due, lock);
    }

    let queue = DelayedQueue::with_clock(store, QueueConfig::default(), clock.clone());
    for name in ["mail", "sms", "push"] {
        queue.push(name, name, 5).unwrap();
    }
    clock.advance(5);
    for name in ["mail", "sms", "push"] {
        assert_eq!(queue.pop::<String>(name, 10).unwrap(), [name]);
    }
    assert_eq!(queue.list_queues(1, 10).unwrap().total, 3);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_from_toml() {
    let config: QueueConfig = toml::from_str("min_delay = 30").unwrap();
    assert_eq!(config.min_delay, 30);
    assert_eq!(config.lock_ttl, 60);
    assert_eq!(config.max_sequence, i64::MAX);
    config.validate().unwrap();

    let bad: QueueConfig = toml::from_str("min_delay = 0").unwrap();
    assert!(matches!(bad.validate(), Err(QueueError::Config(_))));
}
