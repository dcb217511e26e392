//! Subcommands.
//!
//! Every command writes its report to the given writer so the same code
//! backs the binary and the tests.

use crate::config::AppConfig;
use anyhow::{bail, Context};
use cache::{GroupedCache, KvBackend};
use clap::Subcommand;
use corelib::{HashRing, TargetId};
use queue::DelayedQueue;
use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;
use store::{routing_key, ShardedStore, StoreBackend};
use tracing::{debug, info, warn};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show which targets own the given keys.
    Lookup {
        #[arg(required = true)]
        keys: Vec<String>,

        /// Distinct targets to list per key, in ring order.
        #[arg(long, default_value_t = 1)]
        replicas: usize,
    },

    /// Hash synthetic keys and report the share each target receives,
    /// next to the share of the keyspace it owns.
    Distribution {
        #[arg(long, default_value_t = 10_000)]
        samples: usize,
    },

    /// Move due items of a delayed queue onto its live queue.
    Promote {
        queue: String,

        /// Items moved per drain.
        #[arg(long, default_value_t = 100)]
        batch: usize,

        /// Pause between drains that moved nothing.
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Drain once and exit.
        #[arg(long)]
        once: bool,
    },

    /// Re-index delayed items left behind by a crashed drain.
    Recover { queue: String },

    /// List delayed queues by backlog.
    Queues {
        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },

    /// Invalidate every entry of a cache group.
    ClearGroup { group: String },

    /// Ping every shard.
    Health,
}

impl Command {
    pub fn run(self, config: &AppConfig, out: &mut impl Write) -> anyhow::Result<()> {
        match self {
            Command::Lookup { keys, replicas } => {
                let ring = config.store.ring()?;
                lookup(&ring, &keys, replicas, out)
            }
            Command::Distribution { samples } => {
                let ring = config.store.ring()?;
                distribution(&ring, samples, out)
            }
            Command::Promote {
                queue,
                batch,
                interval_ms,
                once,
            } => {
                let store = connect(config)?;
                let delayed = DelayedQueue::new(store, config.queue.clone());
                if once {
                    return promote_once(&delayed, &queue, batch, out);
                }
                promote_loop(&delayed, &queue, batch, Duration::from_millis(interval_ms))
            }
            Command::Recover { queue } => {
                let delayed = DelayedQueue::new(connect(config)?, config.queue.clone());
                let recovered = delayed.recover(&queue)?;
                writeln!(out, "{}: {} item(s) re-indexed", queue, recovered)?;
                Ok(())
            }
            Command::Queues { page, page_size } => {
                let delayed = DelayedQueue::new(connect(config)?, config.queue.clone());
                queues(&delayed, page, page_size, out)
            }
            Command::ClearGroup { group } => {
                let backend = KvBackend::sharded(connect(config)?);
                let cache = GroupedCache::new(backend, config.cache.clone());
                clear_group(&cache, &group, out)
            }
            Command::Health => health(&connect(config)?, out),
        }
    }
}

fn connect(config: &AppConfig) -> anyhow::Result<ShardedStore> {
    ShardedStore::connect(&config.store).context("connecting to store targets")
}

pub(crate) fn lookup(
    ring: &HashRing,
    keys: &[String],
    replicas: usize,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    for key in keys {
        let routed = routing_key(key);
        let owners = ring.lookup_n(routed.as_bytes(), replicas.max(1))?;
        let owners: Vec<&str> = owners.iter().map(TargetId::as_str).collect();
        if routed == key {
            writeln!(out, "{} -> {}", key, owners.join(", "))?;
        } else {
            writeln!(out, "{} [{}] -> {}", key, routed, owners.join(", "))?;
        }
    }
    Ok(())
}

pub(crate) fn distribution(ring: &HashRing, samples: usize, out: &mut impl Write) -> anyhow::Result<()> {
    if samples == 0 {
        bail!("samples must be at least 1");
    }
    let mut counts: BTreeMap<TargetId, usize> = ring
        .targets()
        .into_iter()
        .map(|target| (target.id, 0))
        .collect();
    for i in 0..samples {
        let owner = ring.lookup(format!("key-{}", i).as_bytes())?;
        *counts.entry(owner).or_default() += 1;
    }

    writeln!(
        out,
        "{} targets, {} positions, hasher {}",
        ring.target_count(),
        ring.position_count(),
        ring.partitioner_name()
    )?;
    let owned = ring.ownership();
    for (id, count) in &counts {
        let share = *count as f64 * 100.0 / samples as f64;
        let keyspace = owned.get(id).copied().unwrap_or_default() * 100.0;
        writeln!(
            out,
            "{:<24} {:>8} {:>6.2}% {:>6.2}%",
            id.as_str(),
            count,
            share,
            keyspace
        )?;
    }
    Ok(())
}

pub(crate) fn promote_once<S: StoreBackend>(
    delayed: &DelayedQueue<S>,
    queue: &str,
    batch: usize,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let moved = delayed.promote_to_live_queue(queue, batch)?;
    writeln!(out, "{}: {} item(s) promoted", queue, moved)?;
    Ok(())
}

fn promote_loop<S: StoreBackend>(
    delayed: &DelayedQueue<S>,
    queue: &str,
    batch: usize,
    interval: Duration,
) -> anyhow::Result<()> {
    info!(queue, batch, "promoting due items");
    loop {
        match delayed.promote_to_live_queue(queue, batch) {
            // A full batch may mean more is due; drain again right away.
            Ok(moved) if moved > 0 && moved >= batch => continue,
            Ok(moved) => debug!(queue, moved, "drained"),
            Err(e) => warn!(queue, error = %e, "promotion failed"),
        }
        std::thread::sleep(interval);
    }
}

pub(crate) fn queues<S: StoreBackend>(
    delayed: &DelayedQueue<S>,
    page: usize,
    page_size: usize,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let listing = delayed.list_queues(page, page_size)?;
    writeln!(out, "{} queue(s), page {}", listing.total, listing.page)?;
    for info in listing.list {
        writeln!(out, "{:<32} {:>10}", info.name, info.backlog_size)?;
    }
    Ok(())
}

pub(crate) fn clear_group(cache: &GroupedCache, group: &str, out: &mut impl Write) -> anyhow::Result<()> {
    let generation = cache.clear(group)?;
    writeln!(out, "{}: generation {}", group, generation)?;
    Ok(())
}

pub(crate) fn health(store: &ShardedStore, out: &mut impl Write) -> anyhow::Result<()> {
    let mut failed = 0;
    for (id, result) in store.health_check() {
        match result {
            Ok(()) => writeln!(out, "{:<24} up", id.as_str())?,
            Err(e) => {
                failed += 1;
                writeln!(out, "{:<24} down ({})", id.as_str(), e)?;
            }
        }
    }
    if failed > 0 {
        bail!("{} shard(s) unreachable", failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache::CacheConfig;
    use corelib::RingBuilder;
    use queue::{DistributedQueue, QueueConfig};
    use std::sync::Arc;
    use store::MemoryStore;

    fn ring() -> HashRing {
        RingBuilder::new()
            .add_target("a")
            .add_target("b")
            .add_target("c")
            .build()
            .unwrap()
    }

    fn output(f: impl FnOnce(&mut Vec<u8>) -> anyhow::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_lookup_lists_owners() {
        let ring = ring();
        let keys = vec!["user:1".to_string(), "{user:1}:cart".to_string()];
        let text = output(|out| lookup(&ring, &keys, 2, out));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let owners = ring.lookup_n(b"user:1", 2).unwrap();
        let expected = format!("{}, {}", owners[0], owners[1]);
        assert_eq!(lines[0], format!("user:1 -> {}", expected));
        // The hash tag routes with the plain key.
        assert_eq!(lines[1], format!("{{user:1}}:cart [user:1] -> {}", expected));
    }

    #[test]
    fn test_distribution_reports_every_target() {
        let text = output(|out| distribution(&ring(), 3000, out));
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("3 targets"));

        let counts: Vec<usize> = lines
            .map(|line| line.split_whitespace().nth(1).unwrap().parse().unwrap())
            .collect();
        assert_eq!(counts.len(), 3);
        assert_eq!(counts.iter().sum::<usize>(), 3000);
        assert!(counts.iter().all(|&c| c > 0));

        // Last column is the keyspace share each target owns.
        let owned: f64 = text
            .lines()
            .skip(1)
            .map(|line| {
                let last = line.split_whitespace().last().unwrap();
                last.trim_end_matches('%').parse::<f64>().unwrap()
            })
            .sum();
        assert!((owned - 100.0).abs() < 0.05, "owned {}", owned);
    }

    #[test]
    fn test_distribution_rejects_zero_samples() {
        assert!(distribution(&ring(), 0, &mut Vec::new()).is_err());
    }

    #[test]
    fn test_promote_and_list() {
        let store = Arc::new(MemoryStore::new());
        let delayed = DelayedQueue::new(Arc::clone(&store), QueueConfig::default());
        delayed.push("jobs", "a", 60).unwrap();

        let text = output(|out| queues(&delayed, 1, 10, out));
        assert!(text.starts_with("1 queue(s), page 1"));
        assert!(text.contains("jobs"));

        // Nothing due yet.
        let text = output(|out| promote_once(&delayed, "jobs", 10, out));
        assert_eq!(text.trim(), "jobs: 0 item(s) promoted");
        assert_eq!(DistributedQueue::new(store).size("jobs").unwrap(), 0);
    }

    #[test]
    fn test_clear_group_bumps_generation() {
        let cache = GroupedCache::new(KvBackend::new(MemoryStore::new()), CacheConfig::default());
        let text = output(|out| clear_group(&cache, "users", out));
        assert_eq!(text.trim(), "users: generation 1");
    }

    #[test]
    fn test_health_reports_down_shards() {
        let backends = ["a", "b", "c"].map(|id| {
            let store = MemoryStore::new();
            if id == "b" {
                store.set_offline(true);
            }
            (id, Box::new(store) as Box<dyn StoreBackend>)
        });
        let store = ShardedStore::new(ring(), backends, 3).unwrap();

        let mut buf = Vec::new();
        let err = health(&store, &mut buf).unwrap_err();
        assert_eq!(err.to_string(), "1 shard(s) unreachable");
        let text = String::from_utf8(buf).unwrap();
        assert!(text.lines().any(|l| l.starts_with('b') && l.contains("down")));
        assert_eq!(text.lines().filter(|l| l.ends_with("up")).count(), 2);
    }
}
