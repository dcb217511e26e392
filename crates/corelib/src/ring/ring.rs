//! Hash ring data structure.
//!
//! # Layout
//!
//! ```text
//!   positions: RingToken -> TargetId      (authoritative map)
//!   targets:   TargetId  -> [RingToken]   (for O(replicas) removal)
//!   sorted:    lazily built Vec<VirtualNode> ordered by token
//! ```
//!
//! Mutations only drop the sorted snapshot; the next lookup rebuilds it once.
//! Adding a whole cluster's worth of targets therefore costs a single sort.
//!
//! The ring is meant to be built at startup and then shared read-only. To
//! change membership under load, build a new ring and swap it in rather than
//! mutating the live one.

use crate::error::{Error, Result};
use crate::node::{Target, TargetId};
use crate::partitioner::{Crc32Partitioner, Partitioner};
use crate::token::{RingToken, Token};
use crate::vnode::VirtualNode;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Virtual positions per unit of weight unless configured otherwise.
pub const DEFAULT_REPLICAS: usize = 64;

#[derive(Debug, Clone)]
struct TargetEntry {
    target: Target,
    positions: Vec<RingToken>,
}

/// Consistent hash ring mapping resource keys to targets.
pub struct HashRing {
    partitioner: Box<dyn Partitioner<TokenType = RingToken>>,
    replicas: usize,
    positions: HashMap<RingToken, TargetId>,
    targets: BTreeMap<TargetId, TargetEntry>,
    sorted: RwLock<Option<Arc<Vec<VirtualNode>>>>,
}

impl HashRing {
    /// Create an empty ring with the CRC32 partitioner and 64 replicas.
    pub fn new() -> Self {
        Self::with_partitioner(Box::new(Crc32Partitioner), DEFAULT_REPLICAS)
    }

    pub fn with_partitioner(
        partitioner: Box<dyn Partitioner<TokenType = RingToken>>,
        replicas: usize,
    ) -> Self {
        Self {
            partitioner,
            replicas,
            positions: HashMap::new(),
            targets: BTreeMap::new(),
            sorted: RwLock::new(None),
        }
    }

    /// Add a target with `round(replicas * weight)` virtual positions.
    ///
    /// Fails with [`Error::DuplicateTarget`] if the id is already present;
    /// re-adding would silently reassign its positions. A weight that rounds
    /// to zero positions is an [`Error::InvalidWeight`], since the target
    /// could never own a key.
    pub fn add_target(&mut self, target: Target) -> Result<()> {
        if self.targets.contains_key(&target.id) {
            return Err(Error::DuplicateTarget(target.id.to_string()));
        }
        let count = if target.weight.is_finite() && target.weight > 0.0 {
            target.position_count(self.replicas)
        } else {
            0
        };
        if count == 0 {
            return Err(Error::InvalidWeight {
                target: target.id.to_string(),
                weight: target.weight.to_string(),
            });
        }

        let mut positions = Vec::with_capacity(count);
        for i in 0..count {
            let vnode = VirtualNode::from_index(self.partitioner.as_ref(), &target.id, i);
            // Collisions are last-write-wins.
            self.positions.insert(vnode.token, vnode.target);
            positions.push(vnode.token);
        }

        debug!(target_id = %target.id, weight = target.weight, positions = count, "added ring target");
        self.targets
            .insert(target.id.clone(), TargetEntry { target, positions });
        *self.sorted.get_mut() = None;
        Ok(())
    }

    /// Remove a target and every position it still owns.
    pub fn remove_target(&mut self, id: &str) -> Result<()> {
        let entry = self
            .targets
            .remove(id)
            .ok_or_else(|| Error::UnknownTarget(id.to_string()))?;

        for token in &entry.positions {
            // A later target may have taken this position over.
            if self.positions.get(token).map(TargetId::as_str) == Some(id) {
                self.positions.remove(token);
            }
        }

        debug!(target_id = id, "removed ring target");
        *self.sorted.get_mut() = None;
        Ok(())
    }

    /// Find the target that owns `key`.
    ///
    /// The owner is the first position strictly greater than `hash(key)`,
    /// wrapping to the smallest position.
    pub fn lookup(&self, key: &[u8]) -> Result<TargetId> {
        let ring = self.snapshot();
        if ring.is_empty() {
            return Err(Error::EmptyRing);
        }
        let idx = Self::successor(&ring, self.partitioner.partition(key));
        Ok(ring[idx].target.clone())
    }

    /// Up to `n` distinct targets in ring order starting after `key`.
    ///
    /// The first entry is always `lookup(key)`. The walk wraps around the
    /// ring once, so fewer than `n` entries are returned only when the ring
    /// has fewer than `n` targets.
    pub fn lookup_n(&self, key: &[u8], n: usize) -> Result<Vec<TargetId>> {
        let ring = self.snapshot();
        if ring.is_empty() {
            return Err(Error::EmptyRing);
        }

        let want = n.min(self.targets.len());
        let mut result = Vec::with_capacity(want);
        let mut seen = HashSet::with_capacity(want);
        let start = Self::successor(&ring, self.partitioner.partition(key));

        for i in 0..ring.len() {
            if result.len() >= want {
                break;
            }
            let vnode = &ring[(start + i) % ring.len()];
            if seen.insert(&vnode.target) {
                result.push(vnode.target.clone());
            }
        }

        Ok(result)
    }

    /// Hash a key to its ring position.
    #[inline]
    pub fn token_for(&self, key: &[u8]) -> RingToken {
        self.partitioner.partition(key)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.targets.contains_key(id)
    }

    /// Number of targets.
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Number of distinct virtual positions.
    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// All targets, ordered by id.
    pub fn targets(&self) -> Vec<Target> {
        self.targets.values().map(|e| e.target.clone()).collect()
    }

    /// All positions in ring order (for debugging and distribution reports).
    pub fn tokens(&self) -> Vec<(RingToken, TargetId)> {
        self.snapshot()
            .iter()
            .map(|v| (v.token, v.target.clone()))
            .collect()
    }

    /// Fraction of the keyspace each target owns, by id.
    ///
    /// A position owns the arc from its predecessor (inclusive) up to itself
    /// (exclusive), so the shares sum to 1. Targets whose every position was
    /// taken over by a collision own nothing and are reported as 0.
    pub fn ownership(&self) -> BTreeMap<TargetId, f64> {
        let mut shares: BTreeMap<TargetId, f64> =
            self.targets.keys().map(|id| (id.clone(), 0.0)).collect();
        let ring = self.snapshot();
        let span = f64::from(<RingToken as Token>::max().0) + 1.0;

        if let [only] = ring.as_slice() {
            shares.insert(only.target.clone(), 1.0);
            return shares;
        }
        for (i, vnode) in ring.iter().enumerate() {
            let prev = &ring[(i + ring.len() - 1) % ring.len()];
            let arc = prev.token.distance_to(&vnode.token);
            *shares.entry(vnode.target.clone()).or_default() += f64::from(arc.0) / span;
        }
        shares
    }

    /// Whether the sorted snapshot is current.
    pub fn is_sorted(&self) -> bool {
        self.sorted.read().is_some()
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn partitioner_name(&self) -> &'static str {
        self.partitioner.name()
    }

    /// Index of the first vnode with a token strictly greater than `token`,
    /// wrapping to 0. `ring` must not be empty.
    fn successor(ring: &[VirtualNode], token: RingToken) -> usize {
        let idx = ring.partition_point(|v| v.token <= token);
        if idx == ring.len() {
            0
        } else {
            idx
        }
    }

    fn snapshot(&self) -> Arc<Vec<VirtualNode>> {
        if let Some(ring) = self.sorted.read().as_ref() {
            return Arc::clone(ring);
        }

        let mut guard = self.sorted.write();
        if let Some(ring) = guard.as_ref() {
            return Arc::clone(ring);
        }

        let mut ring: Vec<VirtualNode> = self
            .positions
            .iter()
            .map(|(token, target)| VirtualNode::new(*token, target.clone()))
            .collect();
        ring.sort_unstable_by_key(|v| v.token);

        let ring = Arc::new(ring);
        *guard = Some(Arc::clone(&ring));
        ring
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HashRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashRing")
            .field("partitioner", &self.partitioner.name())
            .field("replicas", &self.replicas)
            .field("targets", &self.targets.keys().collect::<Vec<_>>())
            .field("positions", &self.positions.len())
            .finish()
    }
}

/// Builder for a [`HashRing`].
///
/// ```rust
/// use corelib::RingBuilder;
///
/// let ring = RingBuilder::new()
///     .with_replicas(32)
///     .add_target("node-a")
///     .add_weighted_target("node-b", 2.0)
///     .build()
///     .unwrap();
/// assert_eq!(ring.position_count(), 96);
/// ```
pub struct RingBuilder {
    partitioner: Box<dyn Partitioner<TokenType = RingToken>>,
    replicas: usize,
    targets: Vec<Target>,
}

impl RingBuilder {
    pub fn new() -> Self {
        Self {
            partitioner: Box::new(Crc32Partitioner),
            replicas: DEFAULT_REPLICAS,
            targets: Vec::new(),
        }
    }

    /// Virtual positions per unit of weight.
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_partitioner(
        mut self,
        partitioner: Box<dyn Partitioner<TokenType = RingToken>>,
    ) -> Self {
        self.partitioner = partitioner;
        self
    }

    /// Add a target with weight 1.
    pub fn add_target(mut self, id: impl Into<TargetId>) -> Self {
        self.targets.push(Target::new(id));
        self
    }

    pub fn add_weighted_target(mut self, id: impl Into<TargetId>, weight: f64) -> Self {
        self.targets.push(Target::weighted(id, weight));
        self
    }

    pub fn build(self) -> Result<HashRing> {
        if self.replicas == 0 {
            return Err(Error::Config("replicas must be at least 1".to_string()));
        }
        let mut ring = HashRing::with_partitioner(self.partitioner, self.replicas);
        for target in self.targets {
            ring.add_target(target)?;
        }
        Ok(ring)
    }
}

impl Default for RingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successor_wraps() {
        let ring = vec![
            VirtualNode::new(RingToken(10), TargetId::from("a")),
            VirtualNode::new(RingToken(20), TargetId::from("b")),
        ];
        assert_eq!(HashRing::successor(&ring, RingToken(0)), 0);
        // strictly greater: a key landing on 10 belongs to the next position
        assert_eq!(HashRing::successor(&ring, RingToken(10)), 1);
        assert_eq!(HashRing::successor(&ring, RingToken(15)), 1);
        assert_eq!(HashRing::successor(&ring, RingToken(20)), 0);
        assert_eq!(HashRing::successor(&ring, RingToken(u32::MAX)), 0);
    }

    #[test]
    fn test_sort_is_lazy() {
        let mut ring = HashRing::new();
        ring.add_target(Target::new("a")).unwrap();
        ring.add_target(Target::new("b")).unwrap();
        assert!(!ring.is_sorted());

        ring.lookup(b"key").unwrap();
        assert!(ring.is_sorted());

        ring.add_target(Target::new("c")).unwrap();
        assert!(!ring.is_sorted());
    }

    #[test]
    fn test_remove_skips_positions_taken_over() {
        let mut ring = HashRing::new();
        ring.add_target(Target::new("a")).unwrap();
        let token = ring.targets["a"].positions[0];
        // Simulate a collision won by another target.
        ring.positions.insert(token, TargetId::from("b"));

        ring.remove_target("a").unwrap();
        assert_eq!(ring.positions.get(&token), Some(&TargetId::from("b")));
    }
}
