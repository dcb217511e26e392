//! Virtual node abstractions.
//!
//! # Virtual Nodes (VNodes) Concept
//!
//! Instead of each target having a single token on the ring, each target has
//! `round(replicas * weight)` tokens. This provides:
//!
//! 1. **Better Load Distribution**: More tokens = smoother distribution of keys
//! 2. **Gradual Rebalancing**: When targets join/leave, only a fraction of keys move
//! 3. **Weighting**: A target with weight 2 owns roughly twice the keyspace
//!
//! # Performance Characteristics
//!
//! - **Memory**: O(v) where v = total virtual nodes
//! - **Lookup**: O(log v) binary search over the sorted snapshot
//! - **Rebalancing**: ~1/(N+1) of keys move when an (N+1)th target joins
//!
//! The default of 64 replicas per unit of weight keeps the per-target share
//! within a few percent for clusters of tens of targets.

use crate::node::TargetId;
use crate::partitioner::Partitioner;
use crate::token::RingToken;

/// A virtual node on the hash ring.
///
/// Represents a single token position owned by a target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualNode {
    /// Token position on the ring.
    pub token: RingToken,
    /// The target that owns this position.
    pub target: TargetId,
}

impl VirtualNode {
    #[inline]
    pub fn new(token: RingToken, target: TargetId) -> Self {
        Self { token, target }
    }

    /// Create the `replica_index`-th virtual node of `target`.
    ///
    /// The token is the hash of the target id immediately followed by the
    /// decimal replica index (`"node-a"`, `0` hashes `"node-a0"`). Keeping
    /// this exact layout means two processes configured with the same
    /// targets build identical rings.
    pub fn from_index(
        partitioner: &dyn Partitioner<TokenType = RingToken>,
        target: &TargetId,
        replica_index: usize,
    ) -> Self {
        let vnode_key = format!("{}{}", target, replica_index);
        let token = partitioner.partition(vnode_key.as_bytes());
        Self::new(token, target.clone())
    }

    #[inline]
    pub fn token(&self) -> RingToken {
        self.token
    }

    #[inline]
    pub fn target(&self) -> &TargetId {
        &self.target
    }
}

impl std::fmt::Display for VirtualNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VNode(token={}, target={})", self.token, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitioner::Crc32Partitioner;

    #[test]
    fn test_vnode_from_index() {
        let target = TargetId::from("node1");
        let vnode0 = VirtualNode::from_index(&Crc32Partitioner, &target, 0);
        let vnode1 = VirtualNode::from_index(&Crc32Partitioner, &target, 1);

        assert_ne!(vnode0.token(), vnode1.token());
        assert_eq!(vnode0.target(), vnode1.target());
    }

    #[test]
    fn test_vnode_key_is_plain_concatenation() {
        let target = TargetId::from("node1");
        let vnode = VirtualNode::from_index(&Crc32Partitioner, &target, 7);
        assert_eq!(vnode.token(), Crc32Partitioner.partition(b"node17"));
    }

    #[test]
    fn test_vnode_ordering() {
        let a = VirtualNode::new(RingToken(100), TargetId::from("b"));
        let b = VirtualNode::new(RingToken(200), TargetId::from("a"));
        assert!(a < b); // Ordered by token first
    }
}
