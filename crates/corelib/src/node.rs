//! Shard targets for the consistent hash ring.
//!
//! A target names one backing store instance (for example `"10.0.0.5:8888"`
//! or `"node-a"`). Targets carry a weight that scales how many virtual
//! positions they receive on the ring.

use std::borrow::Borrow;
use std::fmt;

/// Identifier for a backing store instance.
///
/// Newtype over `String` so it cannot be confused with resource keys.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TargetId(pub String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TargetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for TargetId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A target participating in the ring.
///
/// Keep this struct small and cheap to clone; connections live in the store
/// crate, keyed by `TargetId`.
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    pub id: TargetId,
    /// Relative share of the keyspace. `1.0` is the default.
    pub weight: f64,
}

impl Target {
    /// Construct a target with the default weight of 1.
    pub fn new(id: impl Into<TargetId>) -> Self {
        Self::weighted(id, 1.0)
    }

    pub fn weighted(id: impl Into<TargetId>, weight: f64) -> Self {
        Self {
            id: id.into(),
            weight,
        }
    }

    /// Number of virtual positions this target gets for `replicas` per unit
    /// of weight.
    pub fn position_count(&self, replicas: usize) -> usize {
        (replicas as f64 * self.weight).round() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_count_scales_with_weight() {
        assert_eq!(Target::new("a").position_count(64), 64);
        assert_eq!(Target::weighted("a", 2.0).position_count(64), 128);
        assert_eq!(Target::weighted("a", 0.5).position_count(64), 32);
        // round, not truncate
        assert_eq!(Target::weighted("a", 1.0 / 3.0).position_count(64), 21);
        assert_eq!(Target::weighted("a", 0.01).position_count(64), 1);
    }

    #[test]
    fn test_target_id_display() {
        let id = TargetId::from("node-a");
        assert_eq!(id.to_string(), "node-a");
        assert_eq!(id.as_str(), "node-a");
    }
}
