use std::fmt::Debug;
use std::hash::Hash;

/// A position on the hash ring.
///
/// The ordering must be total over the whole keyspace: lookups find the
/// first position after a key by comparison alone.
pub trait Token: Copy + Ord + Hash + Send + Sync + Debug + 'static {
    /// Last position before the ring wraps.
    fn max() -> Self;
    /// Clockwise distance from `self` to `other`.
    fn distance_to(&self, other: &Self) -> Self;
}
