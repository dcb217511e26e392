//! 32-bit ring token.

use crate::token::traits::Token;
use std::fmt;

/// Position on a 2^32 ring.
///
/// Stored as `u32` so the natural integer order is the ring order. Hash
/// outputs must never be reinterpreted as signed values, which would put the
/// upper half of the ring before the lower half.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct RingToken(pub u32);

impl Token for RingToken {
    fn max() -> Self {
        RingToken(u32::MAX)
    }

    fn distance_to(&self, other: &Self) -> Self {
        RingToken(other.0.wrapping_sub(self.0))
    }
}

impl fmt::Display for RingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_wraps() {
        assert_eq!(RingToken(100).distance_to(&RingToken(200)), RingToken(100));
        assert_eq!(
            RingToken(u32::MAX).distance_to(&RingToken(0)),
            RingToken(1)
        );
        assert_eq!(RingToken(200).distance_to(&RingToken(100)).0, u32::MAX - 99);
    }

    #[test]
    fn test_upper_half_sorts_after_lower_half() {
        let mut tokens = vec![RingToken(0x8000_0000), RingToken(1), RingToken(u32::MAX)];
        tokens.sort();
        assert_eq!(
            tokens,
            vec![RingToken(1), RingToken(0x8000_0000), RingToken(u32::MAX)]
        );
        assert_eq!(<RingToken as Token>::max(), RingToken(u32::MAX));
    }
}
