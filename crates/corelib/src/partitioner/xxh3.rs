//! XXH3 partitioner.
//!
//! Uses the top 32 bits of the 64-bit XXH3 digest, the same way a wide
//! digest is usually truncated to its leading hex digits for ring placement.

use crate::partitioner::traits::Partitioner;
use crate::token::RingToken;
use xxhash_rust::xxh3::xxh3_64;

/// XXH3-64 partitioner truncated to the ring width.
#[derive(Clone, Copy, Debug, Default)]
pub struct Xxh3Partitioner;

impl Partitioner for Xxh3Partitioner {
    type TokenType = RingToken;

    fn partition(&self, key: &[u8]) -> Self::TokenType {
        RingToken((xxh3_64(key) >> 32) as u32)
    }

    fn name(&self) -> &'static str {
        "Xxh3Partitioner"
    }
}
