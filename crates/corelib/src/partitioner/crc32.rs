//! CRC32 partitioner (default).
//!
//! Fast and spreads shard routing keys well enough. Not suitable for anything
//! adversarial.

use crate::partitioner::traits::Partitioner;
use crate::token::RingToken;

/// CRC32 (IEEE) partitioner.
#[derive(Clone, Copy, Debug, Default)]
pub struct Crc32Partitioner;

impl Partitioner for Crc32Partitioner {
    type TokenType = RingToken;

    fn partition(&self, key: &[u8]) -> Self::TokenType {
        RingToken(crc32fast::hash(key))
    }

    fn name(&self) -> &'static str {
        "Crc32Partitioner"
    }
}
