//! Partitioner abstraction for consistent hashing.
//!
//! Partitioners are responsible for converting keys into tokens
//! that can be placed on the hash ring.

pub mod crc32;
pub mod traits;
pub mod xxh3;

pub use crc32::Crc32Partitioner;
pub use traits::Partitioner;
pub use xxh3::Xxh3Partitioner;

use crate::token::RingToken;
use serde::Deserialize;

/// Partitioner selection as it appears in configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HasherKind {
    #[default]
    Crc32,
    Xxh3,
}

impl HasherKind {
    /// Instantiate the partitioner this kind names.
    pub fn build(self) -> Box<dyn Partitioner<TokenType = RingToken>> {
        match self {
            HasherKind::Crc32 => Box::new(Crc32Partitioner),
            HasherKind::Xxh3 => Box::new(Xxh3Partitioner),
        }
    }
}
