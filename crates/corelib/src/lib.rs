//! Core library for consistent hashing and shard routing.
//!
//! This crate provides the fundamental abstractions the store, cache and
//! queue crates are built on:
//! - Ring tokens and the hash functions (partitioners) that produce them
//! - Shard targets and their virtual nodes
//! - The consistent hash ring and its builder
//! - A clock abstraction so TTL and window logic can be tested

pub mod clock;
pub mod error;
pub mod node;
pub mod partitioner;
pub mod ring;
pub mod token;
pub mod vnode;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use node::{Target, TargetId};
pub use partitioner::{HasherKind, Partitioner};
pub use ring::{HashRing, RingBuilder, DEFAULT_REPLICAS};
pub use token::{RingToken, Token};
pub use vnode::VirtualNode;
