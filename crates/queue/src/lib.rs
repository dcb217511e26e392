//! Queues on top of a [`StoreBackend`](store::StoreBackend).
//!
//! - [`DistributedQueue`]: plain FIFO on a store list
//! - [`DelayedQueue`]: items become visible at a due time and are drained
//!   in (due time, push order), at least once
//!
//! Delayed queues keep their keys under a `{name}` hash tag, so on a
//! [`ShardedStore`](store::ShardedStore) every structure of one queue lives
//! on one shard.

pub mod config;
pub mod delayed;
pub mod distributed;
pub mod error;

pub use config::QueueConfig;
pub use delayed::{DelayedQueue, QueueInfo, QueuePage};
pub use distributed::DistributedQueue;
pub use error::{QueueError, Result};
