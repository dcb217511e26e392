//! Delayed queue configuration.

use crate::error::{QueueError, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Delay in seconds applied when a caller asks for none.
    #[serde(default = "QueueConfig::default_min_delay")]
    pub min_delay: i64,

    /// Lifetime of the drain lock, so a crashed drainer cannot wedge a queue.
    #[serde(default = "QueueConfig::default_lock_ttl")]
    pub lock_ttl: u64,

    /// The item sequence restarts at 1 once it reaches this value.
    #[serde(default = "QueueConfig::default_max_sequence")]
    pub max_sequence: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_delay: Self::default_min_delay(),
            lock_ttl: Self::default_lock_ttl(),
            max_sequence: Self::default_max_sequence(),
        }
    }
}

impl QueueConfig {
    fn default_min_delay() -> i64 {
        10
    }

    fn default_lock_ttl() -> u64 {
        60
    }

    fn default_max_sequence() -> i64 {
        i64::MAX
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_delay <= 0 {
            return Err(QueueError::Config("min_delay must be positive".into()));
        }
        if self.max_sequence < 2 {
            return Err(QueueError::Config("max_sequence must be at least 2".into()));
        }
        Ok(())
    }
}
