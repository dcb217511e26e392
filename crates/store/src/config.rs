//! Store configuration.
//!
//! ```toml
//! [store]
//! replicas = 64
//! hasher = "crc32"
//! max_retries = 3
//! timeout_ms = 3000
//!
//! [[store.targets]]
//! host = "10.0.0.1"
//! port = 6379
//! weight = 2.0
//! ```

use crate::error::{Result, StoreError};
use crate::resp::RespConfig;
use corelib::{HasherKind, HashRing, RingBuilder, DEFAULT_REPLICAS};
use serde::Deserialize;
use std::time::Duration;

/// Sharded store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Virtual positions per unit of target weight.
    #[serde(default = "StoreConfig::default_replicas")]
    pub replicas: usize,

    /// Hash function placing keys and targets on the ring.
    #[serde(default)]
    pub hasher: HasherKind,

    /// Consecutive failed reconnects before a shard fails fast.
    #[serde(default = "StoreConfig::default_max_retries")]
    pub max_retries: u32,

    /// Connect, read and write timeout in milliseconds.
    #[serde(default = "StoreConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            replicas: Self::default_replicas(),
            hasher: HasherKind::default(),
            max_retries: Self::default_max_retries(),
            timeout_ms: Self::default_timeout_ms(),
            targets: Vec::new(),
        }
    }
}

impl StoreConfig {
    fn default_replicas() -> usize {
        DEFAULT_REPLICAS
    }

    fn default_max_retries() -> u32 {
        3
    }

    fn default_timeout_ms() -> u64 {
        3000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Build the routing ring for the configured targets.
    pub fn ring(&self) -> Result<HashRing> {
        if self.targets.is_empty() {
            return Err(StoreError::Config("no store targets configured".into()));
        }
        let ring = self
            .targets
            .iter()
            .fold(
                RingBuilder::new()
                    .with_replicas(self.replicas)
                    .with_partitioner(self.hasher.build()),
                |builder, target| builder.add_weighted_target(target.id(), target.weight),
            )
            .build()?;
        Ok(ring)
    }
}

/// One backing server.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub host: String,

    #[serde(default = "TargetConfig::default_port")]
    pub port: u16,

    #[serde(default = "TargetConfig::default_weight")]
    pub weight: f64,

    #[serde(default)]
    pub password: Option<String>,

    /// Ring identity. Defaults to `host:port`; set it explicitly to keep a
    /// shard's key range when the server moves.
    #[serde(default)]
    pub id: Option<String>,
}

impl TargetConfig {
    fn default_port() -> u16 {
        6379
    }

    fn default_weight() -> f64 {
        1.0
    }

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            weight: Self::default_weight(),
            password: None,
            id: None,
        }
    }

    pub fn id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }

    pub fn resp(&self, timeout: Duration) -> RespConfig {
        RespConfig {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
            timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.replicas, 64);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout(), Duration::from_secs(3));
        assert!(matches!(config.ring(), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_target_identity() {
        let mut target = TargetConfig::new("10.0.0.1", 6380);
        assert_eq!(target.id(), "10.0.0.1:6380");
        target.id = Some("cache-a".into());
        assert_eq!(target.id(), "cache-a");
        assert_eq!(target.resp(Duration::from_millis(5)).port, 6380);
    }
}
