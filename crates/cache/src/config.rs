//! Cache configuration.

use crate::keys::KeyLayout;
use serde::Deserialize;

/// Seven days.
pub const DEFAULT_TTL: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Deployment-wide namespace, so applications can share a store.
    #[serde(default)]
    pub prefix: String,

    #[serde(default = "CacheConfig::default_separator")]
    pub separator: String,

    /// Group used by the top-level `GroupedCache` shortcuts.
    #[serde(default = "CacheConfig::default_group")]
    pub default_group: String,

    /// TTL applied when a caller passes `0`.
    #[serde(default = "CacheConfig::default_ttl")]
    pub default_ttl: u64,

    /// Generation counters reset to 1 past this value.
    #[serde(default = "CacheConfig::default_max_generation")]
    pub max_generation: i64,

    /// TTL of locks taken with `0`.
    #[serde(default = "CacheConfig::default_lock_ttl")]
    pub lock_ttl: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            separator: Self::default_separator(),
            default_group: Self::default_group(),
            default_ttl: Self::default_ttl(),
            max_generation: Self::default_max_generation(),
            lock_ttl: Self::default_lock_ttl(),
        }
    }
}

impl CacheConfig {
    fn default_separator() -> String {
        ":".to_string()
    }

    fn default_group() -> String {
        "_cache_".to_string()
    }

    fn default_ttl() -> u64 {
        DEFAULT_TTL
    }

    fn default_max_generation() -> i64 {
        i64::MAX
    }

    fn default_lock_ttl() -> u64 {
        5
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn key_layout(&self) -> KeyLayout {
        KeyLayout::new(self.prefix.clone(), self.separator.clone())
    }
}
