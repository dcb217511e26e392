//! Command-line arguments and the configuration file.
//!
//! ```toml
//! [store]
//! replicas = 64
//! hasher = "crc32"
//!
//! [[store.targets]]
//! host = "10.0.0.1"
//! port = 6379
//!
//! [queue]
//! min_delay = 10
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! ```

use crate::commands::Command;
use anyhow::Context;
use cache::CacheConfig;
use clap::Parser;
use queue::QueueConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use store::StoreConfig;

/// Inspect the shard ring and run queue workers.
#[derive(Debug, Parser)]
#[command(name = "shardctl", version)]
pub struct CliConfig {
    /// Configuration file (TOML).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level, overriding the configuration file.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    /// Load the configuration, install logging and run the subcommand.
    pub fn run(self) -> anyhow::Result<()> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        crate::logging::init(&config.logging);
        config.queue.validate()?;

        let stdout = std::io::stdout();
        self.command.run(&config, &mut stdout.lock())
    }
}

/// Everything the configuration file can hold.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// "pretty", "compact" or "json".
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: Self::default_format(),
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_format() -> String {
        "pretty".to_string()
    }
}
