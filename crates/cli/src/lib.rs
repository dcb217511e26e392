//! `shardctl`: inspect the shard ring, run delayed-queue promotion and
//! check store targets.

pub mod commands;
pub mod config;
pub mod logging;

pub use commands::Command;
pub use config::{AppConfig, CliConfig, LoggingConfig};
