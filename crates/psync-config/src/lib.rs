//! Configuration management for psync
//!
//! This crate loads the list of synchronized directories and the tuning
//! knobs of a run from YAML, TOML or JSON files, with environment variable
//! overrides and validation.
//!
//! # Features
//!
//! - **Multiple formats**: YAML, TOML and JSON configuration files
//! - **Validation**: directory names, retention periods and transport limits
//! - **Environment overrides**: `PSYNC__TRANSPORT__POLL_TIMEOUT_MS=5000`
//! - **Defaults**: 400 days tombstone expiry, 3 days backup retention
//!
//! # Examples
//!
//! ```rust,no_run
//! use psync_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .add_defaults()
//!     .add_source_file("psync.yaml")
//!     .add_env_prefix("PSYNC")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! for dir in &config.directories {
//!     println!("{} -> {}", dir.name, dir.path.display());
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use psync_types::{BufferSize, TimeoutConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Main configuration structure for psync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default retention applied to every directory
    pub retention: RetentionConfig,
    /// Directories offered to the peer
    pub directories: Vec<DirectoryConfig>,
    /// Peer stream configuration
    pub transport: TransportConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Effective retention of a directory
    pub fn retention_for(&self, directory: &DirectoryConfig) -> Retention {
        Retention {
            expire: days(directory.expire_days.unwrap_or(self.retention.expire_days)),
            backup: days(directory.backup_days.unwrap_or(self.retention.backup_days)),
        }
    }

    /// Look up a directory by name
    pub fn directory(&self, name: &str) -> Option<&DirectoryConfig> {
        self.directories.iter().find(|d| d.name == name)
    }
}

fn days(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(SECONDS_PER_DAY))
}

/// Retention periods in days
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Days a deletion tombstone is remembered
    pub expire_days: u64,
    /// Days a backup snapshot folder is kept
    pub backup_days: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            expire_days: 400,
            backup_days: 3,
        }
    }
}

/// Resolved retention of one directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    /// How long deletion tombstones are remembered
    pub expire: Duration,
    /// How long backup snapshot folders are kept
    pub backup: Duration,
}

/// One synchronized directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Name both peers use to identify the directory
    pub name: String,
    /// Local root of the tree
    pub path: PathBuf,
    /// Override of the tombstone expiry in days
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_days: Option<u64>,
    /// Override of the backup retention in days
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_days: Option<u64>,
}

impl DirectoryConfig {
    /// Directory with default retention
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            expire_days: None,
            backup_days: None,
        }
    }
}

/// Peer stream configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Longest wait for the peer before a read or write fails
    pub poll_timeout_ms: u64,
    /// Chunk size for stream buffers and file content transfer
    pub buffer_size: BufferSize,
    /// Minimum interval between two progress counter lines
    pub progress_interval_ms: u64,
}

impl TransportConfig {
    /// Stream timeouts
    pub fn timeout(&self) -> TimeoutConfig {
        TimeoutConfig {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
        }
    }

    /// Progress throttling interval
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100_000,
            buffer_size: BufferSize::default(),
            progress_interval_ms: 1000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log file path
    pub log_file: Option<PathBuf>,
    /// Enable JSON formatting
    pub json_format: bool,
    /// Enable colored output
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            log_file: None,
            json_format: false,
            colored_output: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.directories.is_empty());
        assert_eq!(config.retention.expire_days, 400);
        assert_eq!(config.retention.backup_days, 3);
        assert_eq!(config.transport.timeout().poll_millis(), 100_000);
        assert_eq!(config.transport.buffer_size.get(), 16 * 1024);
    }

    #[test]
    fn test_retention_overrides() {
        let mut config = Config::default();
        let mut docs = DirectoryConfig::new("docs", "/srv/docs");
        docs.backup_days = Some(7);
        config.directories.push(docs);
        config.directories.push(DirectoryConfig::new("music", "/srv/music"));

        let docs = config.retention_for(config.directory("docs").unwrap());
        assert_eq!(docs.backup, Duration::from_secs(7 * SECONDS_PER_DAY));
        assert_eq!(docs.expire, Duration::from_secs(400 * SECONDS_PER_DAY));

        let music = config.retention_for(config.directory("music").unwrap());
        assert_eq!(music.backup, Duration::from_secs(3 * SECONDS_PER_DAY));
        assert!(config.directory("video").is_none());
    }
}
