//! Configuration builder for layered configuration loading

use crate::{Config, ConfigError, ConfigResult};
use config::{ConfigBuilder as ConfigBuilderInner, Environment, File, FileFormat};
use psync_types::BufferSize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Longest directory name accepted on the wire
pub const MAX_NAME_LEN: usize = 4096;

/// Configuration builder for loading configuration from multiple sources
///
/// Sources are applied in the order they were added: defaults first, then
/// files, then environment variables.
#[derive(Debug)]
pub struct ConfigBuilder {
    inner: ConfigBuilderInner<config::builder::DefaultState>,
    sources: Vec<ConfigSource>,
    env_separator: String,
}

#[derive(Debug, Clone)]
enum ConfigSource {
    File { path: PathBuf, format: FileFormat },
    Defaults,
    Environment { prefix: String },
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            inner: config::Config::builder(),
            sources: Vec::new(),
            env_separator: "__".to_string(),
        }
    }

    /// Add default configuration values
    pub fn add_defaults(mut self) -> Self {
        self.sources.push(ConfigSource::Defaults);
        self
    }

    /// Add a configuration file source, skipped if the file does not exist
    pub fn add_source_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let format = Self::detect_format(&path);
        self.sources.push(ConfigSource::File { path, format });
        self
    }

    /// Add environment variable source with prefix
    pub fn add_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.sources.push(ConfigSource::Environment {
            prefix: prefix.into(),
        });
        self
    }

    /// Set environment variable separator (default: "__")
    pub fn env_separator<S: Into<String>>(mut self, separator: S) -> Self {
        self.env_separator = separator.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(mut self) -> ConfigResult<Config> {
        for source in &self.sources {
            match source {
                ConfigSource::Defaults => {
                    let defaults = serde_yaml::to_value(Config::default())?;
                    self.inner = self
                        .inner
                        .add_source(config::Config::try_from(&defaults)?);
                }
                ConfigSource::File { path, format } => {
                    if path.exists() {
                        self.inner = self
                            .inner
                            .add_source(File::from(path.clone()).format(*format));
                    }
                }
                ConfigSource::Environment { prefix } => {
                    self.inner = self.inner.add_source(
                        Environment::with_prefix(prefix)
                            .separator(&self.env_separator)
                            .try_parsing(true),
                    );
                }
            }
        }

        let config: Config = self.inner.build()?.try_deserialize()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Detect file format from extension
    fn detect_format(path: &Path) -> FileFormat {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            Some("toml") => FileFormat::Toml,
            _ => FileFormat::Yaml,
        }
    }

    /// Validate the configuration
    pub fn validate(config: &Config) -> ConfigResult<()> {
        if config.retention.expire_days == 0 {
            return Err(ConfigError::validation(
                "Tombstone expiry must be at least one day",
            ));
        }

        if config.transport.poll_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "Poll timeout must be greater than 0",
            ));
        }

        BufferSize::new(config.transport.buffer_size.get())
            .map_err(|e| ConfigError::invalid_value("transport.buffer_size", e))?;

        if !["trace", "debug", "info", "warn", "error"].contains(&config.logging.level.as_str()) {
            return Err(ConfigError::validation(
                "Log level must be one of: trace, debug, info, warn, error",
            ));
        }

        let mut names = HashSet::new();
        for directory in &config.directories {
            let name = directory.name.as_str();
            if !directory
                .name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric())
            {
                return Err(ConfigError::directory(
                    name,
                    "name must start with a letter or digit",
                ));
            }
            if directory.name.len() > MAX_NAME_LEN {
                return Err(ConfigError::directory(name, "name is too long"));
            }
            if directory.path.as_os_str().is_empty() {
                return Err(ConfigError::directory(name, "path is empty"));
            }
            if directory.expire_days == Some(0) {
                return Err(ConfigError::directory(
                    name,
                    "tombstone expiry must be at least one day",
                ));
            }
            if !names.insert(directory.name.as_str()) {
                return Err(ConfigError::directory(name, "defined twice"));
            }
        }

        Ok(())
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
