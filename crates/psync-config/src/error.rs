//! Error types for configuration management

use psync_types::Error as PsyncError;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading or writing a configuration file
    #[error("I/O error on config file '{path}': {source}")]
    Io {
        /// Path to the configuration file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    Validation {
        /// Validation error message
        message: String,
    },

    /// Invalid configuration value
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    /// Invalid entry in the directory list
    #[error("Directory '{name}': {message}")]
    Directory {
        /// Name of the offending directory
        name: String,
        /// What is wrong with it
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message
        message: String,
    },

    /// Generic configuration error
    #[error("Configuration error: {message}")]
    Other {
        /// Error message
        message: String,
    },
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: error.to_string(),
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(error: config::ConfigError) -> Self {
        Self::Other {
            message: error.to_string(),
        }
    }
}

impl From<ConfigError> for PsyncError {
    fn from(error: ConfigError) -> Self {
        PsyncError::config(error.to_string())
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new invalid value error
    pub fn invalid_value<K: Into<String>, S: Into<String>>(key: K, message: S) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a new directory list error
    pub fn directory<N: Into<String>, S: Into<String>>(name: N, message: S) -> Self {
        Self::Directory {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a new other error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psync_types::ErrorKind;

    #[test]
    fn test_converts_to_psync_error() {
        let error: PsyncError = ConfigError::validation("no directories").into();
        assert_eq!(error.kind(), ErrorKind::Config);
        assert_eq!(error.exit_code(), 27);
        assert!(error.to_string().contains("no directories"));
    }

    #[test]
    fn test_directory_error_names_entry() {
        let error = ConfigError::directory("docs", "path is empty");
        assert_eq!(error.to_string(), "Directory 'docs': path is empty");
    }
}
