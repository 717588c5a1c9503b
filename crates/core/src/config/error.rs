//! Error types for settings loading.
//!
//! This module defines all errors that can occur while reading, parsing and
//! validating a manager settings file.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during settings loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read a settings file from disk.
    #[error("Failed to read config file at {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse TOML settings.
    #[error("Failed to parse TOML file at {path}: {source}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Failed to parse YAML settings.
    #[error("Failed to parse YAML file at {path}: {source}")]
    YamlParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// The file extension is neither TOML nor YAML.
    #[error("Unsupported config format for {path}: expected .toml, .yaml or .yml")]
    UnsupportedFormat { path: PathBuf },

    /// Settings parsed but hold values the manager cannot run with.
    #[error("Invalid configuration in {path}: {reason}")]
    InvalidConfig { path: PathBuf, reason: String },
}

/// Type alias for Result with ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;
