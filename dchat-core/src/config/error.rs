//! Configuration error types

use crate::error::ErrorCategory;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to write {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),

    /// An environment override could not be parsed
    #[error("Invalid value for {key}: {reason}")]
    InvalidEnv { key: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub(crate) fn read(path: &Path, err: impl std::fmt::Display) -> Self {
        ConfigError::Read {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn write(path: &Path, err: impl std::fmt::Display) -> Self {
        ConfigError::Write {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ConfigError::Read { .. } | ConfigError::Write { .. } => ErrorCategory::Storage,
            _ => ErrorCategory::Configuration,
        }
    }
}
