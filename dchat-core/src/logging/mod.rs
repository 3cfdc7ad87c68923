//! Logging setup
//!
//! One `tracing` subscriber for the whole process, filtered by an
//! `EnvFilter`. `RUST_LOG` wins over the configured level when set.
//! Library code only emits events; installing the subscriber is left to the
//! embedding application.

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

/// Logging configuration, also the `[logging]` section of the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum level for every target
    pub level: LogLevel,
    pub with_timestamp: bool,
    pub with_target: bool,
    /// Emit JSON lines instead of human-readable text
    pub json_format: bool,
    /// Extra `target=level` directives, e.g. `dchat_core::broker=debug`
    pub directives: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_timestamp: true,
            with_target: true,
            json_format: false,
            directives: Vec::new(),
        }
    }
}

impl LogConfig {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.with_timestamp = enabled;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }

    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Build the filter this config describes
    pub fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        let mut filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::from(self.level).into())
            .parse_lossy("");
        for directive in &self.directives {
            let parsed = directive
                .parse()
                .map_err(|e: tracing_subscriber::filter::ParseError| {
                    LoggingError::InvalidDirective {
                        directive: directive.clone(),
                        reason: e.to_string(),
                    }
                })?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

/// Initialize logging at `info`
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize logging with a custom configuration
///
/// # Example
/// ```
/// use dchat_core::logging::{init_logging_with_config, LogConfig, LogLevel};
///
/// let config = LogConfig::new(LogLevel::Debug)
///     .with_target(false)
///     .directive("dchat_core::broker=trace");
///
/// init_logging_with_config(config).expect("Failed to initialize logging");
/// ```
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => config.env_filter()?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match (config.json_format, config.with_timestamp) {
        (true, true) => registry
            .with(fmt::layer().json().with_target(config.with_target))
            .try_init(),
        (true, false) => registry
            .with(fmt::layer().json().without_time().with_target(config.with_target))
            .try_init(),
        (false, true) => registry
            .with(fmt::layer().with_target(config.with_target))
            .try_init(),
        (false, false) => registry
            .with(fmt::layer().without_time().with_target(config.with_target))
            .try_init(),
    };

    result.map_err(|e| LoggingError::InitializationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert!(config.with_timestamp);
        assert!(config.with_target);
        assert!(!config.json_format);
        assert!(config.directives.is_empty());
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new(LogLevel::Debug)
            .with_timestamp(false)
            .with_target(false)
            .json_format(true)
            .directive("dchat_core::chat=trace");

        assert_eq!(config.level, LogLevel::Debug);
        assert!(!config.with_timestamp);
        assert!(!config.with_target);
        assert!(config.json_format);
        assert_eq!(config.directives, vec!["dchat_core::chat=trace".to_string()]);
    }

    #[test]
    fn test_env_filter_accepts_directives() {
        let config = LogConfig::new(LogLevel::Warn).directive("dchat_core::broker=debug");
        assert!(config.env_filter().is_ok());
    }

    #[test]
    fn test_env_filter_rejects_bad_directive() {
        let config = LogConfig::default().directive("dchat_core=notalevel");
        assert!(matches!(config.env_filter(), Err(LoggingError::InvalidDirective { .. })));
    }

    #[test]
    fn test_log_config_toml_section() {
        let config: LogConfig = toml::from_str("level = \"debug\"\njson_format = true\n").unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.json_format);
        assert!(config.with_target);
    }
}
