use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoggingError {
    /// Another global subscriber won the race
    #[error("logging already initialized: {0}")]
    InitializationFailed(String),

    #[error("unknown log level '{0}' (expected trace, debug, info, warn or error)")]
    InvalidLevel(String),

    #[error("bad filter directive {directive:?}: {reason}")]
    InvalidDirective { directive: String, reason: String },
}
