//! Broker error types

use crate::error::ErrorCategory;
use thiserror::Error;

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Payload of {size} bytes exceeds limit of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Authorization Violation")]
    AuthorizationViolation,

    #[error("Invalid authorization config: {0}")]
    AuthConfig(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl BrokerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BrokerError::Io(_)
            | BrokerError::Bind { .. }
            | BrokerError::Connect(_)
            | BrokerError::ConnectionClosed
            | BrokerError::InvalidUrl { .. }
            | BrokerError::Timeout(_) => ErrorCategory::Network,
            BrokerError::InvalidSubject(_)
            | BrokerError::Protocol(_)
            | BrokerError::FrameTooLarge { .. }
            | BrokerError::PayloadTooLarge { .. }
            | BrokerError::Server(_) => ErrorCategory::Protocol,
            BrokerError::AuthorizationViolation
            | BrokerError::AuthConfig(_)
            | BrokerError::Tls(_) => ErrorCategory::Configuration,
        }
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        BrokerError::Io(err.to_string())
    }
}

impl From<bincode::Error> for BrokerError {
    fn from(err: bincode::Error) -> Self {
        BrokerError::Protocol(err.to_string())
    }
}
