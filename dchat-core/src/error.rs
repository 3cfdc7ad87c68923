//! Crate-wide error taxonomy
//!
//! Every module owns its error enum; [`ErrorCategory`] groups them so callers
//! can decide what is fatal (configuration, network during startup) and what
//! is a per-message event (crypto, protocol).

use thiserror::Error;

use crate::bootstrap::ProvisionError;
use crate::broker::BrokerError;
use crate::chat::ChatError;
use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::logging::LoggingError;
use crate::node::NodeError;

/// Coarse error class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or invalid secrets, keys or settings
    Configuration,
    /// Decryption failures, bad key or nonce sizes
    Crypto,
    /// Start timeouts, connect failures, bad route URLs
    Network,
    /// Malformed frames or envelopes
    Protocol,
    /// Key cache and file persistence
    Storage,
}

/// Any error produced by this crate
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Logging(#[from] LoggingError),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Crypto(e) => e.category(),
            Error::Broker(e) => e.category(),
            Error::Node(e) => e.category(),
            Error::Chat(e) => e.category(),
            Error::Config(e) => e.category(),
            Error::Logging(_) => ErrorCategory::Configuration,
            Error::Provision(e) => e.category(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
