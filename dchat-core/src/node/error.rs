use crate::broker::BrokerError;
use crate::crypto::CryptoError;
use crate::error::ErrorCategory;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("node is already running")]
    AlreadyRunning,

    #[error("node is not running")]
    NotRunning,

    #[error("broker did not become ready within {0:?}")]
    StartTimeout(Duration),

    #[error("broker start task failed: {0}")]
    StartFailed(String),

    #[error("invalid seed route '{url}': {reason}")]
    InvalidRoute { url: String, reason: String },

    #[error("cluster TLS requires a root secret")]
    RootSecretMissing,

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl NodeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            NodeError::AlreadyRunning | NodeError::NotRunning | NodeError::RootSecretMissing => {
                ErrorCategory::Configuration
            }
            NodeError::StartTimeout(_) | NodeError::StartFailed(_) | NodeError::InvalidRoute { .. } => {
                ErrorCategory::Network
            }
            NodeError::Broker(e) => e.category(),
            NodeError::Crypto(e) => e.category(),
        }
    }
}

pub type NodeResult<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            NodeError::StartTimeout(Duration::from_secs(5)).category(),
            ErrorCategory::Network
        );
        assert_eq!(
            NodeError::InvalidRoute {
                url: "bogus".into(),
                reason: "relative URL without a base".into()
            }
            .category(),
            ErrorCategory::Network
        );
        assert_eq!(NodeError::RootSecretMissing.category(), ErrorCategory::Configuration);
        assert_eq!(
            NodeError::Crypto(CryptoError::InvalidRootSecret("empty".into())).category(),
            ErrorCategory::Configuration
        );
    }
}
