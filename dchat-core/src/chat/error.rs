use crate::broker::BrokerError;
use crate::crypto::CryptoError;
use crate::error::ErrorCategory;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("no messaging key pair configured")]
    KeyNotConfigured,

    #[error("no public key cached for friend '{0}'")]
    FriendKeyMissing(String),

    #[error("no key cached for group '{0}'")]
    GroupKeyMissing(String),

    #[error("invalid group id '{0}'")]
    InvalidGroupId(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("failed to decrypt message from '{sender}' in conversation {cid}")]
    DecryptFailed { cid: String, sender: String },

    #[error("key cache: {0}")]
    Storage(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl ChatError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ChatError::KeyNotConfigured
            | ChatError::FriendKeyMissing(_)
            | ChatError::GroupKeyMissing(_)
            | ChatError::InvalidGroupId(_) => ErrorCategory::Configuration,
            ChatError::MalformedEnvelope(_) => ErrorCategory::Protocol,
            ChatError::DecryptFailed { .. } => ErrorCategory::Crypto,
            ChatError::Storage(_) => ErrorCategory::Storage,
            ChatError::Crypto(e) => e.category(),
            ChatError::Broker(e) => e.category(),
        }
    }
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;
