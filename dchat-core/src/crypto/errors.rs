//! Crypto error types

use crate::error::ErrorCategory;
use thiserror::Error;

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by key derivation, sealing and certificate generation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Root secret is empty, malformed or not a user seed
    #[error("Invalid root secret: {0}")]
    InvalidRootSecret(String),

    /// Key material has the wrong length
    #[error("Invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },

    /// Nonce has the wrong length
    #[error("Invalid nonce size: expected {expected}, got {actual}")]
    InvalidNonceSize { expected: usize, actual: usize },

    /// Authentication failed while opening a sealed payload
    #[error("Decryption failed: authentication tag mismatch")]
    DecryptFailed,

    /// Sealing failed
    #[error("Encryption failed: {0}")]
    EncryptFailed(String),

    /// Base64/base32/hex decoding failed
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Public key string is not a user public key
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Certificate generation failed
    #[error("Certificate error: {0}")]
    Certificate(String),
}

impl CryptoError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CryptoError::InvalidRootSecret(_) => ErrorCategory::Configuration,
            _ => ErrorCategory::Crypto,
        }
    }
}
