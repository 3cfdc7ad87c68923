//! Message sealing for direct and group conversations
//!
//! Two independent schemes share one output shape ([`Sealed`]):
//! - Direct: NaCl box (X25519 agreement + XSalsa20-Poly1305), 24-byte nonce
//! - Group: AES-256-GCM with a shared 32-byte key, 12-byte nonce
//!
//! Every call draws a fresh random nonce. Key and nonce lengths are checked
//! before any cipher is constructed.

use super::errors::{CryptoError, CryptoResult};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypto_box::{aead::generic_array::GenericArray, PublicKey, SalsaBox, SecretKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Size of every key handled here (X25519 scalars/points, AES-256 keys)
pub const KEY_SIZE: usize = 32;

/// Nonce size of the direct scheme (XSalsa20)
pub const BOX_NONCE_SIZE: usize = 24;

/// Nonce size of the group scheme (AES-GCM)
pub const GCM_NONCE_SIZE: usize = 12;

/// Authentication tag size shared by both schemes
pub const TAG_SIZE: usize = 16;

/// Encryption scheme used for a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheme {
    /// Pairwise NaCl box
    Direct,
    /// Shared-key AES-256-GCM
    Group,
}

impl Scheme {
    /// Algorithm name carried in the optional `alg` envelope field
    pub fn alg_name(&self) -> &'static str {
        match self {
            Scheme::Direct => "x25519-xsalsa20-poly1305",
            Scheme::Group => "aes-256-gcm",
        }
    }

    pub fn nonce_size(&self) -> usize {
        match self {
            Scheme::Direct => BOX_NONCE_SIZE,
            Scheme::Group => GCM_NONCE_SIZE,
        }
    }
}

/// Nonce and ciphertext (tag included) produced by a seal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Seal `plaintext` from `sender_private` to `recipient_public`
pub fn seal_direct(
    sender_private: &[u8],
    recipient_public: &[u8],
    plaintext: &[u8],
) -> CryptoResult<Sealed> {
    let salsa_box = direct_box(sender_private, recipient_public)?;

    let nonce = random_bytes(BOX_NONCE_SIZE);
    let ciphertext = salsa_box
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::EncryptFailed(e.to_string()))?;

    Ok(Sealed { nonce, ciphertext })
}

/// Open a direct-scheme payload sent by `sender_public` to `recipient_private`
pub fn open_direct(
    recipient_private: &[u8],
    sender_public: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
) -> CryptoResult<Vec<u8>> {
    let salsa_box = direct_box(recipient_private, sender_public)?;
    check_nonce(nonce, BOX_NONCE_SIZE)?;
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptFailed);
    }

    salsa_box
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}

/// Seal `plaintext` under a shared group key
pub fn seal_group(key: &[u8], plaintext: &[u8]) -> CryptoResult<Sealed> {
    let cipher = group_cipher(key)?;

    let nonce = random_bytes(GCM_NONCE_SIZE);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::EncryptFailed(e.to_string()))?;

    Ok(Sealed { nonce, ciphertext })
}

/// Open a group-scheme payload
pub fn open_group(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = group_cipher(key)?;
    check_nonce(nonce, GCM_NONCE_SIZE)?;
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptFailed);
    }

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}

/// Standard base64 encoding used for keys, nonces and ciphertext on the wire
pub fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_b64(encoded: &str) -> CryptoResult<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}

/// Decode a base64 key and check it is exactly [`KEY_SIZE`] bytes
pub fn decode_key_b64(encoded: &str) -> CryptoResult<[u8; KEY_SIZE]> {
    let bytes = decode_b64(encoded)?;
    to_key(&bytes)
}

fn direct_box(private: &[u8], public: &[u8]) -> CryptoResult<SalsaBox> {
    let secret = SecretKey::from(to_key(private)?);
    let public = PublicKey::from(to_key(public)?);
    Ok(SalsaBox::new(&public, &secret))
}

fn group_cipher(key: &[u8]) -> CryptoResult<Aes256Gcm> {
    let key = to_key(key)?;
    Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::InvalidKeySize {
        expected: KEY_SIZE,
        actual: key.len(),
    })
}

fn to_key(bytes: &[u8]) -> CryptoResult<[u8; KEY_SIZE]> {
    bytes.try_into().map_err(|_| CryptoError::InvalidKeySize {
        expected: KEY_SIZE,
        actual: bytes.len(),
    })
}

fn check_nonce(nonce: &[u8], expected: usize) -> CryptoResult<()> {
    if nonce.len() != expected {
        return Err(CryptoError::InvalidNonceSize {
            expected,
            actual: nonce.len(),
        });
    }
    Ok(())
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}
