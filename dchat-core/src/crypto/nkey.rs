//! NKey encoding for root seeds and identity public keys
//!
//! A root secret is a user seed of the form `SU...`:
//! ```text
//! base32([seed prefix | user prefix (2 bytes)] [raw seed: 32 bytes] [crc16 LE: 2 bytes])
//! ```
//! The matching identity public key is `U...`:
//! ```text
//! base32([user prefix: 1 byte] [ed25519 public key: 32 bytes] [crc16 LE: 2 bytes])
//! ```
//! Base32 is RFC 4648 without padding; the checksum is CRC-16/XMODEM.

use super::errors::{CryptoError, CryptoResult};
use ed25519_dalek::SigningKey;
use zeroize::Zeroizing;

/// Prefix byte marking a seed
const PREFIX_BYTE_SEED: u8 = 18 << 3;

/// Prefix byte marking a user key
const PREFIX_BYTE_USER: u8 = 20 << 3;

/// Raw key length
pub const RAW_KEY_LEN: usize = 32;

/// String prefix every user seed starts with
pub const USER_SEED_PREFIX: &str = "SU";

/// String prefix every user public key starts with
pub const USER_PUBLIC_PREFIX: &str = "U";

const BASE32_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Encode a raw 32-byte seed as a user seed string
pub fn encode_user_seed(raw: &[u8; RAW_KEY_LEN]) -> String {
    let mut data = Zeroizing::new(Vec::with_capacity(2 + RAW_KEY_LEN + 2));
    data.push(PREFIX_BYTE_SEED | (PREFIX_BYTE_USER >> 5));
    data.push((PREFIX_BYTE_USER & 31) << 3);
    data.extend_from_slice(raw);
    let crc = crc16(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    base32_encode(&data)
}

/// Decode a user seed string into its raw 32 bytes
pub fn decode_user_seed(seed: &str) -> CryptoResult<Zeroizing<[u8; RAW_KEY_LEN]>> {
    if seed.is_empty() {
        return Err(CryptoError::InvalidRootSecret("seed is empty".to_string()));
    }
    if !seed.starts_with(USER_SEED_PREFIX) {
        return Err(CryptoError::InvalidRootSecret(
            "seed must start with the user seed prefix".to_string(),
        ));
    }

    let data = Zeroizing::new(
        base32_decode(seed).map_err(|e| CryptoError::InvalidRootSecret(e.to_string()))?,
    );
    if data.len() != 2 + RAW_KEY_LEN + 2 {
        return Err(CryptoError::InvalidRootSecret(format!(
            "decoded seed has {} bytes, expected {}",
            data.len(),
            2 + RAW_KEY_LEN + 2
        )));
    }

    let (body, checksum) = data.split_at(data.len() - 2);
    if crc16(body).to_le_bytes() != [checksum[0], checksum[1]] {
        return Err(CryptoError::InvalidRootSecret("seed checksum mismatch".to_string()));
    }

    if body[0] & 248 != PREFIX_BYTE_SEED {
        return Err(CryptoError::InvalidRootSecret("not a seed".to_string()));
    }
    let kind = ((body[0] & 7) << 5) | ((body[1] & 248) >> 3);
    if kind != PREFIX_BYTE_USER {
        return Err(CryptoError::InvalidRootSecret("seed is not a user seed".to_string()));
    }

    let mut raw = Zeroizing::new([0u8; RAW_KEY_LEN]);
    raw.copy_from_slice(&body[2..]);
    Ok(raw)
}

/// Encode an Ed25519 public key as a user public key string
pub fn encode_user_public(public: &[u8; RAW_KEY_LEN]) -> String {
    let mut data = Vec::with_capacity(1 + RAW_KEY_LEN + 2);
    data.push(PREFIX_BYTE_USER);
    data.extend_from_slice(public);
    let crc = crc16(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    base32_encode(&data)
}

/// Decode a user public key string into raw Ed25519 public key bytes
pub fn decode_user_public(public: &str) -> CryptoResult<[u8; RAW_KEY_LEN]> {
    if !public.starts_with(USER_PUBLIC_PREFIX) {
        return Err(CryptoError::InvalidPublicKey(
            "public key must start with the user prefix".to_string(),
        ));
    }

    let data = base32_decode(public).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    if data.len() != 1 + RAW_KEY_LEN + 2 {
        return Err(CryptoError::InvalidPublicKey(format!(
            "decoded public key has {} bytes, expected {}",
            data.len(),
            1 + RAW_KEY_LEN + 2
        )));
    }

    let (body, checksum) = data.split_at(data.len() - 2);
    if crc16(body).to_le_bytes() != [checksum[0], checksum[1]] {
        return Err(CryptoError::InvalidPublicKey("checksum mismatch".to_string()));
    }
    if body[0] != PREFIX_BYTE_USER {
        return Err(CryptoError::InvalidPublicKey("not a user public key".to_string()));
    }

    let mut raw = [0u8; RAW_KEY_LEN];
    raw.copy_from_slice(&body[1..]);
    Ok(raw)
}

/// Ed25519 signing key for a user seed
pub fn signing_key_from_seed(seed: &str) -> CryptoResult<SigningKey> {
    let raw = decode_user_seed(seed)?;
    Ok(SigningKey::from_bytes(&raw))
}

/// User public key string for a user seed
pub fn public_from_seed(seed: &str) -> CryptoResult<String> {
    let signing_key = signing_key_from_seed(seed)?;
    Ok(encode_user_public(&signing_key.verifying_key().to_bytes()))
}

/// Generate a fresh random user seed
pub fn generate_user_seed() -> String {
    use rand::RngCore;

    let mut raw = Zeroizing::new([0u8; RAW_KEY_LEN]);
    rand::rng().fill_bytes(raw.as_mut());
    encode_user_seed(&raw)
}

/// CRC-16/XMODEM (poly 0x1021, init 0)
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Base32 encoder (RFC 4648, no padding)
fn base32_encode(data: &[u8]) -> String {
    let mut result = String::with_capacity((data.len() * 8 + 4) / 5);

    let mut buffer: u64 = 0;
    let mut bits_left = 0;

    for &byte in data {
        buffer = (buffer << 8) | (byte as u64);
        bits_left += 8;

        while bits_left >= 5 {
            bits_left -= 5;
            let idx = ((buffer >> bits_left) & 0x1f) as usize;
            result.push(BASE32_ALPHABET[idx] as char);
        }
    }

    if bits_left > 0 {
        let idx = ((buffer << (5 - bits_left)) & 0x1f) as usize;
        result.push(BASE32_ALPHABET[idx] as char);
    }

    result
}

/// Base32 decoder (RFC 4648, no padding)
fn base32_decode(encoded: &str) -> CryptoResult<Vec<u8>> {
    let mut result = Vec::with_capacity(encoded.len() * 5 / 8);

    let mut buffer: u64 = 0;
    let mut bits_left = 0;

    for c in encoded.bytes() {
        let value = BASE32_ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| CryptoError::InvalidEncoding(format!("invalid base32 character {:?}", c as char)))?;

        buffer = (buffer << 5) | value as u64;
        bits_left += 5;

        if bits_left >= 8 {
            bits_left -= 8;
            result.push(((buffer >> bits_left) & 0xff) as u8);
        }
    }

    Ok(result)
}
