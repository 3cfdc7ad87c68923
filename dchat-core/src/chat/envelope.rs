//! Wire envelope carried in every chat message
//!
//! ```json
//! {"cid":"<hex>","sender":"<id>","ts":1700000000,"nonce":"<b64>","cipher":"<b64>"}
//! ```

use super::error::{ChatError, ChatResult};
use crate::crypto::codec::{decode_b64, encode_b64};
use crate::crypto::{CryptoResult, Scheme, Sealed};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Conversation id, or the group id for group messages
    pub cid: String,
    pub sender: String,
    /// Unix seconds
    pub ts: i64,
    pub nonce: String,
    pub cipher: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl WireEnvelope {
    pub fn seal(cid: &str, sender: &str, scheme: Scheme, sealed: &Sealed) -> Self {
        Self {
            cid: cid.to_string(),
            sender: sender.to_string(),
            ts: chrono::Utc::now().timestamp(),
            nonce: encode_b64(&sealed.nonce),
            cipher: encode_b64(&sealed.ciphertext),
            alg: Some(scheme.alg_name().to_string()),
            sig: None,
        }
    }

    pub fn to_json(&self) -> ChatResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ChatError::MalformedEnvelope(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> ChatResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ChatError::MalformedEnvelope(e.to_string()))
    }

    /// Decoded nonce and ciphertext
    pub fn sealed(&self) -> CryptoResult<Sealed> {
        Ok(Sealed {
            nonce: decode_b64(&self.nonce)?,
            ciphertext: decode_b64(&self.cipher)?,
        })
    }
}

/// Inbound message after successful decryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub cid: String,
    pub sender: String,
    /// Unix seconds as stamped by the sender
    pub timestamp: i64,
    pub plaintext: Vec<u8>,
    pub is_group: bool,
    pub subject: String,
}

impl DecryptedMessage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.plaintext).into_owned()
    }
}
