//! Domain-separated key derivation from one root secret
//!
//! All derived material is `SHA-256(raw_seed || domain_tag || salt?)`, so the
//! messaging and transport key pairs can be regenerated at any time from the
//! root seed alone and nothing derived needs to be stored.
//!
//! ```text
//! root seed (SU...) ──► raw 32 bytes ──┬── "auth" ──► Ed25519 (the seed itself)
//!                                      ├── "chat" ──► X25519  (messaging)
//!                                      └── "ssl"  ──► Ed25519 (transport / TLS)
//! ```

use super::codec::{encode_b64, KEY_SIZE};
use super::errors::CryptoResult;
use super::nkey;
use ed25519_dalek::SigningKey;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Purpose a key pair is derived for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyDomain {
    /// Broker authentication (the root identity itself)
    Auth,
    /// End-to-end message encryption
    Messaging,
    /// Cluster transport identity (TLS certificates)
    Transport,
}

impl KeyDomain {
    /// Tag mixed into the derivation hash
    pub fn tag(&self) -> &'static str {
        match self {
            KeyDomain::Auth => "auth",
            KeyDomain::Messaging => "chat",
            KeyDomain::Transport => "ssl",
        }
    }

    pub fn all() -> [KeyDomain; 3] {
        [KeyDomain::Auth, KeyDomain::Messaging, KeyDomain::Transport]
    }
}

impl fmt::Display for KeyDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Key type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    /// Ed25519 for signatures
    Ed25519,
    /// X25519 for Diffie-Hellman key agreement
    X25519,
}

/// Key pair derived for one domain
#[derive(Clone)]
pub struct DerivedKeyPair {
    pub domain: KeyDomain,
    pub key_type: KeyType,
    private_key: Zeroizing<Vec<u8>>,
    pub public_key: Vec<u8>,
}

impl DerivedKeyPair {
    fn new(domain: KeyDomain, key_type: KeyType, private_key: &[u8], public_key: &[u8]) -> Self {
        Self {
            domain,
            key_type,
            private_key: Zeroizing::new(private_key.to_vec()),
            public_key: public_key.to_vec(),
        }
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    pub fn private_key_b64(&self) -> String {
        encode_b64(&self.private_key)
    }

    pub fn public_key_b64(&self) -> String {
        encode_b64(&self.public_key)
    }
}

impl fmt::Debug for DerivedKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeyPair")
            .field("domain", &self.domain)
            .field("key_type", &self.key_type)
            .field("public_key", &hex::encode(&self.public_key))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Derives every non-root key from one user seed
///
/// The raw seed is held in memory for the lifetime of the manager and
/// zeroized on drop.
pub struct KeyManager {
    raw_seed: Zeroizing<[u8; KEY_SIZE]>,
    public_identity: String,
}

impl KeyManager {
    /// Build a manager from a `SU...` user seed
    pub fn from_seed(seed: &str) -> CryptoResult<Self> {
        let raw_seed = nkey::decode_user_seed(seed)?;
        let signing_key = SigningKey::from_bytes(&raw_seed);
        let public_identity = nkey::encode_user_public(&signing_key.verifying_key().to_bytes());

        Ok(Self {
            raw_seed,
            public_identity,
        })
    }

    /// Root identity public key (`U...`)
    pub fn public_identity(&self) -> &str {
        &self.public_identity
    }

    /// 32 bytes of domain key material
    pub fn derive_key_material(&self, domain: KeyDomain, salt: Option<&[u8]>) -> Zeroizing<[u8; KEY_SIZE]> {
        hash_material(self.raw_seed.as_ref(), domain.tag().as_bytes(), salt)
    }

    /// X25519 pair for the direct message scheme; the private scalar is the material
    pub fn messaging_key_pair(&self) -> DerivedKeyPair {
        let material = self.derive_key_material(KeyDomain::Messaging, None);
        let public = X25519PublicKey::from(&StaticSecret::from(*material));
        DerivedKeyPair::new(KeyDomain::Messaging, KeyType::X25519, material.as_ref(), public.as_bytes())
    }

    /// Ed25519 pair used as the cluster transport identity
    pub fn transport_key_pair(&self) -> DerivedKeyPair {
        let material = self.derive_key_material(KeyDomain::Transport, None);
        let signing_key = SigningKey::from_bytes(&material);
        DerivedKeyPair::new(
            KeyDomain::Transport,
            KeyType::Ed25519,
            material.as_ref(),
            signing_key.verifying_key().as_bytes(),
        )
    }

    /// The root identity itself as an Ed25519 pair
    pub fn auth_key_pair(&self) -> DerivedKeyPair {
        let signing_key = SigningKey::from_bytes(&self.raw_seed);
        DerivedKeyPair::new(
            KeyDomain::Auth,
            KeyType::Ed25519,
            self.raw_seed.as_ref(),
            signing_key.verifying_key().as_bytes(),
        )
    }

    /// Signing key of the transport pair, for certificate generation
    pub(crate) fn transport_signing_key(&self) -> SigningKey {
        let material = self.derive_key_material(KeyDomain::Transport, None);
        SigningKey::from_bytes(&material)
    }

    pub fn key_pair(&self, domain: KeyDomain) -> DerivedKeyPair {
        match domain {
            KeyDomain::Auth => self.auth_key_pair(),
            KeyDomain::Messaging => self.messaging_key_pair(),
            KeyDomain::Transport => self.transport_key_pair(),
        }
    }

    /// Every domain mapped to its pair
    pub fn derive_all_keys(&self) -> HashMap<KeyDomain, DerivedKeyPair> {
        KeyDomain::all()
            .into_iter()
            .map(|domain| (domain, self.key_pair(domain)))
            .collect()
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("public_identity", &self.public_identity)
            .finish_non_exhaustive()
    }
}

/// Key material for `domain` straight from a `SU...` seed
pub fn derive_key_material(
    root_secret: &str,
    domain: KeyDomain,
    salt: Option<&[u8]>,
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let raw_seed = nkey::decode_user_seed(root_secret)?;
    Ok(hash_material(raw_seed.as_ref(), domain.tag().as_bytes(), salt))
}

/// X25519 messaging pair straight from a `SU...` seed
pub fn messaging_key_pair(root_secret: &str) -> CryptoResult<DerivedKeyPair> {
    Ok(KeyManager::from_seed(root_secret)?.messaging_key_pair())
}

/// Ed25519 transport pair straight from a `SU...` seed
pub fn transport_key_pair(root_secret: &str) -> CryptoResult<DerivedKeyPair> {
    Ok(KeyManager::from_seed(root_secret)?.transport_key_pair())
}

/// Messaging public key of a peer known only by its root identity (`U...`)
///
/// Derived, not negotiated: the scalar is `SHA-256(peer_public || "chat")`.
/// Anyone holding the peer's public identity can compute that scalar, and the
/// result does not match the key the peer derives from its own seed. It only
/// interoperates when every participant publishes keys under this same
/// convention, and it offers no confidentiality against third parties.
pub fn derive_public_from_peer_identity(peer_public: &str) -> CryptoResult<[u8; KEY_SIZE]> {
    nkey::decode_user_public(peer_public)?;
    let scalar = hash_material(peer_public.as_bytes(), KeyDomain::Messaging.tag().as_bytes(), None);
    Ok(X25519PublicKey::from(&StaticSecret::from(*scalar)).to_bytes())
}

/// Transport (Ed25519) variant of [`derive_public_from_peer_identity`], same caveats
pub fn derive_transport_public_from_peer_identity(peer_public: &str) -> CryptoResult<[u8; KEY_SIZE]> {
    nkey::decode_user_public(peer_public)?;
    let seed = hash_material(peer_public.as_bytes(), KeyDomain::Transport.tag().as_bytes(), None);
    Ok(SigningKey::from_bytes(&seed).verifying_key().to_bytes())
}

/// Check a root secret is a well-formed user seed
pub fn validate_root_secret(root_secret: &str) -> CryptoResult<()> {
    nkey::decode_user_seed(root_secret).map(|_| ())
}

/// Random 32-byte group key, base64 encoded
pub fn generate_group_key() -> String {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    rand::rng().fill_bytes(key.as_mut());
    encode_b64(key.as_ref())
}

fn hash_material(input: &[u8], tag: &[u8], salt: Option<&[u8]>) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.update(tag);
    if let Some(salt) = salt {
        hasher.update(salt);
    }
    Zeroizing::new(hasher.finalize().into())
}
