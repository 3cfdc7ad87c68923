//! Key derivation and message encryption
//!
//! - [`nkey`]: root seed and identity public key encoding
//! - [`keys`]: domain-separated key pairs derived from one root seed
//! - [`codec`]: direct (NaCl box) and group (AES-256-GCM) sealing
//! - [`cert`]: self-signed TLS certificates from the transport key

pub mod cert;
pub mod codec;
pub mod errors;
pub mod keys;
pub mod nkey;

pub use cert::{TlsCertificate, DEFAULT_VALID_DAYS};
pub use codec::{open_direct, open_group, seal_direct, seal_group, Scheme, Sealed};
pub use errors::{CryptoError, CryptoResult};
pub use keys::{
    derive_key_material, derive_public_from_peer_identity,
    derive_transport_public_from_peer_identity, generate_group_key, messaging_key_pair,
    transport_key_pair, validate_root_secret, DerivedKeyPair, KeyDomain, KeyManager, KeyType,
};
