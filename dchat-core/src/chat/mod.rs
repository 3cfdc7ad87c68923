//! End-to-end encrypted direct and group chat over the broker

pub mod cid;
pub mod envelope;
mod error;
pub mod handlers;
pub mod key_cache;
mod service;

pub use cid::{derive_cid, direct_subject, group_subject, CID_LEN};
pub use envelope::{DecryptedMessage, WireEnvelope};
pub use error::{ChatError, ChatResult};
pub use key_cache::{JsonFileKeyCache, KeyCacheStore, MemoryKeyCache, PersistedKeys};
pub use service::{ChatService, ChatStats, User, DEFAULT_NAMESPACE, DEFAULT_NICKNAME};
