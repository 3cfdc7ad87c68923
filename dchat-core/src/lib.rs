//! Encrypted peer-to-peer chat over an embedded publish/subscribe broker
//!
//! - [`crypto`]: root seed handling, domain-separated key derivation, sealing
//! - [`broker`]: embeddable broker server, cluster routes and client
//! - [`node`]: lifecycle of the local broker node
//! - [`chat`]: conversation ids, envelopes and the chat session service
//! - [`bootstrap`]: provisioning of seed, credentials and authorization files

pub mod bootstrap;
pub mod broker;
pub mod chat;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod node;
#[doc(hidden)]
pub mod test_utils;

pub use chat::{ChatError, ChatService, DecryptedMessage};
pub use config::Config;
pub use crypto::KeyManager;
pub use error::{Error, ErrorCategory, Result};
pub use logging::{init_logging, LogLevel};
pub use node::{NodeConfig, NodeManager};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = NodeConfig::default();
        assert_eq!(ErrorCategory::Network, ErrorCategory::Network);
    }
}
