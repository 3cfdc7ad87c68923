//! Shared fixtures for integration tests

#![allow(dead_code)]

use dchat_core::broker::ClientOptions;
use dchat_core::chat::{ChatError, ChatService, DecryptedMessage, DEFAULT_NAMESPACE};
use dchat_core::crypto::{messaging_key_pair, nkey::generate_user_seed};
use dchat_core::node::{NodeConfig, NodeManager};
use tokio::sync::mpsc;

/// Chat participant with its decrypted-message and error streams
pub struct Peer {
    pub service: ChatService,
    pub public_key: String,
    pub messages: mpsc::UnboundedReceiver<DecryptedMessage>,
    pub errors: mpsc::UnboundedReceiver<ChatError>,
}

/// Start a node on ephemeral ports
pub async fn start_node(config: NodeConfig) -> NodeManager {
    let node = NodeManager::new();
    node.start(config).await.expect("node should start");
    node
}

pub async fn local_node(id: &str) -> NodeManager {
    start_node(NodeConfig::local(id, 0, 0, vec![])).await
}

/// Connect a chat service as `id` with a fresh messaging key pair
pub async fn peer(url: &str, id: &str) -> Peer {
    peer_with_options(url, id, ClientOptions::named(id)).await
}

pub async fn peer_with_options(url: &str, id: &str, options: ClientOptions) -> Peer {
    let service = ChatService::connect(url, options, DEFAULT_NAMESPACE)
        .await
        .expect("chat service should connect");
    service.set_user_id(id).await;

    let seed = generate_user_seed();
    service.set_root_key_material(&seed).await.unwrap();
    let public_key = messaging_key_pair(&seed).unwrap().public_key_b64();

    let (msg_tx, messages) = mpsc::unbounded_channel();
    service
        .on_decrypted(move |m| {
            let _ = msg_tx.send(m.clone());
        })
        .await;
    let (err_tx, errors) = mpsc::unbounded_channel();
    service
        .on_error(move |e| {
            let _ = err_tx.send(e.clone());
        })
        .await;

    Peer {
        service,
        public_key,
        messages,
        errors,
    }
}

/// Exchange public keys out of band
pub async fn befriend(a: &Peer, a_id: &str, b: &Peer, b_id: &str) {
    a.service.cache_friend_key(b_id, &b.public_key).await.unwrap();
    b.service.cache_friend_key(a_id, &a.public_key).await.unwrap();
}
