//! Two users chatting through a single local node
//!
//! Run with:
//! ```bash
//! cargo run --example local_chat
//! ```

use dchat_core::config::Config;
use dchat_core::crypto::{generate_group_key, messaging_key_pair, nkey::generate_user_seed};
use dchat_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use dchat_core::{ChatService, DecryptedMessage, NodeManager};
use std::time::Duration;
use tracing::info;

async fn user(url: &str, base: &Config, id: &str) -> anyhow::Result<(ChatService, String)> {
    let mut config = base.clone();
    config.chat.nickname = id.to_string();

    let seed = generate_user_seed();
    let service = ChatService::connect_with_config(url, &config).await?;
    service.set_user_id(id).await;
    service.set_root_key_material(&seed).await?;
    service
        .on_decrypted({
            let id = id.to_string();
            move |msg: &DecryptedMessage| info!(to = %id, from = %msg.sender, group = msg.is_group, text = %msg.text(), "received")
        })
        .await;
    Ok((service, messaging_key_pair(&seed)?.public_key_b64()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging_with_config(LogConfig::new(LogLevel::Info).with_target(false))?;

    let mut config = Config::default();
    config.node.node_id = "demo".to_string();
    config.node.client_port = 0;
    config.node.cluster_port = 0;

    let node = NodeManager::new();
    node.start(config.node_config()).await?;
    let url = node.get_client_url().await;

    let (alice, alice_key) = user(&url, &config, "alice").await?;
    let (bob, bob_key) = user(&url, &config, "bob").await?;
    alice.cache_friend_key("bob", &bob_key).await?;
    bob.cache_friend_key("alice", &alice_key).await?;
    alice.join_direct("bob").await?;
    bob.join_direct("alice").await?;

    alice.send_direct("bob", b"hi bob").await?;
    bob.send_direct("alice", b"hi alice").await?;

    let group_key = generate_group_key();
    for service in [&alice, &bob] {
        service.cache_group_key("lobby", &group_key).await?;
        service.join_group("lobby").await?;
    }
    alice.send_group("lobby", b"welcome to the lobby").await?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    info!(alice = ?alice.stats().await, bob = ?bob.stats().await, "done");
    node.stop().await?;
    Ok(())
}
