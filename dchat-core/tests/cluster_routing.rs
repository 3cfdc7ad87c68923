//! Small clusters: route formation and discovery, route permissions and chat
//! across nodes

mod common;

use common::{befriend, local_node, peer, start_node};
use dchat_core::broker::{BrokerClient, ClientOptions};
use dchat_core::chat::direct_subject;
use dchat_core::config::Config;
use dchat_core::crypto::generate_group_key;
use dchat_core::node::{NodeConfig, NodeManager};
use dchat_core::ChatService;
use dchat_core::test_utils::{recv_unbounded_timeout, wait_until, DEFAULT_TEST_TIMEOUT, SHORT_TEST_TIMEOUT};

async fn seed_url(node: &NodeManager) -> String {
    node.get_cluster_url().await.expect("cluster listener should be bound")
}

async fn wait_for_routes(nodes: &[&NodeManager]) {
    wait_for_route_count(nodes, 1).await;
}

async fn wait_for_route_count(nodes: &[&NodeManager], count: usize) {
    for node in nodes {
        let formed = wait_until(DEFAULT_TEST_TIMEOUT, || async {
            node.get_cluster_info().await.peer_route_count == count
        })
        .await;
        assert!(formed, "each node should hold {} route(s)", count);
    }
}

async fn wait_for_interest(node: &NodeManager, subject: &str) {
    let propagated = wait_until(DEFAULT_TEST_TIMEOUT, || async { node.remote_interest(subject).await > 0 }).await;
    assert!(propagated, "interest in {} should reach the other node", subject);
}

#[tokio::test]
async fn test_seed_route_forms_on_both_sides() {
    let a = local_node("node-a").await;
    let b = start_node(NodeConfig::local("node-b", 0, 0, vec![seed_url(&a).await])).await;

    wait_for_routes(&[&a, &b]).await;

    let info = b.get_cluster_info().await;
    assert!(info.running);
    assert_eq!(info.node_id, "node-b");
    assert!(info.cluster_url.is_some());
}

#[tokio::test]
async fn test_messages_cross_the_route() {
    let a = local_node("node-a").await;
    let b = start_node(NodeConfig::local("node-b", 0, 0, vec![seed_url(&a).await])).await;
    wait_for_routes(&[&a, &b]).await;

    let on_b = BrokerClient::connect(&b.get_client_url().await, ClientOptions::named("sub"))
        .await
        .unwrap();
    let mut sub = on_b.subscribe("news.>").await.unwrap();
    wait_for_interest(&a, "news.today").await;

    let on_a = BrokerClient::connect(&a.get_client_url().await, ClientOptions::named("pub"))
        .await
        .unwrap();
    on_a.publish("news.today", b"extra").await.unwrap();

    let msg = tokio::time::timeout(DEFAULT_TEST_TIMEOUT, sub.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.subject, "news.today");
    assert_eq!(msg.payload, b"extra");
}

/// **Integration Test: Route Discovery**
///
/// B seeds A and C seeds B. Gossip gives A and C a direct route to each
/// other, so a message published on A reaches a subscriber on C.
#[tokio::test]
async fn test_chained_seeds_form_full_mesh() {
    let a = local_node("node-a").await;
    let b = start_node(NodeConfig::local("node-b", 0, 0, vec![seed_url(&a).await])).await;
    let c = start_node(NodeConfig::local("node-c", 0, 0, vec![seed_url(&b).await])).await;

    wait_for_route_count(&[&a, &b, &c], 2).await;

    let on_c = BrokerClient::connect(&c.get_client_url().await, ClientOptions::named("sub"))
        .await
        .unwrap();
    let mut sub = on_c.subscribe("dchat.grp.g1.msg").await.unwrap();
    wait_for_interest(&a, "dchat.grp.g1.msg").await;

    let on_a = BrokerClient::connect(&a.get_client_url().await, ClientOptions::named("pub"))
        .await
        .unwrap();
    on_a.publish("dchat.grp.g1.msg", b"two hops away").await.unwrap();

    let msg = tokio::time::timeout(DEFAULT_TEST_TIMEOUT, sub.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.payload, b"two hops away");

    // Full mesh: the message is not relayed a second time through B
    let again = tokio::time::timeout(SHORT_TEST_TIMEOUT, sub.next()).await;
    assert!(again.is_err());
}

/// **Integration Test: Import Permissions**
///
/// Node B only imports `allowed.>`. Its client subscribes to both an allowed
/// and a blocked subject; only the allowed interest is advertised and only
/// allowed messages arrive.
#[tokio::test]
async fn test_import_permissions_filter_routed_messages() {
    let a = local_node("node-a").await;
    let b = start_node(NodeConfig::with_permissions(
        "node-b",
        0,
        0,
        vec![seed_url(&a).await],
        vec!["allowed.>".into()],
    ))
    .await;
    wait_for_routes(&[&a, &b]).await;

    let on_b = BrokerClient::connect(&b.get_client_url().await, ClientOptions::named("sub"))
        .await
        .unwrap();
    let mut allowed = on_b.subscribe("allowed.one").await.unwrap();
    let mut blocked = on_b.subscribe("blocked.one").await.unwrap();
    wait_for_interest(&a, "allowed.one").await;
    assert_eq!(a.remote_interest("blocked.one").await, 0);

    let on_a = BrokerClient::connect(&a.get_client_url().await, ClientOptions::named("pub"))
        .await
        .unwrap();
    on_a.publish("blocked.one", b"nope").await.unwrap();
    on_a.publish("allowed.one", b"yes").await.unwrap();

    let msg = tokio::time::timeout(DEFAULT_TEST_TIMEOUT, allowed.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.payload, b"yes");
    assert!(tokio::time::timeout(SHORT_TEST_TIMEOUT, blocked.next()).await.is_err());
}

#[tokio::test]
async fn test_export_permissions_limit_forwarding() {
    let mut a_config = NodeConfig::local("node-a", 0, 0, vec![]);
    a_config.export_allow = vec!["public.>".into()];
    let a = start_node(a_config).await;
    let b = start_node(NodeConfig::local("node-b", 0, 0, vec![seed_url(&a).await])).await;
    wait_for_routes(&[&a, &b]).await;

    let on_b = BrokerClient::connect(&b.get_client_url().await, ClientOptions::named("sub"))
        .await
        .unwrap();
    let mut public = on_b.subscribe("public.news").await.unwrap();
    let mut private = on_b.subscribe("private.news").await.unwrap();
    wait_for_interest(&a, "public.news").await;
    assert_eq!(a.remote_interest("private.news").await, 0);

    let on_a = BrokerClient::connect(&a.get_client_url().await, ClientOptions::named("pub"))
        .await
        .unwrap();
    on_a.publish("private.news", b"secret").await.unwrap();
    on_a.publish("public.news", b"headline").await.unwrap();

    let msg = tokio::time::timeout(DEFAULT_TEST_TIMEOUT, public.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.payload, b"headline");
    assert!(tokio::time::timeout(SHORT_TEST_TIMEOUT, private.next()).await.is_err());
}

#[tokio::test]
async fn test_add_subscribe_permission_opens_subject() {
    let a = local_node("node-a").await;
    let b = start_node(NodeConfig::with_permissions(
        "node-b",
        0,
        0,
        vec![seed_url(&a).await],
        vec!["allowed.>".into()],
    ))
    .await;
    wait_for_routes(&[&a, &b]).await;

    b.add_subscribe_permission("late.>").await.unwrap();
    assert!(b.last_config().await.unwrap().import_allow.contains(&"late.>".to_string()));
    wait_for_routes(&[&a, &b]).await;

    let on_b = BrokerClient::connect(&b.get_client_url().await, ClientOptions::named("sub"))
        .await
        .unwrap();
    let _sub = on_b.subscribe("late.arrival").await.unwrap();
    wait_for_interest(&a, "late.arrival").await;
}

/// **Integration Test: Chat Across Nodes**
///
/// Alice is connected to node A and Bob to node B. Each joins the shared
/// conversation on their own node and messages flow over the route.
#[tokio::test]
async fn test_direct_chat_between_nodes() {
    let a = local_node("node-a").await;
    let b = start_node(NodeConfig::local("node-b", 0, 0, vec![seed_url(&a).await])).await;
    wait_for_routes(&[&a, &b]).await;

    let mut alice = peer(&a.get_client_url().await, "alice").await;
    let mut bob = peer(&b.get_client_url().await, "bob").await;
    befriend(&alice, "alice", &bob, "bob").await;
    alice.service.join_direct("bob").await.unwrap();
    bob.service.join_direct("alice").await.unwrap();

    let subject = direct_subject(alice.service.namespace(), &alice.service.conversation_id("bob").await);
    wait_for_interest(&a, &subject).await;
    wait_for_interest(&b, &subject).await;

    alice.service.send_direct("bob", b"over the route").await.unwrap();
    let received = recv_unbounded_timeout(&mut bob.messages, DEFAULT_TEST_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(received.sender, "alice");
    assert_eq!(received.text(), "over the route");
    assert!(!received.is_group);

    bob.service.send_direct("alice", b"and back").await.unwrap();
    let received = recv_unbounded_timeout(&mut alice.messages, DEFAULT_TEST_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(received.text(), "and back");
}

/// **Integration Test: Nodes and Services From Config**
///
/// Both nodes are built from a `Config` using the `team` namespace, so they
/// import only that namespace's chat subjects. A group message crosses the
/// route; a subject outside the namespace is never advertised.
#[tokio::test]
async fn test_config_built_nodes_route_their_namespace() {
    let mut config = Config::default();
    config.chat.namespace = "team".to_string();
    config.node.client_port = 0;
    config.node.cluster_port = 0;

    let a = start_node(config.node_config()).await;
    let mut config_b = config.clone();
    config_b.node.seed_routes = vec![seed_url(&a).await];
    let b = start_node(config_b.node_config()).await;
    wait_for_routes(&[&a, &b]).await;

    let alice = ChatService::connect_with_config(&a.get_client_url().await, &config)
        .await
        .unwrap();
    let bob = ChatService::connect_with_config(&b.get_client_url().await, &config_b)
        .await
        .unwrap();
    alice.set_user_id("alice").await;
    bob.set_user_id("bob").await;
    let (tx, mut received) = tokio::sync::mpsc::unbounded_channel();
    bob.on_decrypted(move |m| {
        let _ = tx.send(m.clone());
    })
    .await;

    let key = generate_group_key();
    for service in [&alice, &bob] {
        service.cache_group_key("crew", &key).await.unwrap();
        service.join_group("crew").await.unwrap();
    }
    wait_for_interest(&a, "team.grp.crew.msg").await;

    alice.send_group("crew", b"team only").await.unwrap();
    let msg = recv_unbounded_timeout(&mut received, DEFAULT_TEST_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(msg.text(), "team only");
    assert!(msg.is_group);

    let outsider = BrokerClient::connect(&b.get_client_url().await, ClientOptions::named("outsider"))
        .await
        .unwrap();
    let _sub = outsider.subscribe("dchat.grp.crew.msg").await.unwrap();
    let leaked = wait_until(SHORT_TEST_TIMEOUT, || async { a.remote_interest("dchat.grp.crew.msg").await > 0 }).await;
    assert!(!leaked);
}
