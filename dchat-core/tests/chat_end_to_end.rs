//! Direct and group chat through a single local node

mod common;

use common::{befriend, local_node, peer};
use dchat_core::chat::{direct_subject, ChatError, DEFAULT_NAMESPACE};
use dchat_core::crypto::generate_group_key;
use dchat_core::test_utils::{recv_unbounded_timeout, DEFAULT_TEST_TIMEOUT, SHORT_TEST_TIMEOUT};

/// **End-to-End Test: Direct Conversation**
///
/// Scenario:
/// 1. Alice and Bob connect to the same node with their own key pairs
/// 2. They exchange public keys out of band and join the conversation
/// 3. Alice sends to Bob, then Bob replies
/// 4. Each side sees exactly the other's message, never its own
#[tokio::test]
async fn test_direct_message_both_directions() {
    let node = local_node("e2e-direct").await;
    let url = node.get_client_url().await;

    let mut alice = peer(&url, "alice").await;
    let mut bob = peer(&url, "bob").await;
    befriend(&alice, "alice", &bob, "bob").await;

    alice.service.join_direct("bob").await.unwrap();
    bob.service.join_direct("alice").await.unwrap();
    assert_eq!(
        alice.service.conversation_id("bob").await,
        bob.service.conversation_id("alice").await
    );

    alice.service.send_direct("bob", b"hello B").await.unwrap();
    let received = recv_unbounded_timeout(&mut bob.messages, DEFAULT_TEST_TIMEOUT)
        .await
        .expect("bob should receive alice's message");
    assert_eq!(received.sender, "alice");
    assert_eq!(received.text(), "hello B");
    assert!(!received.is_group);
    assert_eq!(
        received.subject,
        direct_subject(DEFAULT_NAMESPACE, &received.cid)
    );

    bob.service.send_direct("alice", b"hello A").await.unwrap();
    let received = recv_unbounded_timeout(&mut alice.messages, DEFAULT_TEST_TIMEOUT)
        .await
        .expect("alice should receive bob's message");
    assert_eq!(received.sender, "bob");
    assert_eq!(received.text(), "hello A");

    // Own echoes are dropped on both sides
    assert!(recv_unbounded_timeout(&mut alice.messages, SHORT_TEST_TIMEOUT).await.is_err());
    assert!(recv_unbounded_timeout(&mut bob.messages, SHORT_TEST_TIMEOUT).await.is_err());
    assert!(recv_unbounded_timeout(&mut alice.errors, SHORT_TEST_TIMEOUT).await.is_err());

    node.stop().await.unwrap();
}

/// **End-to-End Test: Group Conversation**
///
/// Scenario:
/// 1. Alice and Bob cache the same group key under "g1" and join
/// 2. Alice sends; Bob receives the decrypted message
/// 3. Carol, without the key, cannot join and never subscribes
#[tokio::test]
async fn test_group_message_and_missing_key() {
    let node = local_node("e2e-group").await;
    let url = node.get_client_url().await;

    let alice = peer(&url, "alice").await;
    let mut bob = peer(&url, "bob").await;
    let carol = peer(&url, "carol").await;

    let group_key = generate_group_key();
    alice.service.cache_group_key("g1", &group_key).await.unwrap();
    bob.service.cache_group_key("g1", &group_key).await.unwrap();
    alice.service.join_group("g1").await.unwrap();
    bob.service.join_group("g1").await.unwrap();

    assert_eq!(
        carol.service.join_group("g1").await,
        Err(ChatError::GroupKeyMissing("g1".into()))
    );
    assert_eq!(carol.service.stats().await.active_subscriptions, 0);

    alice.service.send_group("g1", b"hi group").await.unwrap();
    let received = recv_unbounded_timeout(&mut bob.messages, DEFAULT_TEST_TIMEOUT)
        .await
        .expect("bob should receive the group message");
    assert_eq!(received.cid, "g1");
    assert_eq!(received.sender, "alice");
    assert_eq!(received.text(), "hi group");
    assert!(received.is_group);

    let stats = bob.service.stats().await;
    assert_eq!(stats.messages_delivered, 1);
    assert_eq!(stats.decrypt_failures, 0);
}

/// A third party that knows the subject cannot impersonate a friend
#[tokio::test]
async fn test_outsider_on_direct_subject_is_rejected() {
    let node = local_node("e2e-outsider").await;
    let url = node.get_client_url().await;

    let alice = peer(&url, "alice").await;
    let mut bob = peer(&url, "bob").await;
    let mallory = peer(&url, "mallory").await;
    befriend(&alice, "alice", &bob, "bob").await;
    bob.service.join_direct("alice").await.unwrap();

    // Mallory claims to be alice but seals with her own key
    mallory.service.cache_friend_key("bob", &bob.public_key).await.unwrap();
    mallory.service.set_user_id("alice").await;
    mallory.service.send_direct("bob", b"trust me").await.unwrap();

    let err = recv_unbounded_timeout(&mut bob.errors, DEFAULT_TEST_TIMEOUT)
        .await
        .expect("bob should report the forged message");
    assert!(matches!(err, ChatError::DecryptFailed { ref sender, .. } if sender == "alice"));
    assert!(recv_unbounded_timeout(&mut bob.messages, SHORT_TEST_TIMEOUT).await.is_err());

    // The real alice still gets through afterwards
    alice.service.send_direct("bob", b"it's me").await.unwrap();
    let received = recv_unbounded_timeout(&mut bob.messages, DEFAULT_TEST_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(received.text(), "it's me");
}

/// Messages keep flowing after a handler panics
#[tokio::test]
async fn test_panicking_handler_does_not_stop_delivery() {
    let node = local_node("e2e-panic").await;
    let url = node.get_client_url().await;

    let alice = peer(&url, "alice").await;
    let mut bob = peer(&url, "bob").await;
    befriend(&alice, "alice", &bob, "bob").await;
    bob.service.on_decrypted(|_| panic!("handler bug")).await;
    bob.service.join_direct("alice").await.unwrap();

    for text in ["one", "two"] {
        alice.service.send_direct("bob", text.as_bytes()).await.unwrap();
        let received = recv_unbounded_timeout(&mut bob.messages, DEFAULT_TEST_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(received.text(), text);
    }
}
