//! Chat session layer
//!
//! Binds the local identity, cached keys and broker subscriptions together.
//! All mutable state sits behind one reader/writer lock; handlers are invoked
//! on a snapshot taken under the read lock, never while holding it.
//!
//! Inbound pipeline, one task per joined subject:
//!
//! ```text
//! broker msg ─► classify subject ─► parse envelope ─► drop own echo
//!            ─► look up key ─► decrypt ─► on_decrypted handlers
//!                  (any failure) ─────────► on_error handlers, message dropped
//! ```

use super::cid::{classify, derive_cid, direct_subject, group_subject, validate_group_id, SubjectKind};
use super::envelope::{DecryptedMessage, WireEnvelope};
use super::error::{ChatError, ChatResult};
use super::handlers::{dispatch_error, dispatch_message, Handlers};
use super::key_cache::{JsonFileKeyCache, KeyCacheStore};
use crate::broker::{BrokerClient, ClientOptions, Message, Subscription};
use crate::config::{ChatSettings, Config};
use crate::crypto::codec::{decode_key_b64, encode_b64, open_direct, open_group, seal_direct, seal_group, KEY_SIZE};
use crate::crypto::{CryptoError, CryptoResult, KeyManager, Scheme};
use crate::metrics::{record_counter, CHAT_DECRYPT_FAILURES, CHAT_MESSAGES_DELIVERED};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// First token of every chat subject unless configured otherwise
pub const DEFAULT_NAMESPACE: &str = "dchat";
pub const DEFAULT_NICKNAME: &str = "Anonymous";

/// Local identity; `id` is what peers address and what conversation ids
/// are derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub nickname: String,
}

impl User {
    fn random(nickname: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            nickname: nickname.to_string(),
        }
    }
}

/// Counters since the service was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatStats {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub decrypt_failures: u64,
    pub active_subscriptions: usize,
    pub friend_keys: usize,
    pub group_keys: usize,
}

struct MessagingKeys {
    private: Zeroizing<[u8; KEY_SIZE]>,
    public: [u8; KEY_SIZE],
}

struct State {
    user: User,
    keys: Option<MessagingKeys>,
    friend_keys: HashMap<String, [u8; KEY_SIZE]>,
    group_keys: HashMap<String, Zeroizing<[u8; KEY_SIZE]>>,
    /// Receiver task per subscribed subject
    subscriptions: HashMap<String, JoinHandle<()>>,
    handlers: Handlers,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    delivered: AtomicU64,
    decrypt_failures: AtomicU64,
}

struct Inner {
    client: BrokerClient,
    namespace: String,
    state: RwLock<State>,
    store: Option<Arc<dyn KeyCacheStore>>,
    counters: Counters,
}

/// Encrypted direct and group messaging over a broker connection
#[derive(Clone)]
pub struct ChatService {
    inner: Arc<Inner>,
}

impl ChatService {
    /// Service on an existing connection, without a persistent key cache
    ///
    /// The user gets a random id and the default nickname until
    /// [`set_user_id`](Self::set_user_id) or [`set_identity`](Self::set_identity)
    /// is called.
    pub fn new(client: BrokerClient, namespace: impl Into<String>) -> Self {
        Self::build(client, namespace.into(), DEFAULT_NICKNAME, None)
    }

    /// Service whose key cache writes are mirrored to `store`
    pub fn with_key_store(
        client: BrokerClient,
        namespace: impl Into<String>,
        store: Arc<dyn KeyCacheStore>,
    ) -> Self {
        Self::build(client, namespace.into(), DEFAULT_NICKNAME, Some(store))
    }

    /// Service configured from the `[chat]` section
    ///
    /// Uses the configured namespace and nickname, and mirrors cached keys to
    /// a JSON file when `key_cache_path` is set. Call
    /// [`load_persisted_keys`](Self::load_persisted_keys) to read them back.
    pub fn from_settings(client: BrokerClient, settings: &ChatSettings) -> Self {
        let store = settings
            .key_cache_path
            .as_ref()
            .map(|path| Arc::new(JsonFileKeyCache::new(path)) as Arc<dyn KeyCacheStore>);
        Self::build(client, settings.namespace.clone(), &settings.nickname, store)
    }

    /// Connect to a broker and build a service on that connection
    pub async fn connect(url: &str, options: ClientOptions, namespace: impl Into<String>) -> ChatResult<Self> {
        let client = BrokerClient::connect(url, options).await?;
        Ok(Self::new(client, namespace))
    }

    /// Connect to `url` with the node's client options and the `[chat]` settings
    pub async fn connect_with_config(url: &str, config: &Config) -> ChatResult<Self> {
        let options = config.node.client_options(&config.chat.nickname);
        let client = BrokerClient::connect(url, options).await?;
        Ok(Self::from_settings(client, &config.chat))
    }

    fn build(
        client: BrokerClient,
        namespace: String,
        nickname: &str,
        store: Option<Arc<dyn KeyCacheStore>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                namespace,
                state: RwLock::new(State {
                    user: User::random(nickname),
                    keys: None,
                    friend_keys: HashMap::new(),
                    group_keys: HashMap::new(),
                    subscriptions: HashMap::new(),
                    handlers: Handlers::default(),
                }),
                store,
                counters: Counters::default(),
            }),
        }
    }

    /// Broker connection the service publishes and subscribes on
    pub fn client(&self) -> &BrokerClient {
        &self.inner.client
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Snapshot of the local identity
    pub async fn user(&self) -> User {
        self.inner.state.read().await.user.clone()
    }

    /// Change the nickname; the id stays the same
    pub async fn set_identity(&self, nickname: &str) {
        self.inner.state.write().await.user.nickname = nickname.to_string();
    }

    /// Replace the local id; conversation ids computed afterwards change with it
    pub async fn set_user_id(&self, id: &str) {
        self.inner.state.write().await.user.id = id.to_string();
    }

    /// Derive the messaging key pair from a `SU...` root seed
    pub async fn set_root_key_material(&self, seed: &str) -> ChatResult<()> {
        let pair = KeyManager::from_seed(seed)?.messaging_key_pair();
        let keys = MessagingKeys {
            private: Zeroizing::new(to_key(pair.private_key())?),
            public: to_key(&pair.public_key)?,
        };
        self.inner.state.write().await.keys = Some(keys);
        Ok(())
    }

    /// Use explicit X25519 key material, both base64
    pub async fn set_key_pair(&self, private_b64: &str, public_b64: &str) -> ChatResult<()> {
        let private = Zeroizing::new(decode_key_b64(private_b64)?);
        let public = decode_key_b64(public_b64)?;

        let expected = X25519PublicKey::from(&StaticSecret::from(*private)).to_bytes();
        if expected != public {
            return Err(CryptoError::InvalidPublicKey("does not match the private key".to_string()).into());
        }

        self.inner.state.write().await.keys = Some(MessagingKeys { private, public });
        Ok(())
    }

    /// Own messaging public key, base64, for exchange with friends
    pub async fn messaging_public_key(&self) -> Option<String> {
        let state = self.inner.state.read().await;
        state.keys.as_ref().map(|k| encode_b64(&k.public))
    }

    /// Conversation id shared with `peer_id`, the same on both sides
    pub async fn conversation_id(&self, peer_id: &str) -> String {
        derive_cid(&self.inner.state.read().await.user.id, peer_id)
    }

    /// Cache a friend's messaging public key (base64)
    ///
    /// A failing persistent mirror is reported to the error handlers; the
    /// in-memory cache is updated regardless.
    pub async fn cache_friend_key(&self, peer_id: &str, public_key_b64: &str) -> ChatResult<()> {
        let key = decode_key_b64(public_key_b64)?;
        self.inner
            .state
            .write()
            .await
            .friend_keys
            .insert(peer_id.to_string(), key);

        if let Some(store) = &self.inner.store {
            if let Err(e) = store.put_friend_key(peer_id, public_key_b64) {
                self.inner.report(e).await;
            }
        }
        Ok(())
    }

    /// Cache a group's 32-byte symmetric key (base64)
    pub async fn cache_group_key(&self, group_id: &str, key_b64: &str) -> ChatResult<()> {
        validate_group_id(group_id)?;
        let key = Zeroizing::new(decode_key_b64(key_b64)?);
        self.inner
            .state
            .write()
            .await
            .group_keys
            .insert(group_id.to_string(), key);

        if let Some(store) = &self.inner.store {
            if let Err(e) = store.put_group_key(group_id, key_b64) {
                self.inner.report(e).await;
            }
        }
        Ok(())
    }

    /// Load keys from the persistent store into memory
    ///
    /// Entries that fail to decode are reported and skipped. Returns how many
    /// keys were loaded.
    pub async fn load_persisted_keys(&self) -> ChatResult<usize> {
        let Some(store) = &self.inner.store else {
            return Ok(0);
        };
        let persisted = store.load()?;

        let mut friends = Vec::new();
        let mut groups = Vec::new();
        let mut rejected = Vec::new();
        for (peer, key) in &persisted.friend_keys {
            match decode_key_b64(key) {
                Ok(key) => friends.push((peer.clone(), key)),
                Err(e) => rejected.push(ChatError::from(e)),
            }
        }
        for (gid, key) in &persisted.group_keys {
            match validate_group_id(gid).and_then(|_| Ok(decode_key_b64(key)?)) {
                Ok(key) => groups.push((gid.clone(), Zeroizing::new(key))),
                Err(e) => rejected.push(e),
            }
        }

        let loaded = friends.len() + groups.len();
        {
            let mut state = self.inner.state.write().await;
            state.friend_keys.extend(friends);
            state.group_keys.extend(groups);
        }
        for e in rejected {
            self.inner.report(e).await;
        }

        debug!(loaded, "loaded persisted keys");
        Ok(loaded)
    }

    /// Subscribe to the direct conversation with `peer_id`
    ///
    /// Joining a conversation that is already joined is a no-op.
    pub async fn join_direct(&self, peer_id: &str) -> ChatResult<()> {
        let mut state = self.inner.state.write().await;
        if !state.friend_keys.contains_key(peer_id) {
            return Err(ChatError::FriendKeyMissing(peer_id.to_string()));
        }

        let cid = derive_cid(&state.user.id, peer_id);
        let subject = direct_subject(&self.inner.namespace, &cid);
        self.subscribe_locked(&mut state, subject).await?;
        debug!(%cid, peer = %peer_id, "joined direct conversation");
        Ok(())
    }

    /// Subscribe to a group conversation
    pub async fn join_group(&self, group_id: &str) -> ChatResult<()> {
        validate_group_id(group_id)?;
        let mut state = self.inner.state.write().await;
        if !state.group_keys.contains_key(group_id) {
            return Err(ChatError::GroupKeyMissing(group_id.to_string()));
        }

        let subject = group_subject(&self.inner.namespace, group_id);
        self.subscribe_locked(&mut state, subject).await?;
        debug!(gid = %group_id, "joined group");
        Ok(())
    }

    async fn subscribe_locked(&self, state: &mut State, subject: String) -> ChatResult<()> {
        if state.subscriptions.contains_key(&subject) {
            return Ok(());
        }

        let subscription = self.inner.client.subscribe(&subject).await?;
        let task = spawn_receiver(Arc::downgrade(&self.inner), subscription);
        state.subscriptions.insert(subject, task);
        Ok(())
    }

    /// Encrypt `plaintext` for `peer_id` and publish it on the conversation subject
    ///
    /// Fails with `KeyNotConfigured` before a key pair is set and with
    /// `FriendKeyMissing` when the peer's public key is not cached. Joining
    /// is not required to send.
    pub async fn send_direct(&self, peer_id: &str, plaintext: &[u8]) -> ChatResult<()> {
        let (subject, envelope) = {
            let state = self.inner.state.read().await;
            let keys = state.keys.as_ref().ok_or(ChatError::KeyNotConfigured)?;
            let peer_key = state
                .friend_keys
                .get(peer_id)
                .ok_or_else(|| ChatError::FriendKeyMissing(peer_id.to_string()))?;

            let cid = derive_cid(&state.user.id, peer_id);
            let sealed = seal_direct(keys.private.as_ref(), peer_key, plaintext)?;
            let envelope = WireEnvelope::seal(&cid, &state.user.id, Scheme::Direct, &sealed);
            (direct_subject(&self.inner.namespace, &cid), envelope)
        };

        self.publish(&subject, &envelope).await
    }

    /// Encrypt `plaintext` with the cached group key and publish it to the group
    pub async fn send_group(&self, group_id: &str, plaintext: &[u8]) -> ChatResult<()> {
        let (subject, envelope) = {
            let state = self.inner.state.read().await;
            let key = state
                .group_keys
                .get(group_id)
                .ok_or_else(|| ChatError::GroupKeyMissing(group_id.to_string()))?;

            let sealed = seal_group(key.as_ref(), plaintext)?;
            let envelope = WireEnvelope::seal(group_id, &state.user.id, Scheme::Group, &sealed);
            (group_subject(&self.inner.namespace, group_id), envelope)
        };

        self.publish(&subject, &envelope).await
    }

    async fn publish(&self, subject: &str, envelope: &WireEnvelope) -> ChatResult<()> {
        self.inner.client.publish(subject, &envelope.to_json()?).await?;
        self.inner.counters.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Register a handler for every message that decrypts successfully
    ///
    /// Handlers run in registration order on the receiving task. A panic in
    /// one handler is logged and the others still run.
    pub async fn on_decrypted<F>(&self, handler: F)
    where
        F: Fn(&DecryptedMessage) + Send + Sync + 'static,
    {
        self.inner.state.write().await.handlers.on_decrypted(Arc::new(handler));
    }

    /// Register a handler for dropped inbound messages and key cache failures
    pub async fn on_error<F>(&self, handler: F)
    where
        F: Fn(&ChatError) + Send + Sync + 'static,
    {
        self.inner.state.write().await.handlers.on_error(Arc::new(handler));
    }

    /// Message counters plus the current subscription and key counts
    pub async fn stats(&self) -> ChatStats {
        let state = self.inner.state.read().await;
        let counters = &self.inner.counters;
        ChatStats {
            messages_sent: counters.sent.load(Ordering::Relaxed),
            messages_delivered: counters.delivered.load(Ordering::Relaxed),
            decrypt_failures: counters.decrypt_failures.load(Ordering::Relaxed),
            active_subscriptions: state.subscriptions.len(),
            friend_keys: state.friend_keys.len(),
            group_keys: state.group_keys.len(),
        }
    }

    /// Drop every subscription, handler and key
    ///
    /// Handler calls already in progress may still finish. The broker
    /// connection stays open; it belongs to whoever created it.
    pub async fn close(&self) {
        let mut state = self.inner.state.write().await;
        for (_, task) in state.subscriptions.drain() {
            task.abort();
        }
        state.handlers.clear();
        state.keys = None;
        state.friend_keys.clear();
        state.group_keys.clear();
        info!(user = %state.user.id, "chat service closed");
    }
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("namespace", &self.inner.namespace)
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn handle_message(&self, msg: Message) {
        let Some(kind) = classify(&self.namespace, &msg.subject) else {
            debug!(subject = %msg.subject, "ignoring message outside the chat namespace");
            return;
        };

        let envelope = match WireEnvelope::from_json(&msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.report(e).await;
                return;
            }
        };

        let opened = {
            let state = self.state.read().await;
            if envelope.sender == state.user.id {
                return;
            }
            open_envelope(&state, kind, &msg.subject, &envelope)
        };

        match opened {
            Ok(decrypted) => self.deliver(decrypted).await,
            Err(e) => {
                if matches!(e, ChatError::DecryptFailed { .. } | ChatError::Crypto(_)) {
                    self.counters.decrypt_failures.fetch_add(1, Ordering::Relaxed);
                    record_counter(CHAT_DECRYPT_FAILURES, 1);
                }
                self.report(e).await;
            }
        }
    }

    async fn deliver(&self, msg: DecryptedMessage) {
        let handlers = self.state.read().await.handlers.decrypted_handlers();
        dispatch_message(&handlers, &msg);
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        record_counter(CHAT_MESSAGES_DELIVERED, 1);
    }

    async fn report(&self, err: ChatError) {
        warn!(error = %err, category = ?err.category(), "chat error");
        let handlers = self.state.read().await.handlers.error_handlers();
        dispatch_error(&handlers, &err);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in self.state.get_mut().subscriptions.values() {
            task.abort();
        }
    }
}

fn spawn_receiver(inner: Weak<Inner>, mut subscription: Subscription) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = subscription.next().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.handle_message(msg).await;
        }
    })
}

/// Pick the key by subject kind and decrypt
fn open_envelope(
    state: &State,
    kind: SubjectKind<'_>,
    subject: &str,
    envelope: &WireEnvelope,
) -> ChatResult<DecryptedMessage> {
    let sender = envelope.sender.as_str();
    let (cid, is_group, plaintext) = match kind {
        SubjectKind::Group(gid) => {
            let key = state
                .group_keys
                .get(gid)
                .ok_or_else(|| ChatError::GroupKeyMissing(gid.to_string()))?;
            let sealed = envelope.sealed()?;
            let plaintext = open_group(key.as_ref(), &sealed.nonce, &sealed.ciphertext)
                .map_err(|e| decrypt_error(e, gid, sender))?;
            (gid, true, plaintext)
        }
        SubjectKind::Direct(cid) => {
            let keys = state.keys.as_ref().ok_or(ChatError::KeyNotConfigured)?;
            if derive_cid(&state.user.id, sender) != cid {
                return Err(ChatError::MalformedEnvelope(format!(
                    "sender '{}' is not part of conversation {}",
                    sender, cid
                )));
            }
            let peer_key = state
                .friend_keys
                .get(sender)
                .ok_or_else(|| ChatError::FriendKeyMissing(sender.to_string()))?;
            let sealed = envelope.sealed()?;
            let plaintext = open_direct(keys.private.as_ref(), peer_key, &sealed.nonce, &sealed.ciphertext)
                .map_err(|e| decrypt_error(e, cid, sender))?;
            (cid, false, plaintext)
        }
    };

    Ok(DecryptedMessage {
        cid: cid.to_string(),
        sender: sender.to_string(),
        timestamp: envelope.ts,
        plaintext,
        is_group,
        subject: subject.to_string(),
    })
}

fn decrypt_error(e: CryptoError, cid: &str, sender: &str) -> ChatError {
    match e {
        CryptoError::DecryptFailed => ChatError::DecryptFailed {
            cid: cid.to_string(),
            sender: sender.to_string(),
        },
        other => ChatError::Crypto(other),
    }
}

fn to_key(bytes: &[u8]) -> CryptoResult<[u8; KEY_SIZE]> {
    bytes.try_into().map_err(|_| CryptoError::InvalidKeySize {
        expected: KEY_SIZE,
        actual: bytes.len(),
    })
}
