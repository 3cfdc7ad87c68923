//! Client connection to a broker server
//!
//! One reader task dispatches incoming messages to per-subscription queues;
//! one writer task drains the outbound queue. `subscribe` and `flush` round
//! trip a ping so the server has processed everything sent before them.

use super::credentials::read_credentials;
use super::error::{BrokerError, BrokerResult};
use super::protocol::{read_frame, write_frame, ClientFrame, ConnectInfo, ServerFrame, ServerInfo};
use super::server::write_loop;
use super::subject;
use crate::crypto::{codec::encode_b64, nkey};
use crate::metrics::{TrafficCounters, TrafficSnapshot};
use ed25519_dalek::Signer;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::ReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_PORT: u16 = 4222;

/// Messages buffered per subscription before new ones are dropped
const SUBSCRIPTION_CAPACITY: usize = 1024;

const OUTBOUND_CAPACITY: usize = 1024;

const CLIENT_SCHEMES: &[&str] = &["nats", "dchat", "tcp"];

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub name: String,
    pub token: Option<String>,
    /// Credentials file holding the user seed used to answer the nonce
    pub credentials_path: Option<PathBuf>,
    /// User seed given directly instead of through a credentials file
    pub seed: Option<String>,
    pub connect_timeout: Duration,
    /// Bound on ping/pong round trips
    pub flush_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            name: "dchat-client".to_string(),
            token: None,
            credentials_path: None,
            seed: None,
            connect_timeout: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_credentials(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = Some(seed.into());
        self
    }
}

/// Message received on a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Vec<u8>,
}

/// State shared with the reader task
struct Dispatch {
    subs: Mutex<HashMap<u64, mpsc::Sender<Message>>>,
    pongs: Mutex<VecDeque<oneshot::Sender<()>>>,
    connected: AtomicBool,
    traffic: TrafficCounters,
    last_error: Mutex<Option<String>>,
}

struct ClientInner {
    tx: mpsc::Sender<ClientFrame>,
    dispatch: Arc<Dispatch>,
    info: ServerInfo,
    next_sid: AtomicU64,
    flush_timeout: Duration,
    closed: watch::Sender<bool>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to one broker connection
#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<ClientInner>,
}

impl BrokerClient {
    /// Connect and authenticate
    ///
    /// Authorization failures are reported here rather than on first use.
    pub async fn connect(url: &str, options: ClientOptions) -> BrokerResult<Self> {
        let addr = parse_client_url(url)?;
        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| BrokerError::Timeout(format!("connecting to {}", addr)))?
            .map_err(|e| BrokerError::Connect(format!("{}: {}", addr, e)))?;
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = tokio::io::split(stream);

        let info = tokio::time::timeout(options.connect_timeout, handshake(&mut reader, &mut writer, &options))
            .await
            .map_err(|_| BrokerError::Timeout(format!("handshake with {}", addr)))??;

        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let writer_task = tokio::spawn(write_loop(writer, rx));

        let dispatch = Arc::new(Dispatch {
            subs: Mutex::new(HashMap::new()),
            pongs: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(true),
            traffic: TrafficCounters::new(),
            last_error: Mutex::new(None),
        });
        let (closed_tx, closed_rx) = watch::channel(false);
        tokio::spawn(read_loop(reader, dispatch.clone(), tx.downgrade(), closed_rx));

        debug!(%addr, server = %info.server_name, "connected to broker");

        Ok(Self {
            inner: Arc::new(ClientInner {
                tx,
                dispatch,
                info,
                next_sid: AtomicU64::new(1),
                flush_timeout: options.flush_timeout,
                closed: closed_tx,
                writer: Mutex::new(Some(writer_task)),
            }),
        })
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.inner.info
    }

    pub fn is_connected(&self) -> bool {
        self.inner.dispatch.connected.load(Ordering::SeqCst)
    }

    pub async fn publish(&self, subject: &str, payload: &[u8]) -> BrokerResult<()> {
        self.send_pub(subject, None, payload).await
    }

    pub async fn publish_with_reply(&self, subject: &str, reply: &str, payload: &[u8]) -> BrokerResult<()> {
        subject::validate_subject(reply)?;
        self.send_pub(subject, Some(reply.to_string()), payload).await
    }

    async fn send_pub(&self, subject: &str, reply: Option<String>, payload: &[u8]) -> BrokerResult<()> {
        subject::validate_subject(subject)?;
        if payload.len() > self.inner.info.max_payload {
            return Err(BrokerError::PayloadTooLarge {
                size: payload.len(),
                max: self.inner.info.max_payload,
            });
        }

        self.send(ClientFrame::Pub {
            subject: subject.to_string(),
            reply,
            payload: payload.to_vec(),
        })
        .await?;
        self.inner.dispatch.traffic.record_out(payload.len());
        Ok(())
    }

    /// Subscribe to a subject pattern
    ///
    /// Returns after the server has registered the subscription.
    pub async fn subscribe(&self, subject: &str) -> BrokerResult<Subscription> {
        subject::validate_pattern(subject)?;

        let sid = self.inner.next_sid.fetch_add(1, Ordering::Relaxed);
        let (msg_tx, msg_rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        self.inner.dispatch.subs.lock().await.insert(sid, msg_tx);

        if let Err(e) = self
            .send(ClientFrame::Sub {
                subject: subject.to_string(),
                sid,
            })
            .await
        {
            self.inner.dispatch.subs.lock().await.remove(&sid);
            return Err(e);
        }
        self.flush().await?;

        Ok(Subscription {
            sid,
            subject: subject.to_string(),
            rx: msg_rx,
            tx: self.inner.tx.downgrade(),
        })
    }

    pub async fn unsubscribe(&self, subscription: Subscription) -> BrokerResult<()> {
        self.unsubscribe_sid(subscription.sid).await
    }

    pub async fn unsubscribe_sid(&self, sid: u64) -> BrokerResult<()> {
        self.inner.dispatch.subs.lock().await.remove(&sid);
        self.send(ClientFrame::Unsub { sid, max: None }).await
    }

    /// Round trip a ping so everything sent so far has been processed
    pub async fn flush(&self) -> BrokerResult<()> {
        let (pong_tx, pong_rx) = oneshot::channel();
        self.inner.dispatch.pongs.lock().await.push_back(pong_tx);
        self.send(ClientFrame::Ping).await?;

        tokio::time::timeout(self.inner.flush_timeout, pong_rx)
            .await
            .map_err(|_| BrokerError::Timeout("flush".to_string()))?
            .map_err(|_| BrokerError::ConnectionClosed)
    }

    /// Publish and wait for the first reply on a fresh inbox
    pub async fn request(&self, subject: &str, payload: &[u8], timeout: Duration) -> BrokerResult<Message> {
        let inbox = format!("_INBOX.{}", uuid::Uuid::new_v4().simple());
        let mut sub = self.subscribe(&inbox).await?;
        self.publish_with_reply(subject, &inbox, payload).await?;

        let reply = tokio::time::timeout(timeout, sub.next()).await;
        let _ = self.unsubscribe(sub).await;

        match reply {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(BrokerError::ConnectionClosed),
            Err(_) => Err(BrokerError::Timeout(format!("request on {}", subject))),
        }
    }

    pub fn stats(&self) -> TrafficSnapshot {
        self.inner.dispatch.traffic.snapshot()
    }

    /// Most recent error the server reported on this connection
    pub async fn last_error(&self) -> Option<String> {
        self.inner.dispatch.last_error.lock().await.clone()
    }

    /// Flush pending frames and close the connection
    pub async fn close(&self) {
        if self.is_connected() {
            let _ = self.flush().await;
        }
        self.inner.dispatch.connected.store(false, Ordering::SeqCst);
        let _ = self.inner.closed.send(true);
        if let Some(writer) = self.inner.writer.lock().await.take() {
            writer.abort();
        }
        self.inner.dispatch.subs.lock().await.clear();
    }

    async fn send(&self, frame: ClientFrame) -> BrokerResult<()> {
        if !self.is_connected() {
            return Err(BrokerError::ConnectionClosed);
        }
        self.inner
            .tx
            .send(frame)
            .await
            .map_err(|_| BrokerError::ConnectionClosed)
    }
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("server", &self.inner.info.server_name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Stream of messages for one subscription
///
/// Dropping it unsubscribes on a best-effort basis.
pub struct Subscription {
    sid: u64,
    subject: String,
    rx: mpsc::Receiver<Message>,
    tx: mpsc::WeakSender<ClientFrame>,
}

impl Subscription {
    pub fn sid(&self) -> u64 {
        self.sid
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message, or `None` once the connection or subscription is gone
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.try_send(ClientFrame::Unsub {
                sid: self.sid,
                max: None,
            });
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("sid", &self.sid)
            .field("subject", &self.subject)
            .finish()
    }
}

/// `host:port` for a client URL such as `nats://127.0.0.1:4222`
pub fn parse_client_url(raw: &str) -> BrokerResult<String> {
    let invalid = |reason: &str| BrokerError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !CLIENT_SCHEMES.contains(&url.scheme()) {
        return Err(invalid(&format!("unsupported scheme '{}'", url.scheme())));
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host"))?;
    Ok(format!("{}:{}", host, url.port().unwrap_or(DEFAULT_PORT)))
}

async fn handshake<R, W>(reader: &mut R, writer: &mut W, options: &ClientOptions) -> BrokerResult<ServerInfo>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let info = match read_frame::<_, ServerFrame>(reader).await? {
        Some(ServerFrame::Info(info)) => info,
        Some(ServerFrame::Err(msg)) => return Err(server_error(msg)),
        Some(_) => return Err(BrokerError::Protocol("expected INFO".to_string())),
        None => return Err(BrokerError::ConnectionClosed),
    };

    let mut connect = ConnectInfo {
        name: options.name.clone(),
        token: options.token.clone(),
        nkey: None,
        sig: None,
    };

    let seed = match (&options.seed, &options.credentials_path) {
        (Some(seed), _) => Some(seed.clone()),
        (None, Some(path)) => Some(read_credentials(path)?),
        (None, None) => None,
    };
    if let (Some(seed), Some(nonce)) = (seed, &info.nonce) {
        let signing_key = nkey::signing_key_from_seed(&seed)
            .map_err(|e| BrokerError::AuthConfig(e.to_string()))?;
        connect.nkey = Some(nkey::encode_user_public(&signing_key.verifying_key().to_bytes()));
        connect.sig = Some(encode_b64(&signing_key.sign(nonce.as_bytes()).to_bytes()));
    }

    write_frame(writer, &ClientFrame::Connect(connect)).await?;
    write_frame(writer, &ClientFrame::Ping).await?;

    loop {
        match read_frame::<_, ServerFrame>(reader).await? {
            Some(ServerFrame::Pong) => return Ok(info),
            Some(ServerFrame::Err(msg)) => return Err(server_error(msg)),
            Some(ServerFrame::Ping) => write_frame(writer, &ClientFrame::Pong).await?,
            Some(_) => {}
            None => return Err(BrokerError::ConnectionClosed),
        }
    }
}

fn server_error(msg: String) -> BrokerError {
    if msg == BrokerError::AuthorizationViolation.to_string() {
        BrokerError::AuthorizationViolation
    } else {
        BrokerError::Server(msg)
    }
}

async fn read_loop(
    mut reader: ReadHalf<TcpStream>,
    dispatch: Arc<Dispatch>,
    tx: mpsc::WeakSender<ClientFrame>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            frame = read_frame::<_, ServerFrame>(&mut reader) => frame,
            _ = closed.changed() => break,
        };

        match frame {
            Ok(Some(ServerFrame::Msg {
                subject,
                sid,
                reply,
                payload,
            })) => {
                dispatch.traffic.record_in(payload.len());
                let mut subs = dispatch.subs.lock().await;
                let Some(sub_tx) = subs.get(&sid) else {
                    continue;
                };
                match sub_tx.try_send(Message {
                    subject,
                    reply,
                    payload,
                }) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(msg)) => {
                        dispatch.traffic.record_dropped();
                        warn!(subject = %msg.subject, sid, "subscription queue full, message dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        subs.remove(&sid);
                    }
                }
            }
            Ok(Some(ServerFrame::Pong)) => {
                if let Some(waiter) = dispatch.pongs.lock().await.pop_front() {
                    let _ = waiter.send(());
                }
            }
            Ok(Some(ServerFrame::Ping)) => {
                if let Some(tx) = tx.upgrade() {
                    let _ = tx.try_send(ClientFrame::Pong);
                }
            }
            Ok(Some(ServerFrame::Err(msg))) => {
                warn!(error = %msg, "broker reported an error");
                *dispatch.last_error.lock().await = Some(msg);
            }
            Ok(Some(ServerFrame::Info(_))) | Ok(Some(ServerFrame::Ok)) => {}
            Ok(None) => {
                debug!("broker closed the connection");
                break;
            }
            Err(e) => {
                debug!(error = %e, "broker read failed");
                break;
            }
        }
    }

    dispatch.connected.store(false, Ordering::SeqCst);
    dispatch.subs.lock().await.clear();
    dispatch.pongs.lock().await.clear();
}
