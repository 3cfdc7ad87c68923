//! Embedded pub/sub server
//!
//! ```text
//!            ┌──────────────────────────── Server ────────────────────────────┐
//! clients ──►│ client listener ──► conn task (reader) ──► Shared::publish ─┐  │
//!            │                     conn task (writer) ◄── bounded queue ◄──┤  │
//! peers   ──►│ cluster listener ─► route task (reader) ─► deliver locally  │  │
//!            │ dial loops ───────► route task (writer) ◄── bounded queue ◄─┘  │
//!            └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every connection has a reader task and a writer task joined by a bounded
//! queue. Publishers never wait on receivers: when a queue is full the message
//! is dropped for that receiver and counted as a slow consumer.
//!
//! Messages arriving over a route are only delivered to local subscribers,
//! never forwarded to other routes. Servers gossip the routes they hold, so a
//! server that only seeds one peer still ends up with a direct route to every
//! server in the cluster.

use super::error::{BrokerError, BrokerResult};
use super::options::ServerOptions;
use super::permissions::RoutePermissions;
use super::options::parse_route_url;
use super::protocol::{
    read_frame, write_frame, ClientFrame, ConnectInfo, KnownRoute, RouteFrame, RouteInfo,
    ServerFrame, ServerInfo, PROTOCOL_VERSION,
};
use super::route::{self, RouteEntry};
use super::subject;
use super::tls::RouteTls;
use crate::metrics::{self, TrafficCounters, TrafficSnapshot};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, mpsc::error::TrySendError, watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Time a new client has to send `Connect`
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Time tasks get to wind down on shutdown before being aborted
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Shared server state, owned by every connection task
pub(crate) struct Shared {
    pub(crate) server_id: String,
    pub(crate) server_name: String,
    pub(crate) cluster_name: String,
    pub(crate) options: ServerOptions,
    pub(crate) permissions: RoutePermissions,
    /// Bound cluster port advertised to peers, 0 without clustering
    pub(crate) route_port: u16,
    pub(crate) route_tls: Option<RouteTls>,
    pub(crate) state: RwLock<State>,
    pub(crate) traffic: TrafficCounters,
    pub(crate) shutdown: watch::Receiver<bool>,
    next_conn_id: AtomicU64,
}

#[derive(Default)]
pub(crate) struct State {
    clients: HashMap<u64, ClientEntry>,
    routes: HashMap<u64, RouteEntry>,
    route_by_remote: HashMap<String, u64>,
    /// Local subscription patterns with their reference counts
    local_interest: HashMap<String, usize>,
    /// Gossiped servers with a dial loop running
    discovered: HashSet<String>,
}

struct ClientEntry {
    name: String,
    tx: mpsc::Sender<ServerFrame>,
    subs: HashMap<u64, SubEntry>,
}

struct SubEntry {
    subject: String,
    max: Option<u64>,
    delivered: u64,
}

impl State {
    fn add_local_interest(&mut self, pattern: &str, permissions: &RoutePermissions) {
        let count = self.local_interest.entry(pattern.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 && permissions.import.allows_interest(pattern) {
            self.broadcast_to_routes(RouteFrame::Sub(pattern.to_string()));
        }
    }

    fn remove_local_interest(&mut self, pattern: &str, permissions: &RoutePermissions) {
        let Some(count) = self.local_interest.get_mut(pattern) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.local_interest.remove(pattern);
            if permissions.import.allows_interest(pattern) {
                self.broadcast_to_routes(RouteFrame::Unsub(pattern.to_string()));
            }
        }
    }

    /// Interest this node advertises to a newly connected peer
    pub(crate) fn advertised_interest(&self, permissions: &RoutePermissions) -> Vec<String> {
        self.local_interest
            .keys()
            .filter(|p| permissions.import.allows_interest(p))
            .cloned()
            .collect()
    }

    fn broadcast_to_routes(&self, frame: RouteFrame) {
        for route in self.routes.values() {
            if route.tx.try_send(frame.clone()).is_err() {
                debug!(remote = %route.remote_id, "route queue full, interest update dropped");
            }
        }
    }

    /// Deliver to matching local subscribers; returns the number of deliveries
    fn deliver_local(
        &mut self,
        subject: &str,
        reply: &Option<String>,
        payload: &[u8],
        traffic: &TrafficCounters,
        permissions: &RoutePermissions,
    ) -> usize {
        let mut delivered = 0;
        let mut expired = Vec::new();

        for (client_id, client) in self.clients.iter_mut() {
            for (sid, sub) in client.subs.iter_mut() {
                if !subject::matches(&sub.subject, subject) {
                    continue;
                }

                let frame = ServerFrame::Msg {
                    subject: subject.to_string(),
                    sid: *sid,
                    reply: reply.clone(),
                    payload: payload.to_vec(),
                };
                match client.tx.try_send(frame) {
                    Ok(()) => {
                        delivered += 1;
                        traffic.record_out(payload.len());
                        metrics::record_counter(metrics::BROKER_MESSAGES_OUT, 1);
                    }
                    Err(TrySendError::Full(_)) => {
                        traffic.record_dropped();
                        metrics::record_counter(metrics::BROKER_SLOW_CONSUMER, 1);
                        warn!(client = %client.name, subject, "slow consumer, message dropped");
                    }
                    Err(TrySendError::Closed(_)) => {}
                }

                sub.delivered += 1;
                if sub.max.is_some_and(|max| sub.delivered >= max) {
                    expired.push((*client_id, *sid));
                }
            }
        }

        for (client_id, sid) in expired {
            let removed = self
                .clients
                .get_mut(&client_id)
                .and_then(|c| c.subs.remove(&sid));
            if let Some(sub) = removed {
                self.remove_local_interest(&sub.subject, permissions);
            }
        }

        delivered
    }

    /// Forward a locally published message to interested routes
    fn forward_to_routes(
        &self,
        subject: &str,
        reply: &Option<String>,
        payload: &[u8],
        traffic: &TrafficCounters,
        permissions: &RoutePermissions,
    ) {
        if self.routes.is_empty() || !permissions.export.allows(subject) {
            return;
        }

        for route in self.routes.values() {
            if !route.interest.iter().any(|p| subject::matches(p, subject)) {
                continue;
            }
            let frame = RouteFrame::Msg {
                subject: subject.to_string(),
                reply: reply.clone(),
                payload: payload.to_vec(),
            };
            match route.tx.try_send(frame) {
                Ok(()) => {
                    traffic.record_out(payload.len());
                    metrics::record_counter(metrics::BROKER_MESSAGES_OUT, 1);
                }
                Err(TrySendError::Full(_)) => {
                    traffic.record_dropped();
                    metrics::record_counter(metrics::BROKER_SLOW_CONSUMER, 1);
                    warn!(remote = %route.remote_id, subject, "route queue full, message dropped");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Register a route, resolving duplicates to the same remote server
    ///
    /// Both ends keep the connection dialed by the smaller server id, so the
    /// two servers always agree on which link survives. Returns the kill
    /// switch of a replaced connection.
    pub(crate) fn register_route(
        &mut self,
        conn_id: u64,
        entry: RouteEntry,
    ) -> Result<Option<Arc<Notify>>, String> {
        let mut replaced = None;

        if let Some(&existing_id) = self.route_by_remote.get(&entry.remote_id) {
            if let Some(existing) = self.routes.get(&existing_id) {
                if entry.dialer_id < existing.dialer_id {
                    replaced = self.routes.remove(&existing_id).map(|old| old.kill);
                } else {
                    return Err(format!("duplicate route to {}", entry.remote_id));
                }
            }
        }

        self.route_by_remote.insert(entry.remote_id.clone(), conn_id);
        self.routes.insert(conn_id, entry);
        Ok(replaced)
    }

    pub(crate) fn remove_route(&mut self, conn_id: u64) -> Option<RouteEntry> {
        let entry = self.routes.remove(&conn_id)?;
        if self.route_by_remote.get(&entry.remote_id) == Some(&conn_id) {
            self.route_by_remote.remove(&entry.remote_id);
        }
        Some(entry)
    }

    pub(crate) fn has_route_to(&self, remote_id: &str) -> bool {
        self.route_by_remote.contains_key(remote_id)
    }

    pub(crate) fn route_mut(&mut self, conn_id: u64) -> Option<&mut RouteEntry> {
        self.routes.get_mut(&conn_id)
    }

    /// Routes with a dialable URL, as gossiped to peers
    fn known_routes(&self) -> Vec<KnownRoute> {
        self.routes
            .values()
            .filter_map(|r| {
                r.url.as_ref().map(|url| KnownRoute {
                    server_id: r.remote_id.clone(),
                    url: url.clone(),
                })
            })
            .collect()
    }

    pub(crate) fn finish_discovery(&mut self, remote_id: &str) {
        self.discovered.remove(remote_id);
    }
}

impl Shared {
    pub(crate) fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn route_info(&self, state: &State) -> RouteInfo {
        RouteInfo {
            server_id: self.server_id.clone(),
            server_name: self.server_name.clone(),
            cluster: self.cluster_name.clone(),
            route_port: self.route_port,
            known_routes: state.known_routes(),
        }
    }

    /// Tell every route about the current route set
    pub(crate) fn gossip_routes(&self, state: &State) {
        state.broadcast_to_routes(RouteFrame::Info(self.route_info(state)));
    }

    /// Dial gossiped servers this server has no route to yet
    pub(crate) async fn discover_routes(self: &Arc<Self>, known: &[KnownRoute]) {
        let mut state = self.state.write().await;
        for route in known {
            if route.server_id == self.server_id
                || state.has_route_to(&route.server_id)
                || state.discovered.contains(&route.server_id)
            {
                continue;
            }
            let url = match parse_route_url(&route.url) {
                Ok(url) => url,
                Err(e) => {
                    debug!(remote_id = %route.server_id, error = %e, "ignoring gossiped route");
                    continue;
                }
            };

            info!(remote_id = %route.server_id, %url, "discovered route");
            state.discovered.insert(route.server_id.clone());
            tokio::spawn(route::dial_discovered(self.clone(), route.server_id.clone(), url));
        }
    }

    /// Message published by a local client
    async fn publish(&self, subject: &str, reply: &Option<String>, payload: &[u8]) {
        self.traffic.record_in(payload.len());
        metrics::record_counter(metrics::BROKER_MESSAGES_IN, 1);

        let mut state = self.state.write().await;
        state.deliver_local(subject, reply, payload, &self.traffic, &self.permissions);
        state.forward_to_routes(subject, reply, payload, &self.traffic, &self.permissions);
    }

    /// Message received from a peer server
    pub(crate) async fn publish_from_route(&self, subject: &str, reply: &Option<String>, payload: &[u8]) {
        self.traffic.record_in(payload.len());
        metrics::record_counter(metrics::BROKER_MESSAGES_IN, 1);

        if !self.permissions.import.allows(subject) {
            debug!(subject, "routed message rejected by import permissions");
            return;
        }

        let mut state = self.state.write().await;
        state.deliver_local(subject, reply, payload, &self.traffic, &self.permissions);
    }

    async fn register_client(&self, conn_id: u64, name: String, tx: mpsc::Sender<ServerFrame>) {
        self.state.write().await.clients.insert(
            conn_id,
            ClientEntry {
                name,
                tx,
                subs: HashMap::new(),
            },
        );
    }

    async fn remove_client(&self, conn_id: u64) {
        let mut state = self.state.write().await;
        if let Some(client) = state.clients.remove(&conn_id) {
            for sub in client.subs.into_values() {
                state.remove_local_interest(&sub.subject, &self.permissions);
            }
        }
    }

    async fn subscribe(&self, conn_id: u64, subject: String, sid: u64) -> BrokerResult<()> {
        subject::validate_pattern(&subject)?;

        let mut state = self.state.write().await;
        let Some(client) = state.clients.get_mut(&conn_id) else {
            return Ok(());
        };
        let previous = client.subs.insert(
            sid,
            SubEntry {
                subject: subject.clone(),
                max: None,
                delivered: 0,
            },
        );
        if let Some(previous) = previous {
            state.remove_local_interest(&previous.subject, &self.permissions);
        }
        state.add_local_interest(&subject, &self.permissions);
        Ok(())
    }

    async fn unsubscribe(&self, conn_id: u64, sid: u64, max: Option<u64>) {
        let mut state = self.state.write().await;
        let Some(client) = state.clients.get_mut(&conn_id) else {
            return;
        };

        let remove_now = match (client.subs.get_mut(&sid), max) {
            (Some(sub), Some(max)) if sub.delivered < max => {
                sub.max = Some(max);
                false
            }
            (Some(_), _) => true,
            (None, _) => false,
        };

        if remove_now {
            if let Some(sub) = client.subs.remove(&sid) {
                state.remove_local_interest(&sub.subject, &self.permissions);
            }
        }
    }

    async fn process_client_frame(
        &self,
        conn_id: u64,
        tx: &mpsc::Sender<ServerFrame>,
        frame: ClientFrame,
    ) -> BrokerResult<()> {
        match frame {
            ClientFrame::Pub {
                subject,
                reply,
                payload,
            } => {
                if payload.len() > self.options.max_payload {
                    return Err(BrokerError::PayloadTooLarge {
                        size: payload.len(),
                        max: self.options.max_payload,
                    });
                }
                subject::validate_subject(&subject)?;
                if let Some(reply) = &reply {
                    subject::validate_subject(reply)?;
                }
                self.publish(&subject, &reply, &payload).await;
            }
            ClientFrame::Sub { subject, sid } => self.subscribe(conn_id, subject, sid).await?,
            ClientFrame::Unsub { sid, max } => self.unsubscribe(conn_id, sid, max).await,
            ClientFrame::Ping => {
                let _ = tx.send(ServerFrame::Pong).await;
            }
            ClientFrame::Pong | ClientFrame::Connect(_) => {}
        }
        Ok(())
    }
}

/// Drain a connection's outbound queue into its socket
pub(crate) async fn write_loop<W, T>(mut writer: W, mut rx: mpsc::Receiver<T>)
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!(error = %e, "write failed, closing connection");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn accept_clients(shared: Arc<Shared>, listener: TcpListener) {
    let mut shutdown = shared.shutdown.clone();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let conn_id = shared.next_conn_id();
                    debug!(conn_id, %addr, "client connected");
                    tokio::spawn(handle_client(shared.clone(), stream, conn_id));
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept client connection");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
}

async fn handle_client(shared: Arc<Shared>, stream: TcpStream, conn_id: u64) {
    let _ = stream.set_nodelay(true);
    let (mut reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(shared.options.write_queue_capacity);
    let writer_task = tokio::spawn(write_loop(writer, rx));

    let nonce = shared.options.authorization.as_ref().map(|_| {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    });
    let info = ServerInfo {
        server_id: shared.server_id.clone(),
        server_name: shared.server_name.clone(),
        version: PROTOCOL_VERSION.to_string(),
        auth_required: nonce.is_some(),
        nonce: nonce.clone(),
        max_payload: shared.options.max_payload,
    };
    if tx.send(ServerFrame::Info(info)).await.is_err() {
        return;
    }

    let connect = match client_handshake(&shared, &mut reader, nonce.as_deref()).await {
        Ok(connect) => connect,
        Err(e) => {
            warn!(conn_id, error = %e, "client handshake failed");
            let _ = tx.send(ServerFrame::Err(e.to_string())).await;
            drop(tx);
            let _ = writer_task.await;
            return;
        }
    };

    debug!(conn_id, name = %connect.name, "client authenticated");
    shared.register_client(conn_id, connect.name, tx.clone()).await;

    let mut shutdown = shared.shutdown.clone();
    loop {
        let frame = tokio::select! {
            frame = read_frame::<_, ClientFrame>(&mut reader) => frame,
            _ = shutdown.changed() => break,
        };

        match frame {
            Ok(Some(frame)) => {
                if let Err(e) = shared.process_client_frame(conn_id, &tx, frame).await {
                    let fatal = matches!(e, BrokerError::PayloadTooLarge { .. });
                    let _ = tx.send(ServerFrame::Err(e.to_string())).await;
                    if fatal {
                        break;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(conn_id, error = %e, "client read failed");
                let _ = tx.try_send(ServerFrame::Err(e.to_string()));
                break;
            }
        }
    }

    shared.remove_client(conn_id).await;
    drop(tx);
    let _ = writer_task.await;
    debug!(conn_id, "client disconnected");
}

async fn client_handshake<R>(shared: &Shared, reader: &mut R, nonce: Option<&str>) -> BrokerResult<ConnectInfo>
where
    R: AsyncRead + Unpin,
{
    let frame = tokio::time::timeout(CONNECT_TIMEOUT, read_frame::<_, ClientFrame>(reader))
        .await
        .map_err(|_| BrokerError::Timeout("waiting for CONNECT".to_string()))??;

    let connect = match frame {
        Some(ClientFrame::Connect(connect)) => connect,
        Some(_) => return Err(BrokerError::Protocol("expected CONNECT".to_string())),
        None => return Err(BrokerError::ConnectionClosed),
    };

    if let Some(auth) = &shared.options.authorization {
        if !auth.verify(&connect, nonce) {
            return Err(BrokerError::AuthorizationViolation);
        }
    }
    Ok(connect)
}

/// Summary of one route connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSummary {
    pub remote_id: String,
    pub remote_name: String,
    pub outbound: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStats {
    pub connections: usize,
    pub routes: usize,
    pub subscriptions: usize,
    pub traffic: TrafficSnapshot,
}

/// Entry point for starting a server
pub struct Server;

impl Server {
    /// Bind all listeners and spawn the server tasks
    ///
    /// Returns once the listeners are bound; the server is ready to accept
    /// connections at that point.
    pub async fn start(options: ServerOptions) -> BrokerResult<ServerHandle> {
        let server_id = uuid::Uuid::new_v4().simple().to_string();
        let server_name = if options.server_name.is_empty() {
            server_id.clone()
        } else {
            options.server_name.clone()
        };

        let route_tls = match options.cluster.as_ref().and_then(|c| c.tls.as_ref()) {
            Some(tls) => Some(tls.build()?),
            None => None,
        };

        let client_listener = bind(&options.client_addr()).await?;
        let client_addr = client_listener.local_addr()?;

        let cluster_listener = match &options.cluster {
            Some(cluster) => Some(bind(&cluster.listen_addr()).await?),
            None => None,
        };
        let cluster_addr = match &cluster_listener {
            Some(listener) => Some(listener.local_addr()?),
            None => None,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (cluster_name, permissions, routes) = match &options.cluster {
            Some(c) => (c.name.clone(), c.permissions.clone(), c.routes.clone()),
            None => (String::new(), RoutePermissions::default(), Vec::new()),
        };

        let shared = Arc::new(Shared {
            server_id,
            server_name,
            cluster_name,
            options,
            permissions,
            route_port: cluster_addr.map_or(0, |addr| addr.port()),
            route_tls,
            state: RwLock::new(State::default()),
            traffic: TrafficCounters::new(),
            shutdown: shutdown_rx,
            next_conn_id: AtomicU64::new(1),
        });

        let mut tasks = vec![tokio::spawn(accept_clients(shared.clone(), client_listener))];
        if let Some(listener) = cluster_listener {
            tasks.push(tokio::spawn(route::accept_routes(shared.clone(), listener)));
            for url in routes {
                tasks.push(tokio::spawn(route::dial_loop(shared.clone(), url)));
            }
        }

        info!(
            server_id = %shared.server_id,
            server_name = %shared.server_name,
            %client_addr,
            cluster_addr = ?cluster_addr,
            tls = shared.route_tls.is_some(),
            "broker started"
        );

        Ok(ServerHandle {
            shared,
            client_addr,
            cluster_addr,
            shutdown_tx,
            tasks,
        })
    }
}

async fn bind(addr: &str) -> BrokerResult<TcpListener> {
    TcpListener::bind(addr).await.map_err(|e| BrokerError::Bind {
        addr: addr.to_string(),
        reason: e.to_string(),
    })
}

/// Running server; dropping it shuts the server down
pub struct ServerHandle {
    shared: Arc<Shared>,
    client_addr: SocketAddr,
    cluster_addr: Option<SocketAddr>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn server_id(&self) -> &str {
        &self.shared.server_id
    }

    pub fn server_name(&self) -> &str {
        &self.shared.server_name
    }

    /// Cluster name, or `None` when clustering is disabled
    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_addr.map(|_| self.shared.cluster_name.as_str())
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn cluster_addr(&self) -> Option<SocketAddr> {
        self.cluster_addr
    }

    /// `nats://host:port` URL clients connect to
    pub fn client_url(&self) -> String {
        format!("nats://{}", self.client_addr)
    }

    pub async fn route_count(&self) -> usize {
        self.shared.state.read().await.routes.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.shared.state.read().await.clients.len()
    }

    pub async fn routes(&self) -> Vec<RouteSummary> {
        let state = self.shared.state.read().await;
        state
            .routes
            .values()
            .map(|r| RouteSummary {
                remote_id: r.remote_id.clone(),
                remote_name: r.remote_name.clone(),
                outbound: r.outbound,
            })
            .collect()
    }

    /// Number of routes that would receive a message on `subject`
    pub async fn remote_interest(&self, subject: &str) -> usize {
        if !self.shared.permissions.export.allows(subject) {
            return 0;
        }
        let state = self.shared.state.read().await;
        state
            .routes
            .values()
            .filter(|r| r.interest.iter().any(|p| subject::matches(p, subject)))
            .count()
    }

    pub async fn stats(&self) -> ServerStats {
        let state = self.shared.state.read().await;
        ServerStats {
            connections: state.clients.len(),
            routes: state.routes.len(),
            subscriptions: state.clients.values().map(|c| c.subs.len()).sum(),
            traffic: self.shared.traffic.snapshot(),
        }
    }

    /// Stop accepting, close every connection and wait for the server tasks
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        info!(server_id = %self.shared.server_id, "broker stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("server_id", &self.shared.server_id)
            .field("client_addr", &self.client_addr)
            .field("cluster_addr", &self.cluster_addr)
            .finish()
    }
}
