//! Cluster routes between servers
//!
//! A route is a single connection between two servers carrying interest
//! updates and messages in both directions. Seed routes are dialed in the
//! background and re-dialed after `reconnect_interval` until shutdown.
//! Servers learned through gossip are re-dialed only while they answer.

use super::options::route_addr;
use super::protocol::{read_frame, RouteFrame};
use super::server::{write_loop, Shared};
use super::subject;
use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};
use url::Url;

/// Time a peer has to send its route `Info`
const ROUTE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Route connection as tracked in the server state
pub(crate) struct RouteEntry {
    pub(crate) remote_id: String,
    pub(crate) remote_name: String,
    /// Server id of whichever side opened the connection
    pub(crate) dialer_id: String,
    pub(crate) outbound: bool,
    /// Where the remote's cluster listener can be dialed
    pub(crate) url: Option<String>,
    pub(crate) tx: mpsc::Sender<RouteFrame>,
    /// Subject patterns the remote is interested in, after export filtering
    pub(crate) interest: HashSet<String>,
    pub(crate) kill: Arc<Notify>,
}

/// How a route connection ended
#[derive(Debug, Default)]
struct RouteOutcome {
    remote_id: Option<String>,
    self_route: bool,
}

/// Which side opened the connection
enum RouteOrigin {
    Dialed(Url),
    Accepted(SocketAddr),
}

impl RouteOrigin {
    /// URL other servers can use to reach the remote end
    fn remote_url(&self, remote_port: u16) -> Option<String> {
        match self {
            RouteOrigin::Dialed(url) => Some(url.to_string()),
            RouteOrigin::Accepted(_) if remote_port == 0 => None,
            RouteOrigin::Accepted(addr) => Some(format!(
                "nats://{}",
                SocketAddr::new(addr.ip(), remote_port)
            )),
        }
    }
}

pub(crate) async fn accept_routes(shared: Arc<Shared>, listener: TcpListener) {
    let mut shutdown = shared.shutdown.clone();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!(%addr, "inbound route connection");
                    let shared = shared.clone();
                    tokio::spawn(async move {
                        let _ = stream.set_nodelay(true);
                        let origin = RouteOrigin::Accepted(addr);
                        match shared.route_tls.clone() {
                            Some(tls) => match tls.accept(stream).await {
                                Ok(stream) => {
                                    run_route(shared, stream, origin).await;
                                }
                                Err(e) => warn!(%addr, error = %e, "route TLS handshake failed"),
                            },
                            None => {
                                run_route(shared, stream, origin).await;
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept route connection");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
}

fn reconnect_interval(shared: &Shared) -> Duration {
    shared
        .options
        .cluster
        .as_ref()
        .map(|c| c.reconnect_interval)
        .unwrap_or(super::options::DEFAULT_RECONNECT_INTERVAL)
}

/// Keep a seed route connected until shutdown
pub(crate) async fn dial_loop(shared: Arc<Shared>, url: Url) {
    if let Err(e) = route_addr(&url) {
        warn!(%url, error = %e, "invalid seed route");
        return;
    }
    let interval = reconnect_interval(&shared);

    let mut known_remote: Option<String> = None;
    let mut shutdown = shared.shutdown.clone();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let already_connected = match &known_remote {
            Some(id) => shared.state.read().await.has_route_to(id),
            None => false,
        };

        if !already_connected {
            let outcome = dial_once(&shared, &url).await;
            if outcome.self_route {
                info!(%url, "seed route points at this server, not dialing again");
                break;
            }
            if outcome.remote_id.is_some() {
                known_remote = outcome.remote_id;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }
}

/// Keep a gossiped route connected for as long as the server answers
///
/// Gives up as soon as a dial fails or the URL leads to a different server,
/// so a departed server is not dialed forever. Boxed because route handling
/// spawns it again when gossip arrives.
pub(crate) fn dial_discovered(
    shared: Arc<Shared>,
    remote_id: String,
    url: Url,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let interval = reconnect_interval(&shared);
        let mut shutdown = shared.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let connected = shared.state.read().await.has_route_to(&remote_id);
            if !connected {
                let outcome = dial_once(&shared, &url).await;
                if outcome.remote_id.as_deref() != Some(remote_id.as_str()) {
                    debug!(%remote_id, %url, "gossiped route unreachable, giving up");
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        shared.state.write().await.finish_discovery(&remote_id);
    })
}

/// Dial `url` once and run the route until it closes
async fn dial_once(shared: &Arc<Shared>, url: &Url) -> RouteOutcome {
    let addr = match route_addr(url) {
        Ok(addr) => addr,
        Err(e) => {
            warn!(%url, error = %e, "invalid route url");
            return RouteOutcome::default();
        }
    };

    let stream = match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(%url, error = %e, "route dial failed");
            return RouteOutcome::default();
        }
        Err(_) => {
            debug!(%url, "route dial timed out");
            return RouteOutcome::default();
        }
    };
    let _ = stream.set_nodelay(true);

    let origin = RouteOrigin::Dialed(url.clone());
    match &shared.route_tls {
        Some(tls) => {
            let host = url
                .host_str()
                .unwrap_or_default()
                .trim_start_matches('[')
                .trim_end_matches(']');
            match tls.connect(host, stream).await {
                Ok(stream) => run_route(shared.clone(), stream, origin).await,
                Err(e) => {
                    warn!(%url, error = %e, "route TLS handshake failed");
                    RouteOutcome::default()
                }
            }
        }
        None => run_route(shared.clone(), stream, origin).await,
    }
}

/// Run one route connection to completion
async fn run_route<S>(shared: Arc<Shared>, stream: S, origin: RouteOrigin) -> RouteOutcome
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(shared.options.write_queue_capacity);
    let writer_task = tokio::spawn(write_loop(writer, rx));
    let mut outcome = RouteOutcome::default();
    let outbound = matches!(origin, RouteOrigin::Dialed(_));

    let info = {
        let state = shared.state.read().await;
        shared.route_info(&state)
    };
    if tx.send(RouteFrame::Info(info)).await.is_err() {
        return outcome;
    }

    let remote = match tokio::time::timeout(ROUTE_HANDSHAKE_TIMEOUT, read_frame::<_, RouteFrame>(&mut reader)).await {
        Ok(Ok(Some(RouteFrame::Info(info)))) => info,
        Ok(Ok(Some(RouteFrame::Err(msg)))) => {
            warn!(error = %msg, "route rejected by peer");
            return outcome;
        }
        Ok(Ok(Some(_))) => {
            warn!("route peer sent a frame before INFO");
            return outcome;
        }
        Ok(Ok(None)) => return outcome,
        Ok(Err(e)) => {
            debug!(error = %e, "route handshake failed");
            return outcome;
        }
        Err(_) => {
            debug!("route handshake timed out");
            return outcome;
        }
    };
    outcome.remote_id = Some(remote.server_id.clone());

    if remote.server_id == shared.server_id {
        outcome.self_route = true;
        drop(tx);
        let _ = writer_task.await;
        return outcome;
    }

    if remote.cluster != shared.cluster_name {
        warn!(
            remote = %remote.server_name,
            expected = %shared.cluster_name,
            got = %remote.cluster,
            "rejecting route from a different cluster"
        );
        let _ = tx
            .send(RouteFrame::Err(format!(
                "cluster name mismatch: {} != {}",
                shared.cluster_name, remote.cluster
            )))
            .await;
        drop(tx);
        let _ = writer_task.await;
        return outcome;
    }

    let conn_id = shared.next_conn_id();
    let kill = Arc::new(Notify::new());
    let entry = RouteEntry {
        remote_id: remote.server_id.clone(),
        remote_name: remote.server_name.clone(),
        dialer_id: if outbound {
            shared.server_id.clone()
        } else {
            remote.server_id.clone()
        },
        outbound,
        url: origin.remote_url(remote.route_port),
        tx: tx.clone(),
        interest: HashSet::new(),
        kill: kill.clone(),
    };

    let registered = {
        let mut state = shared.state.write().await;
        state.register_route(conn_id, entry).map(|replaced| {
            if let Some(old) = replaced {
                old.notify_one();
            }
            for pattern in state.advertised_interest(&shared.permissions) {
                let _ = tx.try_send(RouteFrame::Sub(pattern));
            }
            shared.gossip_routes(&state);
        })
    };
    if let Err(reason) = registered {
        debug!(remote = %remote.server_name, %reason, "dropping route");
        drop(tx);
        let _ = writer_task.await;
        return outcome;
    }

    info!(
        remote_id = %remote.server_id,
        remote_name = %remote.server_name,
        outbound,
        "route established"
    );
    shared.discover_routes(&remote.known_routes).await;

    let mut shutdown = shared.shutdown.clone();
    loop {
        let frame = tokio::select! {
            frame = read_frame::<_, RouteFrame>(&mut reader) => frame,
            _ = kill.notified() => break,
            _ = shutdown.changed() => break,
        };

        match frame {
            Ok(Some(frame)) => process_route_frame(&shared, conn_id, &tx, frame).await,
            Ok(None) => break,
            Err(e) => {
                warn!(remote = %remote.server_name, error = %e, "route read failed");
                break;
            }
        }
    }

    shared.state.write().await.remove_route(conn_id);
    drop(tx);
    let _ = writer_task.await;
    info!(remote_name = %remote.server_name, "route closed");
    outcome
}

async fn process_route_frame(
    shared: &Arc<Shared>,
    conn_id: u64,
    tx: &mpsc::Sender<RouteFrame>,
    frame: RouteFrame,
) {
    match frame {
        RouteFrame::Sub(pattern) => {
            if subject::validate_pattern(&pattern).is_err() {
                debug!(%pattern, "ignoring invalid remote interest");
                return;
            }
            if !shared.permissions.export.allows_interest(&pattern) {
                debug!(%pattern, "remote interest rejected by export permissions");
                return;
            }
            if let Some(route) = shared.state.write().await.route_mut(conn_id) {
                route.interest.insert(pattern);
            }
        }
        RouteFrame::Unsub(pattern) => {
            if let Some(route) = shared.state.write().await.route_mut(conn_id) {
                route.interest.remove(&pattern);
            }
        }
        RouteFrame::Msg {
            subject,
            reply,
            payload,
        } => {
            if subject::validate_subject(&subject).is_ok() {
                shared.publish_from_route(&subject, &reply, &payload).await;
            }
        }
        RouteFrame::Ping => {
            let _ = tx.send(RouteFrame::Pong).await;
        }
        RouteFrame::Info(info) => shared.discover_routes(&info.known_routes).await,
        RouteFrame::Err(msg) => warn!(error = %msg, "route error from peer"),
        RouteFrame::Pong => {}
    }
}
