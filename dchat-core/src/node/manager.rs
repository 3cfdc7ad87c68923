//! Lifecycle of the embedded broker
//!
//! ```text
//! NotStarted ──start──► Starting ──ready──► Running ──stop──► Stopped
//!                           │                                   │
//!                           └──error/timeout──► (previous)      └──start──► Starting
//! ```

use super::config::NodeConfig;
use super::error::{NodeError, NodeResult};
use crate::broker::options::{parse_route_url, ClusterOptions, ServerOptions};
use crate::broker::{
    BrokerError, BrokerResult, ClusterTls, RoutePermissions, Server, ServerHandle, SubjectPermission,
};
use crate::crypto::{validate_root_secret, KeyManager, DEFAULT_VALID_DAYS};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    NotStarted,
    Starting,
    Running,
    Stopped,
}

/// Observability snapshot of the local node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    pub running: bool,
    pub node_id: String,
    pub client_url: String,
    pub cluster_url: Option<String>,
    pub peer_route_count: usize,
    pub cluster_name: String,
}

struct Inner {
    state: NodeState,
    handle: Option<ServerHandle>,
    last_config: Option<NodeConfig>,
    root_secret: Option<Zeroizing<String>>,
}

/// Owns the single broker instance of this process
pub struct NodeManager {
    inner: RwLock<Inner>,
}

impl Default for NodeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: NodeState::NotStarted,
                handle: None,
                last_config: None,
                root_secret: None,
            }),
        }
    }

    /// Root seed used to derive the cluster TLS certificate
    pub async fn set_root_secret(&self, seed: &str) -> NodeResult<()> {
        validate_root_secret(seed)?;
        self.inner.write().await.root_secret = Some(Zeroizing::new(seed.to_string()));
        Ok(())
    }

    pub async fn state(&self) -> NodeState {
        self.inner.read().await.state
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == NodeState::Running
    }

    /// Config of the most recent successful start
    pub async fn last_config(&self) -> Option<NodeConfig> {
        self.inner.read().await.last_config.clone()
    }

    /// Build broker options from `config` and start the broker
    ///
    /// Option errors are returned before anything is spawned. Blocks until
    /// the broker has bound its listeners or `config.start_timeout` elapses.
    /// The node lock is not held while waiting: readers see `Starting`, and a
    /// concurrent `start` fails with `AlreadyRunning`.
    pub async fn start(&self, config: NodeConfig) -> NodeResult<()> {
        let (options, previous) = {
            let mut inner = self.inner.write().await;
            if matches!(inner.state, NodeState::Running | NodeState::Starting) {
                return Err(NodeError::AlreadyRunning);
            }

            let options = build_server_options(&config, inner.root_secret.as_ref().map(|s| s.as_str()))?;
            let previous = inner.state;
            inner.state = NodeState::Starting;
            (options, previous)
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let _ = ready_tx.send(Server::start(options).await);
        });
        let result = wait_ready(ready_rx, task, config.start_timeout).await;

        let mut inner = self.inner.write().await;
        match result {
            Ok(handle) => {
                info!(
                    node_id = %config.node_id,
                    client_url = %client_url_for(handle.client_addr()),
                    cluster_addr = ?handle.cluster_addr(),
                    routes = config.seed_routes.len(),
                    tls = config.enable_tls,
                    "node started"
                );
                inner.handle = Some(handle);
                inner.last_config = Some(config);
                inner.state = NodeState::Running;
                Ok(())
            }
            Err(e) => {
                warn!(node_id = %config.node_id, error = %e, "node failed to start");
                inner.state = previous;
                Err(e)
            }
        }
    }

    /// Shut the broker down
    pub async fn stop(&self) -> NodeResult<()> {
        let mut inner = self.inner.write().await;
        if inner.state != NodeState::Running {
            return Err(NodeError::NotRunning);
        }

        if let Some(handle) = inner.handle.take() {
            handle.shutdown().await;
        }
        inner.state = NodeState::Stopped;
        info!("node stopped");
        Ok(())
    }

    /// Start with allow-all route permissions
    pub async fn start_local_node(
        &self,
        node_id: &str,
        client_port: u16,
        cluster_port: u16,
        seed_routes: Vec<String>,
    ) -> NodeResult<()> {
        self.start(NodeConfig::local(node_id, client_port, cluster_port, seed_routes))
            .await
    }

    /// Allow routed messages on `subject` and restart with the merged config
    ///
    /// The node is unreachable between the stop and the start.
    pub async fn add_subscribe_permission(&self, subject: &str) -> NodeResult<()> {
        if !self.is_running().await {
            return Err(NodeError::NotRunning);
        }
        let Some(mut config) = self.last_config().await else {
            return Err(NodeError::NotRunning);
        };

        let mut import = SubjectPermission::new(config.import_allow.clone());
        if !import.add_allow(subject) {
            return Ok(());
        }
        config.import_allow = import.allow;

        info!(node_id = %config.node_id, %subject, "restarting node with new import permission");
        self.stop().await?;
        self.start(config).await
    }

    pub fn create_node_config_with_permissions(
        node_id: &str,
        client_port: u16,
        cluster_port: u16,
        seed_routes: Vec<String>,
        subscribe_topics: Vec<String>,
    ) -> NodeConfig {
        NodeConfig::with_permissions(node_id, client_port, cluster_port, seed_routes, subscribe_topics)
    }

    pub fn create_node_config_with_tls(
        node_id: &str,
        client_port: u16,
        cluster_port: u16,
        seed_routes: Vec<String>,
        subscribe_topics: Vec<String>,
    ) -> NodeConfig {
        NodeConfig::with_tls(node_id, client_port, cluster_port, seed_routes, subscribe_topics)
    }

    /// Client URL of the running broker, empty when not running
    pub async fn get_client_url(&self) -> String {
        let inner = self.inner.read().await;
        match &inner.handle {
            Some(handle) if inner.state == NodeState::Running => client_url_for(handle.client_addr()),
            _ => String::new(),
        }
    }

    /// Route URL peers can dial, `None` when not running
    pub async fn get_cluster_url(&self) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .handle
            .as_ref()
            .and_then(|h| h.cluster_addr())
            .map(client_url_for)
    }

    pub async fn get_cluster_info(&self) -> ClusterInfo {
        let inner = self.inner.read().await;
        let (Some(handle), NodeState::Running) = (&inner.handle, inner.state) else {
            return ClusterInfo::default();
        };

        ClusterInfo {
            running: true,
            node_id: handle.server_name().to_string(),
            client_url: client_url_for(handle.client_addr()),
            cluster_url: handle.cluster_addr().map(client_url_for),
            peer_route_count: handle.route_count().await,
            cluster_name: handle.cluster_name().unwrap_or_default().to_string(),
        }
    }

    /// Number of routes that would carry a message on `subject`
    pub async fn remote_interest(&self, subject: &str) -> usize {
        match &self.inner.read().await.handle {
            Some(handle) => handle.remote_interest(subject).await,
            None => 0,
        }
    }
}

impl std::fmt::Debug for NodeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeManager").finish_non_exhaustive()
    }
}

/// Translate a node config into broker options
///
/// The authorization file is applied first so every field below overrides it.
pub fn build_server_options(config: &NodeConfig, root_secret: Option<&str>) -> NodeResult<ServerOptions> {
    let mut options = match &config.resolver_config_path {
        Some(path) => ServerOptions::from_auth_file(path)?,
        None => ServerOptions::default(),
    };

    if !config.node_id.is_empty() {
        options.server_name = config.node_id.clone();
    }
    options.host = config.host.clone();
    options.port = config.client_port;

    let routes = config
        .seed_routes
        .iter()
        .map(|raw| {
            parse_route_url(raw).map_err(|e| match e {
                BrokerError::InvalidUrl { url, reason } => NodeError::InvalidRoute { url, reason },
                other => NodeError::Broker(other),
            })
        })
        .collect::<NodeResult<Vec<_>>>()?;

    let tls = if config.enable_tls {
        Some(cluster_tls(config, root_secret)?)
    } else {
        None
    };

    let cluster = options.cluster.get_or_insert_with(ClusterOptions::default);
    cluster.name = config.cluster_name.clone();
    cluster.host = config.host.clone();
    cluster.port = config.cluster_port;
    cluster.routes = routes;
    cluster.permissions = RoutePermissions {
        import: SubjectPermission::new(config.import_allow.clone()),
        export: SubjectPermission::new(config.export_allow.clone()),
    };
    cluster.tls = tls;

    Ok(options)
}

fn cluster_tls(config: &NodeConfig, root_secret: Option<&str>) -> NodeResult<ClusterTls> {
    let seed = root_secret.ok_or(NodeError::RootSecretMissing)?;
    let keys = KeyManager::from_seed(seed)?;

    let mut hosts = vec!["localhost".to_string()];
    let mut ips: Vec<IpAddr> = vec![IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V6(Ipv6Addr::LOCALHOST)];
    match config.host.parse::<IpAddr>() {
        Ok(ip) if !ip.is_unspecified() && !ips.contains(&ip) => ips.push(ip),
        Ok(_) => {}
        Err(_) if !hosts.contains(&config.host) => hosts.push(config.host.clone()),
        Err(_) => {}
    }

    let cert = keys.generate_tls_certificate(&hosts, &ips, DEFAULT_VALID_DAYS)?;
    let tls = ClusterTls::new(cert.cert_pem, cert.private_key_pem);
    if config.tls_insecure_skip_verify {
        warn!(node_id = %config.node_id, "cluster TLS accepts any peer certificate");
        Ok(tls)
    } else {
        Ok(tls.with_verification(config.trusted_peer_certs.clone()))
    }
}

/// Wait for the start task to report, aborting it on timeout
///
/// A handle that arrives after the timeout is dropped with the receiver,
/// which shuts that server down.
async fn wait_ready(
    ready_rx: oneshot::Receiver<BrokerResult<ServerHandle>>,
    task: JoinHandle<()>,
    timeout: Duration,
) -> NodeResult<ServerHandle> {
    match tokio::time::timeout(timeout, ready_rx).await {
        Ok(Ok(Ok(handle))) => Ok(handle),
        Ok(Ok(Err(e))) => Err(NodeError::Broker(e)),
        Ok(Err(_)) => Err(NodeError::StartFailed("start task ended without reporting".to_string())),
        Err(_) => {
            task.abort();
            Err(NodeError::StartTimeout(timeout))
        }
    }
}

fn client_url_for(addr: SocketAddr) -> String {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    format!("nats://{}", SocketAddr::new(ip, addr.port()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{AuthFile, Authorization};
    use crate::crypto::nkey::generate_user_seed;

    fn ephemeral(node_id: &str) -> NodeConfig {
        NodeConfig::local(node_id, 0, 0, vec![])
    }

    #[tokio::test]
    async fn test_concurrent_start_admits_one() {
        let node = NodeManager::new();
        let (first, second) = tokio::join!(node.start(ephemeral("racer-1")), node.start(ephemeral("racer-2")));

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.contains(&Err(NodeError::AlreadyRunning)));
        assert_eq!(node.state().await, NodeState::Running);
        node.stop().await.unwrap();
    }

    #[test]
    fn test_options_translate_permissions() {
        let config = NodeConfig::with_permissions("n1", 4300, 6300, vec![], vec!["a.*".into()]);
        let options = build_server_options(&config, None).unwrap();
        let cluster = options.cluster.unwrap();

        assert_eq!(options.server_name, "n1");
        assert_eq!(options.port, 4300);
        assert_eq!(cluster.port, 6300);
        assert!(cluster.permissions.import.allows("a.b"));
        assert!(!cluster.permissions.import.allows("c.d"));
        assert!(cluster.permissions.export.is_allow_all());
        assert!(cluster.tls.is_none());
    }

    #[test]
    fn test_empty_import_is_deny_all() {
        let config = NodeConfig::with_permissions("n1", 0, 0, vec![], vec![]);
        let options = build_server_options(&config, None).unwrap();
        assert!(options.cluster.unwrap().permissions.import.is_deny_all());
    }

    #[test]
    fn test_bad_route_is_rejected() {
        let config = NodeConfig::local("n1", 0, 0, vec!["nats://127.0.0.1:6222".into(), "not a url".into()]);
        let err = build_server_options(&config, None).unwrap_err();
        assert!(matches!(err, NodeError::InvalidRoute { ref url, .. } if url == "not a url"));
    }

    #[test]
    fn test_tls_requires_root_secret() {
        let config = NodeConfig::with_tls("n1", 0, 0, vec![], vec![]);
        assert_eq!(build_server_options(&config, None).unwrap_err(), NodeError::RootSecretMissing);

        let seed = generate_user_seed();
        let options = build_server_options(&config, Some(&seed)).unwrap();
        let tls = options.cluster.unwrap().tls.unwrap();
        assert!(tls.insecure_skip_verify);
        assert!(tls.cert_pem.contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn test_config_fields_override_auth_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.toml");
        AuthFile {
            server_name: Some("from-file".into()),
            authorization: Some(Authorization {
                token: Some("secret".into()),
                nkeys: vec![],
            }),
            cluster: None,
        }
        .save(&path)
        .unwrap();

        let config = ephemeral("from-config").with_resolver_config(&path);
        let options = build_server_options(&config, None).unwrap();
        assert_eq!(options.server_name, "from-config");
        assert_eq!(options.authorization.unwrap().token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_client_url_for_unspecified() {
        let addr: SocketAddr = "0.0.0.0:4222".parse().unwrap();
        assert_eq!(client_url_for(addr), "nats://127.0.0.1:4222");
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let node = NodeManager::new();
        assert_eq!(node.state().await, NodeState::NotStarted);
        assert_eq!(node.get_client_url().await, "");
        assert!(!node.get_cluster_info().await.running);
        assert_eq!(node.stop().await.unwrap_err(), NodeError::NotRunning);

        node.start(ephemeral("n1")).await.unwrap();
        assert!(node.is_running().await);
        assert!(node.get_client_url().await.starts_with("nats://127.0.0.1:"));
        assert_eq!(node.start(ephemeral("n1")).await.unwrap_err(), NodeError::AlreadyRunning);

        let info = node.get_cluster_info().await;
        assert!(info.running);
        assert_eq!(info.node_id, "n1");
        assert_eq!(info.cluster_name, "dchat_network");
        assert_eq!(info.peer_route_count, 0);

        node.stop().await.unwrap();
        assert_eq!(node.state().await, NodeState::Stopped);
        assert_eq!(node.get_client_url().await, "");
        assert_eq!(node.stop().await.unwrap_err(), NodeError::NotRunning);

        node.start(ephemeral("n1")).await.unwrap();
        assert!(node.is_running().await);
        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_start_has_no_side_effect() {
        let node = NodeManager::new();
        let err = node
            .start(NodeConfig::local("n1", 0, 0, vec!["ftp://host:1".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidRoute { .. }));
        assert_eq!(node.state().await, NodeState::NotStarted);
        assert!(node.last_config().await.is_none());
    }

    #[tokio::test]
    async fn test_start_timeout_aborts_task() {
        let (_ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(std::future::pending::<()>());

        let err = wait_ready(ready_rx, task, Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err, NodeError::StartTimeout(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_add_subscribe_permission_restarts() {
        let node = NodeManager::new();
        assert_eq!(
            node.add_subscribe_permission("a.b").await.unwrap_err(),
            NodeError::NotRunning
        );

        node.start(NodeConfig::with_permissions("n1", 0, 0, vec![], vec![])).await.unwrap();
        node.add_subscribe_permission("dchat.dm.*.msg").await.unwrap();
        assert!(node.is_running().await);
        assert_eq!(node.last_config().await.unwrap().import_allow, vec!["dchat.dm.*.msg"]);

        node.add_subscribe_permission("dchat.dm.*.msg").await.unwrap();
        assert_eq!(node.last_config().await.unwrap().import_allow.len(), 1);
        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_root_secret_validates() {
        let node = NodeManager::new();
        assert!(matches!(
            node.set_root_secret("not-a-seed").await.unwrap_err(),
            NodeError::Crypto(_)
        ));
        node.set_root_secret(&generate_user_seed()).await.unwrap();
    }
}
