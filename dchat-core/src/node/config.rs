//! Local node configuration
//!
//! A [`NodeConfig`] is handed to [`NodeManager::start`](super::NodeManager::start)
//! and is not changed while the node runs; changing it means stop then start.

use crate::broker::options::{DEFAULT_CLUSTER_NAME, DEFAULT_HOST};
use crate::broker::subject::SINGLE_WILDCARD;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CLIENT_PORT: u16 = 4222;
pub const DEFAULT_CLUSTER_PORT: u16 = 6222;
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: String,
    pub host: String,
    pub cluster_name: String,
    /// 0 binds an ephemeral port
    pub client_port: u16,
    /// 0 binds an ephemeral port
    pub cluster_port: u16,
    /// Peer route URLs, e.g. `nats://10.0.0.2:6222`
    pub seed_routes: Vec<String>,
    /// Subjects accepted from peers; empty accepts nothing
    pub import_allow: Vec<String>,
    /// Subjects forwarded to peers; empty forwards nothing
    pub export_allow: Vec<String>,
    pub enable_tls: bool,
    /// Accept any peer certificate on cluster links
    pub tls_insecure_skip_verify: bool,
    /// PEM certificates of peers trusted when verification is on
    pub trusted_peer_certs: Vec<String>,
    /// Authorization file loaded before any other option
    pub resolver_config_path: Option<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub start_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            host: DEFAULT_HOST.to_string(),
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            client_port: DEFAULT_CLIENT_PORT,
            cluster_port: DEFAULT_CLUSTER_PORT,
            seed_routes: Vec::new(),
            import_allow: vec![SINGLE_WILDCARD.to_string()],
            export_allow: vec![SINGLE_WILDCARD.to_string()],
            enable_tls: false,
            tls_insecure_skip_verify: true,
            trusted_peer_certs: Vec::new(),
            resolver_config_path: None,
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }
}

impl NodeConfig {
    /// Config whose route imports are exactly `subscribe_topics`
    ///
    /// Exports stay allow-all so the node forwards everything it knows about.
    pub fn with_permissions(
        node_id: impl Into<String>,
        client_port: u16,
        cluster_port: u16,
        seed_routes: Vec<String>,
        subscribe_topics: Vec<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            client_port,
            cluster_port,
            seed_routes,
            import_allow: subscribe_topics,
            export_allow: vec![SINGLE_WILDCARD.to_string()],
            ..Default::default()
        }
    }

    /// Like [`with_permissions`](Self::with_permissions) with cluster TLS on
    pub fn with_tls(
        node_id: impl Into<String>,
        client_port: u16,
        cluster_port: u16,
        seed_routes: Vec<String>,
        subscribe_topics: Vec<String>,
    ) -> Self {
        Self {
            enable_tls: true,
            ..Self::with_permissions(node_id, client_port, cluster_port, seed_routes, subscribe_topics)
        }
    }

    /// Allow-all imports and exports
    pub fn local(
        node_id: impl Into<String>,
        client_port: u16,
        cluster_port: u16,
        seed_routes: Vec<String>,
    ) -> Self {
        Self::with_permissions(
            node_id,
            client_port,
            cluster_port,
            seed_routes,
            vec![SINGLE_WILDCARD.to_string()],
        )
    }

    pub fn with_resolver_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.resolver_config_path = Some(path.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_translation() {
        let config = NodeConfig::with_permissions(
            "node-a",
            4222,
            6222,
            vec![],
            vec!["a.*".to_string(), "b.*".to_string()],
        );
        assert_eq!(config.import_allow, vec!["a.*", "b.*"]);
        assert_eq!(config.export_allow, vec!["*"]);
        assert!(!config.enable_tls);
    }

    #[test]
    fn test_empty_topics_deny_imports() {
        let config = NodeConfig::with_permissions("node-a", 4222, 6222, vec![], vec![]);
        assert!(config.import_allow.is_empty());
        assert_eq!(config.export_allow, vec!["*"]);
    }

    #[test]
    fn test_tls_config() {
        let config = NodeConfig::with_tls("node-a", 0, 0, vec!["nats://127.0.0.1:6222".into()], vec![]);
        assert!(config.enable_tls);
        assert!(config.tls_insecure_skip_verify);
        assert_eq!(config.seed_routes.len(), 1);
    }

    #[test]
    fn test_local_allows_everything() {
        let config = NodeConfig::local("node-a", 0, 0, vec![]);
        assert_eq!(config.import_allow, vec!["*"]);
        assert_eq!(config.export_allow, vec!["*"]);
    }

    #[test]
    fn test_toml_roundtrip_keeps_durations() {
        let config = NodeConfig::local("node-a", 0, 0, vec![]).with_start_timeout(Duration::from_millis(1500));
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("start_timeout = \"1s 500ms\""));

        let parsed: NodeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
