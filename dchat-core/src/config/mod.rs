//! Runtime configuration
//!
//! TOML on disk, overridable from the environment with
//! `DCHAT_<SECTION>_<KEY>` variables, e.g. `DCHAT_NODE_CLIENT_PORT=4333`.

use crate::broker::options::{DEFAULT_CLUSTER_NAME, DEFAULT_HOST};
use crate::broker::ClientOptions;
use crate::chat::cid::{direct_wildcard, group_wildcard};
use crate::chat::{DEFAULT_NAMESPACE, DEFAULT_NICKNAME};
use crate::logging::{LogConfig, LogLevel};
use crate::node::{NodeConfig, DEFAULT_CLIENT_PORT, DEFAULT_CLUSTER_PORT, DEFAULT_START_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

const ENV_PREFIX: &str = "DCHAT";

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeSettings,
    pub chat: ChatSettings,
    pub logging: LogConfig,
}

/// Local broker node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Empty generates a random id at startup
    pub node_id: String,
    pub host: String,
    pub cluster_name: String,
    pub client_port: u16,
    pub cluster_port: u16,
    pub seed_routes: Vec<String>,
    pub enable_tls: bool,
    pub tls_insecure_skip_verify: bool,
    /// Authorization file produced by the provisioner
    pub resolver_config_path: Option<PathBuf>,
    /// Credentials file used by local clients
    pub credentials_path: Option<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub start_timeout: Duration,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            host: DEFAULT_HOST.to_string(),
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            client_port: DEFAULT_CLIENT_PORT,
            cluster_port: DEFAULT_CLUSTER_PORT,
            seed_routes: Vec::new(),
            enable_tls: false,
            tls_insecure_skip_verify: true,
            resolver_config_path: None,
            credentials_path: None,
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }
}

/// Chat session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// First subject token of every chat subject
    pub namespace: String,
    pub nickname: String,
    /// JSON file mirroring cached friend and group keys
    pub key_cache_path: Option<PathBuf>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            nickname: DEFAULT_NICKNAME.to_string(),
            key_cache_path: None,
        }
    }
}

impl ChatSettings {
    /// Subjects a node must import for chats in this namespace to cross routes
    pub fn route_subjects(&self) -> Vec<String> {
        vec![direct_wildcard(&self.namespace), group_wildcard(&self.namespace)]
    }
}

impl NodeSettings {
    /// Node config receiving on `subscribe_topics` from peers
    pub fn to_node_config(&self, subscribe_topics: Vec<String>) -> NodeConfig {
        let node_id = if self.node_id.is_empty() {
            format!("node-{}", uuid::Uuid::new_v4().simple())
        } else {
            self.node_id.clone()
        };

        NodeConfig {
            host: self.host.clone(),
            cluster_name: self.cluster_name.clone(),
            enable_tls: self.enable_tls,
            tls_insecure_skip_verify: self.tls_insecure_skip_verify,
            resolver_config_path: self.resolver_config_path.clone(),
            start_timeout: self.start_timeout,
            ..NodeConfig::with_permissions(
                node_id,
                self.client_port,
                self.cluster_port,
                self.seed_routes.clone(),
                subscribe_topics,
            )
        }
    }

    /// Client options for connecting to this node
    pub fn client_options(&self, name: &str) -> ClientOptions {
        ClientOptions {
            credentials_path: self.credentials_path.clone(),
            connect_timeout: self.start_timeout,
            ..ClientOptions::named(name)
        }
    }
}

impl Config {
    /// Node config importing exactly the chat subjects of `[chat]`
    pub fn node_config(&self) -> NodeConfig {
        self.node.to_node_config(self.chat.route_subjects())
    }

    /// Defaults overridden by `DCHAT_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |section: &str, name: &str| {
            let key = format!("{}_{}_{}", ENV_PREFIX, section, name);
            lookup(&key).map(|value| (key, value))
        };

        // Node
        if let Some((_, v)) = var("NODE", "ID") {
            self.node.node_id = v;
        }
        if let Some((_, v)) = var("NODE", "HOST") {
            self.node.host = v;
        }
        if let Some((_, v)) = var("NODE", "CLUSTER_NAME") {
            self.node.cluster_name = v;
        }
        if let Some((key, v)) = var("NODE", "CLIENT_PORT") {
            self.node.client_port = parse_value(&key, &v)?;
        }
        if let Some((key, v)) = var("NODE", "CLUSTER_PORT") {
            self.node.cluster_port = parse_value(&key, &v)?;
        }
        if let Some((_, v)) = var("NODE", "SEED_ROUTES") {
            self.node.seed_routes = split_list(&v);
        }
        if let Some((key, v)) = var("NODE", "ENABLE_TLS") {
            self.node.enable_tls = parse_value(&key, &v)?;
        }
        if let Some((key, v)) = var("NODE", "TLS_INSECURE_SKIP_VERIFY") {
            self.node.tls_insecure_skip_verify = parse_value(&key, &v)?;
        }
        if let Some((_, v)) = var("NODE", "RESOLVER_CONFIG_PATH") {
            self.node.resolver_config_path = Some(PathBuf::from(v));
        }
        if let Some((_, v)) = var("NODE", "CREDENTIALS_PATH") {
            self.node.credentials_path = Some(PathBuf::from(v));
        }
        if let Some((key, v)) = var("NODE", "START_TIMEOUT") {
            self.node.start_timeout = humantime_serde::re::humantime::parse_duration(&v)
                .map_err(|e| ConfigError::InvalidEnv { key, reason: e.to_string() })?;
        }

        // Chat
        if let Some((_, v)) = var("CHAT", "NAMESPACE") {
            self.chat.namespace = v;
        }
        if let Some((_, v)) = var("CHAT", "NICKNAME") {
            self.chat.nickname = v;
        }
        if let Some((_, v)) = var("CHAT", "KEY_CACHE_PATH") {
            self.chat.key_cache_path = Some(PathBuf::from(v));
        }

        // Logging
        if let Some((key, v)) = var("LOG", "LEVEL") {
            self.logging.level = LogLevel::parse(&v).ok_or_else(|| ConfigError::InvalidEnv {
                key,
                reason: format!("unknown log level '{}'", v),
            })?;
        }
        if let Some((key, v)) = var("LOG", "JSON") {
            self.logging.json_format = parse_value(&key, &v)?;
        }

        Ok(())
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;
        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let namespace = &self.chat.namespace;
        if namespace.is_empty() {
            return Err(ConfigError::Invalid(
                "chat namespace must not be empty".to_string(),
            ));
        }
        if namespace
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace())
        {
            return Err(ConfigError::Invalid(format!(
                "chat namespace must be a single subject token: {}",
                namespace
            )));
        }

        if self.node.cluster_name.is_empty() {
            return Err(ConfigError::Invalid(
                "cluster_name must not be empty".to_string(),
            ));
        }

        if self.node.start_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "start_timeout must be greater than 0".to_string(),
            ));
        }

        for directive in &self.logging.directives {
            if directive.parse::<tracing_subscriber::filter::Directive>().is_err() {
                return Err(ConfigError::Invalid(format!(
                    "Invalid log directive: {}",
                    directive
                )));
            }
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, contents).map_err(|e| ConfigError::write(path, e))?;

        Ok(())
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.node.client_port, 4222);
        assert_eq!(config.node.cluster_port, 6222);
        assert_eq!(config.node.cluster_name, "dchat_network");
        assert!(config.node.tls_insecure_skip_verify);
        assert_eq!(config.chat.namespace, "dchat");
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(lookup(&[
                ("DCHAT_NODE_CLIENT_PORT", "4333"),
                ("DCHAT_NODE_SEED_ROUTES", "nats://a:6222, nats://b:6222,"),
                ("DCHAT_NODE_ENABLE_TLS", "true"),
                ("DCHAT_NODE_START_TIMEOUT", "2s"),
                ("DCHAT_CHAT_NAMESPACE", "team"),
                ("DCHAT_LOG_LEVEL", "warning"),
            ]))
            .unwrap();

        assert_eq!(config.node.client_port, 4333);
        assert_eq!(config.node.seed_routes, vec!["nats://a:6222", "nats://b:6222"]);
        assert!(config.node.enable_tls);
        assert_eq!(config.node.start_timeout, Duration::from_secs(2));
        assert_eq!(config.chat.namespace, "team");
        assert_eq!(config.logging.level, LogLevel::Warn);
    }

    #[test]
    fn test_env_rejects_bad_values() {
        let mut config = Config::default();
        assert!(matches!(
            config.apply_env(lookup(&[("DCHAT_NODE_CLIENT_PORT", "70000")])),
            Err(ConfigError::InvalidEnv { ref key, .. }) if key == "DCHAT_NODE_CLIENT_PORT"
        ));
        assert!(matches!(
            config.apply_env(lookup(&[("DCHAT_LOG_LEVEL", "loud")])),
            Err(ConfigError::InvalidEnv { .. })
        ));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.chat.namespace = "a.b".into();
        assert!(config.validate().is_err());

        config = Config::default();
        config.chat.namespace = String::new();
        assert!(config.validate().is_err());

        config = Config::default();
        config.node.cluster_name = String::new();
        assert!(config.validate().is_err());

        config = Config::default();
        config.node.start_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config = Config::default();
        config.logging.directives.push("dchat_core=loud".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dchat.toml");

        let mut config = Config::default();
        config.node.node_id = "node-a".into();
        config.node.seed_routes = vec!["nats://10.0.0.2:6222".into()];
        config.chat.key_cache_path = Some(dir.path().join("keys.json"));
        config.save_to_file(&path).unwrap();

        assert_eq!(Config::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { ref path, .. } if path.ends_with("absent.toml")));
        assert_eq!(err.category(), crate::error::ErrorCategory::Storage);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dchat.toml");
        std::fs::write(&path, "[node]\nclient_port = 5000\n\n[logging]\nlevel = \"debug\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.node.client_port, 5000);
        assert_eq!(config.node.cluster_port, 6222);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_node_config_translation() {
        let settings = NodeSettings::default();
        let node = settings.to_node_config(vec!["dchat.dm.*.msg".into()]);
        assert!(node.node_id.starts_with("node-"));
        assert_eq!(node.import_allow, vec!["dchat.dm.*.msg"]);
        assert_eq!(node.export_allow, vec!["*"]);
        assert_eq!(node.start_timeout, DEFAULT_START_TIMEOUT);
    }

    #[test]
    fn test_node_config_imports_chat_namespace() {
        let mut config = Config::default();
        config.chat.namespace = "team".to_string();

        let node = config.node_config();
        assert_eq!(node.import_allow, vec!["team.dm.*.msg", "team.grp.*.msg"]);
        assert_eq!(node.export_allow, vec!["*"]);
    }
}
