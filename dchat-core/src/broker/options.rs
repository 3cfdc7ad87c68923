//! Broker server options and the authorization file

use super::error::{BrokerError, BrokerResult};
use super::permissions::RoutePermissions;
use super::protocol::{ConnectInfo, MAX_PAYLOAD};
use super::tls::ClusterTls;
use crate::crypto::{codec::decode_b64, nkey};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_CLUSTER_NAME: &str = "dchat_network";
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_WRITE_QUEUE_CAPACITY: usize = 1024;

/// URL schemes accepted for seed routes
const ROUTE_SCHEMES: &[&str] = &["nats", "nats-route", "tls", "dchat"];

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub server_name: String,
    pub host: String,
    /// Client port; 0 binds an ephemeral port
    pub port: u16,
    pub authorization: Option<Authorization>,
    pub cluster: Option<ClusterOptions>,
    pub max_payload: usize,
    /// Outbound frames buffered per connection before messages are dropped
    pub write_queue_capacity: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            server_name: String::new(),
            host: DEFAULT_HOST.to_string(),
            port: 4222,
            authorization: None,
            cluster: None,
            max_payload: MAX_PAYLOAD,
            write_queue_capacity: DEFAULT_WRITE_QUEUE_CAPACITY,
        }
    }
}

impl ServerOptions {
    /// Options seeded from an authorization file
    pub fn from_auth_file(path: impl AsRef<Path>) -> BrokerResult<Self> {
        let mut options = Self::default();
        options.apply_auth_file(AuthFile::load(path)?);
        Ok(options)
    }

    pub fn apply_auth_file(&mut self, file: AuthFile) {
        if let Some(name) = file.server_name {
            self.server_name = name;
        }
        if let Some(auth) = file.authorization.filter(|a| !a.is_empty()) {
            self.authorization = Some(auth);
        }
        if let Some(name) = file.cluster.and_then(|c| c.name) {
            self.cluster
                .get_or_insert_with(ClusterOptions::default)
                .name = name;
        }
    }

    pub fn client_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub name: String,
    pub host: String,
    /// Cluster port; 0 binds an ephemeral port
    pub port: u16,
    pub routes: Vec<Url>,
    pub permissions: RoutePermissions,
    pub tls: Option<ClusterTls>,
    pub reconnect_interval: Duration,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_CLUSTER_NAME.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: 6222,
            routes: Vec::new(),
            permissions: RoutePermissions::default(),
            tls: None,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

impl ClusterOptions {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Client credentials the server accepts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Allowed user public keys (`U...`)
    #[serde(default)]
    pub nkeys: Vec<String>,
}

impl Authorization {
    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.nkeys.is_empty()
    }

    /// Check a client handshake against these credentials
    pub fn verify(&self, connect: &ConnectInfo, nonce: Option<&str>) -> bool {
        if let (Some(expected), Some(given)) = (&self.token, &connect.token) {
            if expected == given {
                return true;
            }
        }

        let (Some(nkey), Some(sig), Some(nonce)) = (&connect.nkey, &connect.sig, nonce) else {
            return false;
        };
        if !self.nkeys.iter().any(|k| k == nkey) {
            return false;
        }
        verify_nonce_signature(nkey, nonce, sig)
    }
}

fn verify_nonce_signature(public: &str, nonce: &str, sig_b64: &str) -> bool {
    let Ok(raw) = nkey::decode_user_public(public) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&raw) else {
        return false;
    };
    let Ok(sig_bytes) = decode_b64(sig_b64) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    key.verify(nonce.as_bytes(), &signature).is_ok()
}

/// On-disk authorization config produced by a provisioner
///
/// ```toml
/// server_name = "node-1"
///
/// [authorization]
/// nkeys = ["UA..."]
///
/// [cluster]
/// name = "dchat_network"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<AuthFileCluster>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFileCluster {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AuthFile {
    pub fn load(path: impl AsRef<Path>) -> BrokerResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BrokerError::AuthConfig(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&contents)
            .map_err(|e| BrokerError::AuthConfig(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> BrokerResult<()> {
        let path = path.as_ref();
        let contents =
            toml::to_string_pretty(self).map_err(|e| BrokerError::AuthConfig(e.to_string()))?;
        std::fs::write(path, contents)
            .map_err(|e| BrokerError::AuthConfig(format!("{}: {}", path.display(), e)))
    }
}

/// Parse a seed route URL such as `nats://10.0.0.2:6222`
pub fn parse_route_url(raw: &str) -> BrokerResult<Url> {
    let invalid = |reason: &str| BrokerError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !ROUTE_SCHEMES.contains(&url.scheme()) {
        return Err(invalid(&format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    if url.port().is_none() {
        return Err(invalid("missing port"));
    }
    Ok(url)
}

/// `host:port` to dial for a route URL
pub fn route_addr(url: &Url) -> BrokerResult<String> {
    let host = url.host_str().ok_or_else(|| BrokerError::InvalidUrl {
        url: url.to_string(),
        reason: "missing host".to_string(),
    })?;
    let port = url.port().ok_or_else(|| BrokerError::InvalidUrl {
        url: url.to_string(),
        reason: "missing port".to_string(),
    })?;
    Ok(format!("{}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::codec::encode_b64;
    use ed25519_dalek::Signer;
    use tempfile::TempDir;

    #[test]
    fn test_parse_route_url() {
        let url = parse_route_url("nats://127.0.0.1:6222").unwrap();
        assert_eq!(route_addr(&url).unwrap(), "127.0.0.1:6222");

        assert!(matches!(parse_route_url("not a url"), Err(BrokerError::InvalidUrl { .. })));
        assert!(matches!(parse_route_url("http://127.0.0.1:6222"), Err(BrokerError::InvalidUrl { .. })));
        assert!(matches!(parse_route_url("nats://127.0.0.1"), Err(BrokerError::InvalidUrl { .. })));
    }

    #[test]
    fn test_auth_file_round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.conf");

        let file = AuthFile {
            server_name: Some("node-a".to_string()),
            authorization: Some(Authorization {
                token: Some("s3cret".to_string()),
                nkeys: vec![],
            }),
            cluster: Some(AuthFileCluster {
                name: Some("custom".to_string()),
            }),
        };
        file.save(&path).unwrap();

        let options = ServerOptions::from_auth_file(&path).unwrap();
        assert_eq!(options.server_name, "node-a");
        assert_eq!(options.authorization.unwrap().token.as_deref(), Some("s3cret"));
        assert_eq!(options.cluster.unwrap().name, "custom");
    }

    #[test]
    fn test_auth_file_missing_or_malformed() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            AuthFile::load(dir.path().join("missing.conf")),
            Err(BrokerError::AuthConfig(_))
        ));

        let bad = dir.path().join("bad.conf");
        std::fs::write(&bad, "server_name = [").unwrap();
        assert!(matches!(AuthFile::load(&bad), Err(BrokerError::AuthConfig(_))));
    }

    #[test]
    fn test_token_authorization() {
        let auth = Authorization {
            token: Some("abc".to_string()),
            nkeys: vec![],
        };
        let good = ConnectInfo {
            token: Some("abc".to_string()),
            ..Default::default()
        };
        let bad = ConnectInfo {
            token: Some("nope".to_string()),
            ..Default::default()
        };
        assert!(auth.verify(&good, None));
        assert!(!auth.verify(&bad, None));
        assert!(!auth.verify(&ConnectInfo::default(), None));
    }

    #[test]
    fn test_nkey_authorization() {
        let seed = nkey::encode_user_seed(&[3u8; 32]);
        let public = nkey::public_from_seed(&seed).unwrap();
        let signing_key = nkey::signing_key_from_seed(&seed).unwrap();

        let auth = Authorization {
            token: None,
            nkeys: vec![public.clone()],
        };
        let nonce = "challenge";
        let connect = ConnectInfo {
            nkey: Some(public.clone()),
            sig: Some(encode_b64(&signing_key.sign(nonce.as_bytes()).to_bytes())),
            ..Default::default()
        };

        assert!(auth.verify(&connect, Some(nonce)));
        assert!(!auth.verify(&connect, Some("other nonce")));
        assert!(!auth.verify(&connect, None));

        let stranger = Authorization {
            token: None,
            nkeys: vec![nkey::public_from_seed(&nkey::encode_user_seed(&[4u8; 32])).unwrap()],
        };
        assert!(!stranger.verify(&connect, Some(nonce)));
    }
}
