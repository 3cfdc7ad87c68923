//! Identity provisioning
//!
//! A provisioner hands the rest of the crate three artifacts: the user root
//! seed, a credentials file holding that seed for broker clients, and the
//! broker authorization file listing the user's public key. Only their shape
//! is checked here.

use crate::broker::{format_credentials, AuthFile, Authorization, BrokerError};
use crate::crypto::{nkey, validate_root_secret, CryptoError};
use crate::error::ErrorCategory;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const SEED_FILE: &str = "user.seed";
pub const CREDENTIALS_FILE: &str = "user.creds";
pub const AUTH_FILE: &str = "auth.toml";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("{path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("missing provisioned artifact: {0}")]
    MissingArtifact(PathBuf),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl ProvisionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProvisionError::Io { .. } => ErrorCategory::Storage,
            ProvisionError::MissingArtifact(_) => ErrorCategory::Configuration,
            ProvisionError::Crypto(e) => e.category(),
            ProvisionError::Broker(e) => e.category(),
        }
    }
}

pub type ProvisionResult<T> = std::result::Result<T, ProvisionError>;

/// Artifacts produced by a provisioner
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisionedIdentity {
    /// User seed (`SU...`)
    pub root_secret: String,
    pub credentials_path: PathBuf,
    pub resolver_config_path: PathBuf,
}

impl ProvisionedIdentity {
    /// Check the seed is well formed and both files exist
    pub fn validate(&self) -> ProvisionResult<()> {
        validate_root_secret(&self.root_secret)?;
        for path in [&self.credentials_path, &self.resolver_config_path] {
            if !path.is_file() {
                return Err(ProvisionError::MissingArtifact(path.clone()));
            }
        }
        Ok(())
    }

    /// Public identity (`U...`) of the seed
    pub fn public_identity(&self) -> ProvisionResult<String> {
        Ok(nkey::public_from_seed(&self.root_secret)?)
    }
}

impl std::fmt::Debug for ProvisionedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionedIdentity")
            .field("root_secret", &"<redacted>")
            .field("credentials_path", &self.credentials_path)
            .field("resolver_config_path", &self.resolver_config_path)
            .finish()
    }
}

pub trait Provisioner: Send + Sync {
    fn provision(&self) -> ProvisionResult<ProvisionedIdentity>;
}

/// Returns fixed artifacts, for tests and pre-provisioned deployments
#[derive(Debug, Clone)]
pub struct StaticProvisioner {
    identity: ProvisionedIdentity,
}

impl StaticProvisioner {
    pub fn new(identity: ProvisionedIdentity) -> Self {
        Self { identity }
    }
}

impl Provisioner for StaticProvisioner {
    fn provision(&self) -> ProvisionResult<ProvisionedIdentity> {
        validate_root_secret(&self.identity.root_secret)?;
        Ok(self.identity.clone())
    }
}

/// Creates or reloads artifacts in a local directory
///
/// ```text
/// <dir>/user.seed    root seed, created once and reused
/// <dir>/user.creds   credentials for broker clients
/// <dir>/auth.toml    broker authorization listing the user public key
/// ```
#[derive(Debug, Clone)]
pub struct LocalProvisioner {
    dir: PathBuf,
    server_name: Option<String>,
}

impl LocalProvisioner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            server_name: None,
        }
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    fn load_or_create_seed(&self, path: &Path) -> ProvisionResult<String> {
        if path.exists() {
            let seed = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
            let seed = seed.trim().to_string();
            validate_root_secret(&seed)?;
            return Ok(seed);
        }

        let seed = nkey::generate_user_seed();
        write_private(path, &seed)?;
        info!(path = %path.display(), "generated new user seed");
        Ok(seed)
    }

    fn write_auth_file(&self, path: &Path, public: &str) -> ProvisionResult<()> {
        let mut auth = if path.exists() {
            AuthFile::load(path)?
        } else {
            AuthFile::default()
        };

        if self.server_name.is_some() {
            auth.server_name = self.server_name.clone();
        }
        let authorization = auth.authorization.get_or_insert_with(Authorization::default);
        if !authorization.nkeys.iter().any(|k| k == public) {
            authorization.nkeys.push(public.to_string());
        }

        auth.save(path)?;
        Ok(())
    }
}

impl Provisioner for LocalProvisioner {
    fn provision(&self) -> ProvisionResult<ProvisionedIdentity> {
        fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;

        let seed = self.load_or_create_seed(&self.dir.join(SEED_FILE))?;
        let public = nkey::public_from_seed(&seed)?;

        let credentials_path = self.dir.join(CREDENTIALS_FILE);
        write_private(&credentials_path, &format_credentials(&seed))?;

        let resolver_config_path = self.dir.join(AUTH_FILE);
        self.write_auth_file(&resolver_config_path, &public)?;

        info!(dir = %self.dir.display(), %public, "identity provisioned");
        Ok(ProvisionedIdentity {
            root_secret: seed,
            credentials_path,
            resolver_config_path,
        })
    }
}

fn io_error(path: &Path, e: std::io::Error) -> ProvisionError {
    ProvisionError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Write a file readable only by the owner
fn write_private(path: &Path, contents: &str) -> ProvisionResult<()> {
    fs::write(path, contents).map_err(|e| io_error(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_error(path, e))?;
    }
    Ok(())
}
