//! Persistent mirror of cached friend and group keys
//!
//! The service keeps its own in-memory maps; a store only mirrors writes and
//! is read back by [`ChatService::load_persisted_keys`](super::ChatService::load_persisted_keys).

use super::error::{ChatError, ChatResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// Keys as stored, base64 encoded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedKeys {
    #[serde(default)]
    pub friend_keys: BTreeMap<String, String>,
    #[serde(default)]
    pub group_keys: BTreeMap<String, String>,
}

pub trait KeyCacheStore: Send + Sync {
    fn put_friend_key(&self, peer_id: &str, public_key: &str) -> ChatResult<()>;

    fn put_group_key(&self, group_id: &str, key: &str) -> ChatResult<()>;

    fn load(&self) -> ChatResult<PersistedKeys>;
}

#[derive(Debug, Default)]
pub struct MemoryKeyCache {
    keys: Mutex<PersistedKeys>,
}

impl MemoryKeyCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyCacheStore for MemoryKeyCache {
    fn put_friend_key(&self, peer_id: &str, public_key: &str) -> ChatResult<()> {
        let mut keys = self.keys.lock().map_err(|_| poisoned())?;
        keys.friend_keys.insert(peer_id.to_string(), public_key.to_string());
        Ok(())
    }

    fn put_group_key(&self, group_id: &str, key: &str) -> ChatResult<()> {
        let mut keys = self.keys.lock().map_err(|_| poisoned())?;
        keys.group_keys.insert(group_id.to_string(), key.to_string());
        Ok(())
    }

    fn load(&self) -> ChatResult<PersistedKeys> {
        Ok(self.keys.lock().map_err(|_| poisoned())?.clone())
    }
}

/// JSON file store; every write rewrites the whole file
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the store, so a crash never leaves a truncated file. The file holds
/// group secrets and is created owner-only on unix.
#[derive(Debug)]
pub struct JsonFileKeyCache {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileKeyCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> ChatResult<PersistedKeys> {
        if !self.path.exists() {
            return Ok(PersistedKeys::default());
        }
        let contents = std::fs::read(&self.path).map_err(|e| self.storage_error(e))?;
        serde_json::from_slice(&contents).map_err(|e| self.storage_error(e))
    }

    fn update(&self, f: impl FnOnce(&mut PersistedKeys)) -> ChatResult<()> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let mut keys = self.read()?;
        f(&mut keys);

        let contents = serde_json::to_vec_pretty(&keys).map_err(|e| self.storage_error(e))?;
        self.write_atomic(&contents)
    }

    fn write_atomic(&self, contents: &[u8]) -> ChatResult<()> {
        let parent = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent,
            None => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(|e| self.storage_error(e))?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| self.storage_error(e))?;
        tmp.write_all(contents).map_err(|e| self.storage_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.storage_error(e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(|e| self.storage_error(e))?;
        }

        tmp.persist(&self.path).map_err(|e| self.storage_error(e.error))?;
        Ok(())
    }

    fn storage_error(&self, e: impl std::fmt::Display) -> ChatError {
        ChatError::Storage(format!("{}: {}", self.path.display(), e))
    }
}

impl KeyCacheStore for JsonFileKeyCache {
    fn put_friend_key(&self, peer_id: &str, public_key: &str) -> ChatResult<()> {
        self.update(|keys| {
            keys.friend_keys.insert(peer_id.to_string(), public_key.to_string());
        })
    }

    fn put_group_key(&self, group_id: &str, key: &str) -> ChatResult<()> {
        self.update(|keys| {
            keys.group_keys.insert(group_id.to_string(), key.to_string());
        })
    }

    fn load(&self) -> ChatResult<PersistedKeys> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        self.read()
    }
}

fn poisoned() -> ChatError {
    ChatError::Storage("key cache lock poisoned".to_string())
}
