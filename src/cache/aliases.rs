//! Custom-domain alias registry.
//!
//! Maps a lower-cased custom hostname to the [`RepositoryKey`] serving it and
//! keeps the reverse direction so a repository holds at most one active
//! hostname. Tables may be mirrored into a process-wide [`AliasTable`] shared
//! by every configured site set, and snapshotted to a JSON file after each
//! mutation.

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::RepositoryKey;

use super::lock::{rw_read, rw_write};

const TABLE: &str = "cache::aliases";

/// Serialized form of an alias table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasSnapshot {
    /// hostname → repository
    #[serde(default, alias = "DomainAlias")]
    pub aliases: BTreeMap<String, RepositoryKey>,
    /// canonical repository key → hostname
    #[serde(default)]
    pub reverse: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum AliasError {
    #[error("failed to read alias snapshot `{path}`")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("alias snapshot `{path}` is not valid JSON")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Both alias directions behind one lock.
#[derive(Debug, Default)]
pub struct AliasTable {
    maps: RwLock<AliasSnapshot>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: AliasSnapshot) -> Self {
        let mut normalized = AliasSnapshot::default();
        for (host, key) in snapshot.aliases {
            normalized.aliases.insert(host.to_lowercase(), key);
        }
        for (key, host) in snapshot.reverse {
            normalized.reverse.insert(key, host.to_lowercase());
        }
        Self {
            maps: RwLock::new(normalized),
        }
    }

    pub fn lookup(&self, host: &str) -> Option<RepositoryKey> {
        rw_read(&self.maps, TABLE, "lookup")
            .aliases
            .get(host)
            .cloned()
    }

    pub fn host_for(&self, key: &RepositoryKey) -> Option<String> {
        rw_read(&self.maps, TABLE, "host_for")
            .reverse
            .get(&key.cache_key())
            .cloned()
    }

    /// Point `host` at `key`, dropping whatever hostname `key` had before.
    /// Returns false when the binding already existed.
    pub fn bind(&self, host: &str, key: &RepositoryKey) -> bool {
        let cache_key = key.cache_key();
        let mut maps = rw_write(&self.maps, TABLE, "bind");
        if maps.reverse.get(&cache_key).map(String::as_str) == Some(host)
            && maps.aliases.get(host) == Some(key)
        {
            return false;
        }

        if let Some(old_host) = maps.reverse.remove(&cache_key)
            && old_host != host
        {
            maps.aliases.remove(&old_host);
        }
        if let Some(previous_owner) = maps.aliases.insert(host.to_string(), key.clone())
            && previous_owner != *key
        {
            let previous_key = previous_owner.cache_key();
            if maps.reverse.get(&previous_key).map(String::as_str) == Some(host) {
                maps.reverse.remove(&previous_key);
            }
        }
        maps.reverse.insert(cache_key, host.to_string());
        true
    }

    /// Remove the hostname bound to `key`, if any.
    pub fn unbind(&self, key: &RepositoryKey) -> Option<String> {
        let mut maps = rw_write(&self.maps, TABLE, "unbind");
        let host = maps.reverse.remove(&key.cache_key())?;
        if maps.aliases.get(&host) == Some(key) {
            maps.aliases.remove(&host);
        }
        Some(host)
    }

    pub fn snapshot(&self) -> AliasSnapshot {
        rw_read(&self.maps, TABLE, "snapshot").clone()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.maps, TABLE, "len").aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Alias lookups and registrations for one configured site set.
#[derive(Debug, Default)]
pub struct AliasRegistry {
    local: AliasTable,
    shared: Option<Arc<AliasTable>>,
    snapshot_path: Option<PathBuf>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl AliasRegistry {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the snapshot at `path` when it exists; later mutations rewrite it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, AliasError> {
        let path = path.into();
        let local = match tokio::fs::read(&path).await {
            Ok(body) => {
                let snapshot: AliasSnapshot =
                    serde_json::from_slice(&body).map_err(|source| AliasError::Decode {
                        path: path.clone(),
                        source,
                    })?;
                info!(
                    path = %path.display(),
                    aliases = snapshot.aliases.len(),
                    "Loaded alias snapshot"
                );
                AliasTable::from_snapshot(snapshot)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => AliasTable::new(),
            Err(source) => return Err(AliasError::Read { path, source }),
        };
        Ok(Self {
            local,
            snapshot_path: Some(path),
            ..Self::default()
        })
    }

    /// Mirror every registration into `shared` and fall back to it on lookup.
    pub fn with_shared(mut self, shared: Arc<AliasTable>) -> Self {
        for (host, key) in self.local.snapshot().aliases {
            shared.bind(&host, &key);
        }
        self.shared = Some(shared);
        self
    }

    pub fn lookup(&self, host: &str) -> Option<RepositoryKey> {
        let host = host.to_lowercase();
        self.local.lookup(&host).or_else(|| {
            self.shared
                .as_ref()
                .and_then(|shared| shared.lookup(&host))
        })
    }

    /// Register the custom domains declared by `key`.
    ///
    /// A repository keeps one active hostname, so domains are bound last to
    /// first and the first declared domain is the one left in place. Returns
    /// whether anything changed.
    pub async fn register(&self, key: &RepositoryKey, hosts: &[String]) -> bool {
        let mut changed = false;
        for host in hosts.iter().rev() {
            let host = host.to_lowercase();
            if host.is_empty() {
                continue;
            }
            if let Some(shared) = self.shared.as_ref() {
                shared.bind(&host, key);
            }
            if self.local.bind(&host, key) {
                changed = true;
                counter!("pages_alias_registered_total").increment(1);
                info!(host = %host, repository = %key, "Registered custom domain");
            }
        }
        if changed {
            self.persist().await;
        }
        changed
    }

    /// Drop the hostname currently bound to `key`.
    pub async fn retract(&self, key: &RepositoryKey) -> bool {
        if let Some(shared) = self.shared.as_ref()
            && shared.host_for(key) == self.local.host_for(key)
        {
            shared.unbind(key);
        }
        let Some(host) = self.local.unbind(key) else {
            return false;
        };
        info!(host = %host, repository = %key, "Retracted custom domain");
        self.persist().await;
        true
    }

    pub fn snapshot(&self) -> AliasSnapshot {
        self.local.snapshot()
    }

    async fn persist(&self) {
        let Some(path) = self.snapshot_path.as_ref() else {
            return;
        };
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.local.snapshot();
        let result = match serde_json::to_vec_pretty(&snapshot) {
            Ok(body) => write_atomically(path, &body).await,
            Err(err) => Err(io::Error::other(err)),
        };
        match result {
            Ok(()) => debug!(path = %path.display(), aliases = snapshot.aliases.len(), "Wrote alias snapshot"),
            Err(err) => warn!(
                path = %path.display(),
                error = %err,
                "Failed to write alias snapshot"
            ),
        }
    }
}

async fn write_atomically(path: &Path, body: &[u8]) -> io::Result<()> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);
    tokio::fs::write(&staging, body).await?;
    tokio::fs::rename(&staging, path).await
}
