//! Repository metadata cache.
//!
//! One [`SiteEntry`] per [`RepositoryKey`], holding what the last refresh
//! learned about the repository and owning that site's [`FileCache`]. Fresh
//! entries are served without locking; stale or missing ones are refreshed
//! under a per-key lock so concurrent requests collapse into one upstream
//! round trip.

use std::{
    sync::{Arc, RwLock},
    time::Instant,
};

use bytes::Bytes;
use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{
    application::{
        error::PagesError,
        provider::{ContentProvider, ProviderError},
    },
    domain::{RepositoryKey, SiteTags, cname::CNAME_FILE, parse_custom_domains},
};

use super::{
    aliases::AliasRegistry,
    config::CacheConfig,
    files::{FileCache, FileLookup},
    lock::{rw_read, rw_write},
    locker::DomainLocker,
    store::TtlStore,
};

const TABLE: &str = "cache::sites";
const INDEX_DOCUMENT: &str = "index.html";
const NOT_FOUND_DOCUMENT: &str = "/404.html";

/// What the last refresh learned about one repository.
#[derive(Debug, Clone)]
pub struct RepositoryMetadata {
    pub fetched_at: Instant,
    /// False once the repository or branch is confirmed not to be a site.
    pub exists: bool,
    pub revision: String,
    pub revision_date: Option<OffsetDateTime>,
    pub tags: SiteTags,
    pub custom_domains: Vec<String>,
    pub root_path: String,
    /// Default document appended to directory paths.
    pub index_name: Option<String>,
    /// Path served when a requested file is missing.
    pub not_found_name: Option<String>,
    /// The custom-domain marker could not be read on the last refresh.
    domains_pending: bool,
}

impl RepositoryMetadata {
    fn empty(root_path: &str) -> Self {
        Self {
            fetched_at: Instant::now(),
            exists: false,
            revision: String::new(),
            revision_date: None,
            tags: SiteTags::default(),
            custom_domains: Vec::new(),
            root_path: root_path.to_string(),
            index_name: None,
            not_found_name: None,
            domains_pending: false,
        }
    }

    pub fn is_spa(&self) -> bool {
        self.tags.is_spa()
    }

    /// Upstream path of an in-site path.
    pub fn upstream_path(&self, path: &str) -> String {
        format!("{}{}", self.root_path, path)
    }
}

pub struct SiteEntry {
    key: RepositoryKey,
    metadata: RwLock<RepositoryMetadata>,
    files: FileCache,
}

impl SiteEntry {
    fn new(key: RepositoryKey, config: &CacheConfig, root_path: &str) -> Self {
        Self {
            key,
            metadata: RwLock::new(RepositoryMetadata::empty(root_path)),
            files: FileCache::new(config),
        }
    }

    pub fn key(&self) -> &RepositoryKey {
        &self.key
    }

    pub fn metadata(&self) -> RepositoryMetadata {
        rw_read(&self.metadata, TABLE, "metadata").clone()
    }

    pub fn fetched_at(&self) -> Instant {
        rw_read(&self.metadata, TABLE, "fetched_at").fetched_at
    }

    pub fn lookup_file(&self, path: &str) -> FileLookup {
        self.files.lookup(path)
    }

    /// Cache `body` unless the site moved past `revision` while it was fetched.
    ///
    /// The metadata read guard is held across the write so a concurrent
    /// commit cannot flush in between.
    pub fn store_file(&self, revision: &str, path: &str, body: Bytes) -> bool {
        let metadata = rw_read(&self.metadata, TABLE, "store_file");
        if metadata.revision != revision {
            return false;
        }
        self.files.store(path, body);
        true
    }

    pub fn mark_missing(&self, revision: &str, path: &str) -> bool {
        let metadata = rw_read(&self.metadata, TABLE, "mark_missing");
        if metadata.revision != revision {
            return false;
        }
        self.files.mark_missing(path);
        true
    }

    pub fn cached_files(&self) -> usize {
        self.files.len()
    }

    /// Replace the metadata; files are flushed under the same write guard.
    fn commit(&self, next: RepositoryMetadata, flush_files: bool) {
        let mut metadata = rw_write(&self.metadata, TABLE, "commit");
        *metadata = next;
        if flush_files {
            self.files.flush();
        }
    }
}

/// Result of [`SiteCache::fetch`].
pub struct SiteFetch {
    pub entry: Arc<SiteEntry>,
    /// The entry existed before this call.
    pub cached: bool,
}

#[derive(Clone)]
pub struct SiteCache {
    inner: Arc<SiteCacheInner>,
}

struct SiteCacheInner {
    provider: Arc<dyn ContentProvider>,
    aliases: Arc<AliasRegistry>,
    config: CacheConfig,
    root_path: String,
    locker: DomainLocker,
    entries: TtlStore<String, Arc<SiteEntry>>,
}

impl SiteCache {
    pub fn new(
        provider: Arc<dyn ContentProvider>,
        aliases: Arc<AliasRegistry>,
        config: CacheConfig,
        root_path: impl Into<String>,
    ) -> Self {
        let entries = TtlStore::new(TABLE, config.max_sites_non_zero(), config.entry_lifetime)
            .with_eviction_listener(|key: &String, entry: Arc<SiteEntry>| {
                debug!(site = %key, files = entry.cached_files(), "Evicted site entry");
                entry.files.flush();
            });
        Self {
            inner: Arc::new(SiteCacheInner {
                provider,
                aliases,
                config,
                root_path: root_path.into(),
                locker: DomainLocker::new(),
                entries,
            }),
        }
    }

    /// Return the entry for `key`, refreshing it first when missing or stale.
    pub async fn fetch(&self, key: &RepositoryKey) -> Result<SiteFetch, PagesError> {
        let cache_key = key.cache_key();
        if let Some(entry) = self.inner.entries.get(&cache_key)
            && !self.inner.config.is_stale(entry.fetched_at())
        {
            return Ok(SiteFetch {
                entry,
                cached: true,
            });
        }

        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        tokio::spawn(async move { inner.fetch_locked(key, cache_key).await })
            .await
            .map_err(|err| PagesError::from_join(TABLE, err))?
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Drop expired site entries, then expired files of the remaining ones.
    pub fn purge_expired(&self) -> usize {
        let sites = self.inner.entries.purge_expired();
        let files: usize = self
            .inner
            .entries
            .values()
            .iter()
            .map(|entry| entry.files.purge_expired())
            .sum();
        sites + files
    }
}

impl SiteCacheInner {
    async fn fetch_locked(
        &self,
        key: RepositoryKey,
        cache_key: String,
    ) -> Result<SiteFetch, PagesError> {
        let _guard = self.locker.acquire(&cache_key).await;

        if let Some(entry) = self.entries.get(&cache_key) {
            if self.config.is_stale(entry.fetched_at()) {
                self.refresh(&entry).await?;
            }
            return Ok(SiteFetch {
                entry,
                cached: true,
            });
        }

        let entry = Arc::new(SiteEntry::new(key, &self.config, &self.root_path));
        self.refresh(&entry).await?;
        self.entries.insert(cache_key, Arc::clone(&entry));
        Ok(SiteFetch {
            entry,
            cached: false,
        })
    }

    async fn refresh(&self, entry: &SiteEntry) -> Result<(), PagesError> {
        let key = entry.key();
        let previous = entry.metadata();

        let (branches, topics) = tokio::join!(
            self.provider.list_branches(&key.owner, &key.repo),
            self.provider.list_topics(&key.owner, &key.repo),
        );
        counter!("pages_cache_site_refresh_total").increment(1);

        let branches = match branches {
            Ok(branches) => branches,
            Err(err) if err.is_client_error() => {
                debug!(site = %key, error = %err, "Repository is not a site");
                let mut next = previous;
                next.exists = false;
                next.revision.clear();
                next.fetched_at = Instant::now();
                entry.commit(next, true);
                return Ok(());
            }
            Err(err) => return Err(PagesError::Upstream(err)),
        };
        let topics = topics.map_err(PagesError::Upstream)?;
        let branch = branches
            .into_iter()
            .find(|branch| branch.name == key.branch)
            .ok_or_else(|| {
                PagesError::not_found(format!(
                    "branch `{}` not found in {}/{}",
                    key.branch, key.owner, key.repo
                ))
            })?;

        let mut next = previous.clone();
        next.tags = SiteTags::from_topics(&topics);

        let revision_changed = branch.commit_id != previous.revision;
        if !revision_changed && !previous.domains_pending {
            next.fetched_at = Instant::now();
            entry.commit(next, false);
            debug!(site = %key, revision = %branch.commit_id, "Revision unchanged");
            return Ok(());
        }

        if revision_changed {
            next.revision = branch.commit_id;
            next.revision_date = branch.commit_date;
            self.probe_documents(key, &mut next).await?;
            if !next.exists {
                next.custom_domains.clear();
                next.domains_pending = false;
                next.fetched_at = Instant::now();
                entry.commit(next, true);
                debug!(site = %key, "Branch has no index document");
                if !previous.custom_domains.is_empty() {
                    self.aliases.retract(key).await;
                }
                return Ok(());
            }
        }

        match self.read_custom_domains(key, &next).await {
            Ok(domains) => {
                next.custom_domains = domains;
                next.domains_pending = false;
            }
            Err(err) => {
                warn!(site = %key, error = %err, "Failed to read custom domain marker");
                next.domains_pending = true;
                next.fetched_at = Instant::now();
                entry.commit(next, revision_changed);
                return Err(err);
            }
        }

        next.fetched_at = Instant::now();
        let domains_changed = next.custom_domains != previous.custom_domains;
        let domains = next.custom_domains.clone();
        debug!(
            site = %key,
            revision = %next.revision,
            spa = next.is_spa(),
            custom_domains = domains.len(),
            "Refreshed site"
        );
        entry.commit(next, revision_changed);

        if domains_changed {
            if domains.is_empty() {
                self.aliases.retract(key).await;
            } else {
                self.aliases.register(key, &domains).await;
            }
        }
        Ok(())
    }

    /// Check for the index and fallback documents at the new revision.
    async fn probe_documents(
        &self,
        key: &RepositoryKey,
        next: &mut RepositoryMetadata,
    ) -> Result<(), PagesError> {
        let index_path = next.upstream_path(&format!("/{INDEX_DOCUMENT}"));
        next.exists = self
            .provider
            .file_exists(&key.owner, &key.repo, &next.revision, &index_path)
            .await
            .map_err(PagesError::Upstream)?;
        if !next.exists {
            next.index_name = None;
            next.not_found_name = None;
            return Ok(());
        }
        next.index_name = Some(INDEX_DOCUMENT.to_string());

        next.not_found_name = if next.is_spa() {
            Some(format!("/{INDEX_DOCUMENT}"))
        } else {
            let not_found_path = next.upstream_path(NOT_FOUND_DOCUMENT);
            self.provider
                .file_exists(&key.owner, &key.repo, &next.revision, &not_found_path)
                .await
                .map_err(PagesError::Upstream)?
                .then(|| NOT_FOUND_DOCUMENT.to_string())
        };
        Ok(())
    }

    async fn read_custom_domains(
        &self,
        key: &RepositoryKey,
        metadata: &RepositoryMetadata,
    ) -> Result<Vec<String>, PagesError> {
        let marker = format!("/{CNAME_FILE}");
        let file = match self
            .provider
            .open_file(&key.owner, &key.repo, &metadata.revision, &marker)
            .await
        {
            Ok(file) => file,
            Err(ProviderError::NotFound) => return Ok(Vec::new()),
            Err(err) => return Err(PagesError::Upstream(err)),
        };
        let body = file.into_bytes().await.map_err(PagesError::Upstream)?;
        Ok(parse_custom_domains(&String::from_utf8_lossy(&body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_at(revision: &str) -> SiteEntry {
        let entry = SiteEntry::new(
            RepositoryKey::new("alice", "docs", "gh-pages"),
            &CacheConfig::default(),
            "",
        );
        let mut metadata = entry.metadata();
        metadata.exists = true;
        metadata.revision = revision.to_string();
        entry.commit(metadata, true);
        entry
    }

    #[test]
    fn files_are_stored_at_the_current_revision() {
        let entry = entry_at("r1");
        assert!(entry.store_file("r1", "/a.css", Bytes::from_static(b"a")));
        assert!(entry.mark_missing("r1", "/gone.css"));
        assert_eq!(
            entry.lookup_file("/a.css"),
            FileLookup::Present(Bytes::from_static(b"a"))
        );
        assert_eq!(entry.lookup_file("/gone.css"), FileLookup::Missing);
    }

    #[test]
    fn superseded_revision_is_never_cached() {
        let entry = entry_at("r1");
        assert!(entry.store_file("r1", "/a.css", Bytes::from_static(b"a")));

        let mut next = entry.metadata();
        next.revision = "r2".to_string();
        entry.commit(next, true);
        assert_eq!(entry.cached_files(), 0);

        assert!(!entry.store_file("r1", "/a.css", Bytes::from_static(b"old")));
        assert!(!entry.mark_missing("r1", "/b.css"));
        assert_eq!(entry.lookup_file("/a.css"), FileLookup::Absent);
        assert_eq!(entry.lookup_file("/b.css"), FileLookup::Absent);
        assert_eq!(entry.cached_files(), 0);
    }
}
