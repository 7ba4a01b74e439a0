//! Account cache: which repositories each account owns.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Instant,
};

use metrics::counter;
use tracing::debug;

use crate::application::{
    error::PagesError,
    provider::{AccountKind, ContentProvider, ProviderError},
};

use super::{config::CacheConfig, locker::DomainLocker, store::TtlStore};

const TABLE: &str = "cache::accounts";

#[derive(Debug, Clone)]
pub struct AccountRecord {
    /// lower-cased name → name as published upstream
    repositories: HashMap<String, String>,
    fetched_at: Instant,
}

impl AccountRecord {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        let repositories = names
            .into_iter()
            .map(|name| (name.to_lowercase(), name))
            .collect();
        Self {
            repositories,
            fetched_at: Instant::now(),
        }
    }

    /// Case-insensitive ownership check; never refreshes.
    pub fn exists(&self, repo: &str) -> bool {
        self.repositories.contains_key(&repo.to_lowercase())
    }

    /// The upstream spelling of `repo`, if the account owns it.
    pub fn canonical_name(&self, repo: &str) -> Option<&str> {
        self.repositories.get(&repo.to_lowercase()).map(String::as_str)
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }
}

#[derive(Clone)]
pub struct AccountCache {
    inner: Arc<AccountCacheInner>,
}

struct AccountCacheInner {
    provider: Arc<dyn ContentProvider>,
    config: CacheConfig,
    locker: DomainLocker,
    records: TtlStore<String, Arc<AccountRecord>>,
}

impl AccountCache {
    pub fn new(provider: Arc<dyn ContentProvider>, config: CacheConfig) -> Self {
        let records = TtlStore::new(TABLE, config.max_sites_non_zero(), config.entry_lifetime);
        Self {
            inner: Arc::new(AccountCacheInner {
                provider,
                config,
                locker: DomainLocker::new(),
                records,
            }),
        }
    }

    /// Return the account's repositories, refreshing them when stale.
    ///
    /// The refresh runs detached so a caller that goes away does not abort it
    /// for the others queued on the same account.
    pub async fn get(&self, owner: &str) -> Result<Arc<AccountRecord>, PagesError> {
        if let Some(record) = self.inner.fresh(owner) {
            return Ok(record);
        }
        let inner = Arc::clone(&self.inner);
        let owner = owner.to_string();
        tokio::spawn(async move { inner.refresh(&owner).await })
            .await
            .map_err(|err| PagesError::from_join(TABLE, err))?
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    pub fn purge_expired(&self) -> usize {
        self.inner.records.purge_expired()
    }
}

impl AccountCacheInner {
    fn fresh(&self, owner: &str) -> Option<Arc<AccountRecord>> {
        self.records
            .get(owner)
            .filter(|record| !self.config.is_stale(record.fetched_at()))
    }

    async fn refresh(&self, owner: &str) -> Result<Arc<AccountRecord>, PagesError> {
        let _guard = self.locker.acquire(owner).await;
        if let Some(record) = self.fresh(owner) {
            return Ok(record);
        }

        let names = match self
            .provider
            .list_repositories(owner, AccountKind::Organization)
            .await
        {
            Ok(names) => names,
            Err(ProviderError::NotFound) => {
                match self.provider.list_repositories(owner, AccountKind::User).await {
                    Ok(names) => names,
                    Err(ProviderError::NotFound) => {
                        return Err(PagesError::not_found(format!(
                            "account `{owner}` does not exist"
                        )));
                    }
                    Err(err) => return Err(PagesError::Upstream(err)),
                }
            }
            Err(err) => return Err(PagesError::Upstream(err)),
        };

        counter!("pages_cache_account_refresh_total").increment(1);
        debug!(owner, repositories = names.len(), "Refreshed account");

        let record = Arc::new(AccountRecord::new(names));
        self.records.insert(owner.to_string(), Arc::clone(&record));
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_checks_ignore_case() {
        let record = AccountRecord::new(vec![
            "Alice.Pages.Example.org".to_string(),
            "Blog".to_string(),
        ]);
        assert!(record.exists("alice.pages.example.org"));
        assert!(record.exists("BLOG"));
        assert!(!record.exists("docs"));
        assert_eq!(record.canonical_name("blog"), Some("Blog"));
    }
}
