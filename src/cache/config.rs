//! Cache tuning shared by the account, site and file tiers.

use std::{num::NonZeroUsize, time::Duration};

pub(crate) const DEFAULT_REFRESH_SECS: u64 = 60;
pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 180;
pub(crate) const DEFAULT_MAX_FILE_SIZE: u64 = 3 * 1024 * 1024;
pub(crate) const DEFAULT_MAX_FILE_ENTRIES: usize = 1024;
pub(crate) const DEFAULT_MAX_SITES: usize = 4096;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Age after which an account or site entry is refreshed from upstream.
    pub refresh_interval: Duration,
    /// Lifetime of an outer entry and of each cached file.
    pub entry_lifetime: Duration,
    /// Files declaring a larger length are streamed through uncached.
    pub max_file_size: u64,
    /// Per-site bound on cached file entries.
    pub max_file_entries: usize,
    /// Bound on the account and site tables.
    pub max_sites: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_SECS),
            entry_lifetime: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_file_entries: DEFAULT_MAX_FILE_ENTRIES,
            max_sites: DEFAULT_MAX_SITES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            refresh_interval: settings.refresh,
            entry_lifetime: settings.timeout,
            max_file_size: settings.max_file_size,
            max_file_entries: settings.max_file_entries.get(),
            max_sites: settings.max_sites.get(),
        }
    }
}

impl CacheConfig {
    pub fn max_file_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_file_entries).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn max_sites_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_sites).unwrap_or(NonZeroUsize::MIN)
    }

    /// Whether an entry stamped at `fetched_at` is due for a refresh.
    pub fn is_stale(&self, fetched_at: std::time::Instant) -> bool {
        fetched_at.elapsed() > self.refresh_interval
    }
}
