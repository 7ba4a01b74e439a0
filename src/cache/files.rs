//! Per-site file content cache.

use bytes::Bytes;

use super::{config::CacheConfig, store::TtlStore};

const TABLE: &str = "cache::files";

/// Outcome of looking a path up in a [`FileCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLookup {
    /// Never looked up, or the entry expired.
    Absent,
    /// Upstream confirmed the path does not exist.
    Missing,
    Present(Bytes),
}

#[derive(Clone)]
enum FileSlot {
    Missing,
    Present(Bytes),
}

/// File bodies of one site at one revision, keyed by in-repository path.
pub struct FileCache {
    store: TtlStore<String, FileSlot>,
}

impl FileCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            store: TtlStore::new(
                TABLE,
                config.max_file_entries_non_zero(),
                config.entry_lifetime,
            ),
        }
    }

    pub fn lookup(&self, path: &str) -> FileLookup {
        match self.store.get(path) {
            None => FileLookup::Absent,
            Some(FileSlot::Missing) => FileLookup::Missing,
            Some(FileSlot::Present(body)) => FileLookup::Present(body),
        }
    }

    pub fn store(&self, path: &str, body: Bytes) {
        self.store.insert(path.to_string(), FileSlot::Present(body));
    }

    /// Record a confirmed upstream absence.
    pub fn mark_missing(&self, path: &str) {
        self.store.insert(path.to_string(), FileSlot::Missing);
    }

    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired()
    }

    pub fn flush(&self) {
        self.store.clear();
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
