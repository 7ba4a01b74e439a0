//! Derived identifiers for cached content.

use sha2::{Digest, Sha256};

use crate::domain::RepositoryKey;

/// Quoted entity tag for `path` of `key` at `revision`.
///
/// Stable for as long as the revision is, so clients can revalidate across
/// cache evictions and restarts.
pub fn entity_tag(revision: &str, key: &RepositoryKey, path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(revision.as_bytes());
    hasher.update(b"|");
    hasher.update(key.cache_key().as_bytes());
    hasher.update(b"|");
    hasher.update(path.as_bytes());
    format!("\"{}\"", hex::encode(hasher.finalize()))
}
