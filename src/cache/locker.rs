//! Per-key mutual exclusion for cache refreshes.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes work on one logical key while leaving every other key free.
///
/// Lock handles are created lazily on first use and kept for the lifetime of
/// the locker; the key space is bounded by the domains actually served.
#[derive(Debug, Default)]
pub struct DomainLocker {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held for the duration of one refresh; dropping it releases the key.
pub type DomainGuard = OwnedMutexGuard<()>;

impl DomainLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other task holds `key`, then hold it until the guard drops.
    pub async fn acquire(&self, key: &str) -> DomainGuard {
        let lock = match self.locks.get(key) {
            Some(existing) => Arc::clone(existing.value()),
            None => Arc::clone(
                self.locks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .value(),
            ),
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let locker = DomainLocker::new();
        let _first = locker.acquire("alice").await;
        let second = tokio::time::timeout(Duration::from_millis(200), locker.acquire("bob")).await;
        assert!(second.is_ok());
        assert_eq!(locker.len(), 2);
    }

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locker = Arc::new(DomainLocker::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locker = Arc::clone(&locker);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = locker.acquire("alice").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locker.len(), 1);
    }

    #[tokio::test]
    async fn dropping_guard_releases_key() {
        let locker = DomainLocker::new();
        drop(locker.acquire("alice").await);
        let again = tokio::time::timeout(Duration::from_millis(200), locker.acquire("alice")).await;
        assert!(again.is_ok());
    }
}
