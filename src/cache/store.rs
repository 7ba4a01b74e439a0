//! Bounded LRU table whose entries also expire after a fixed lifetime.
//!
//! Every cache tier (accounts, sites, per-site files) is an instance of
//! [`TtlStore`]. Capacity eviction and expiry both route the dropped value
//! through an optional eviction listener so owners can release nested state.

use std::{
    borrow::Borrow,
    hash::Hash,
    num::NonZeroUsize,
    sync::RwLock,
    time::{Duration, Instant},
};

use lru::LruCache;

use super::lock::{rw_read, rw_write};

type EvictionListener<K, V> = Box<dyn Fn(&K, V) + Send + Sync>;

struct Timed<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Timed<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

pub struct TtlStore<K, V> {
    table: &'static str,
    ttl: Duration,
    entries: RwLock<LruCache<K, Timed<V>>>,
    on_evict: Option<EvictionListener<K, V>>,
}

impl<K, V> TtlStore<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(table: &'static str, capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            table,
            ttl,
            entries: RwLock::new(LruCache::new(capacity)),
            on_evict: None,
        }
    }

    /// Invoke `listener` for every entry dropped by expiry, capacity pressure or clearing.
    pub fn with_eviction_listener(mut self, listener: impl Fn(&K, V) + Send + Sync + 'static) -> Self {
        self.on_evict = Some(Box::new(listener));
        self
    }

    /// Return a live entry, promoting it in LRU order. Expired entries are dropped on sight.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let expired = {
            let mut entries = rw_write(&self.entries, self.table, "get");
            let lookup = entries
                .get(key)
                .map(|slot| (!slot.is_expired(now)).then(|| slot.value.clone()));
            match lookup {
                Some(Some(value)) => return Some(value),
                Some(None) => entries.pop_entry(key),
                None => None,
            }
        };
        if let Some((expired_key, slot)) = expired {
            self.notify(&expired_key, slot.value);
        }
        None
    }

    /// Store `value` with a fresh lifetime. A same-key replacement is not reported as an eviction.
    pub fn insert(&self, key: K, value: V) {
        let slot = Timed {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        let displaced = rw_write(&self.entries, self.table, "insert").push(key.clone(), slot);
        if let Some((old_key, old)) = displaced
            && old_key != key
        {
            self.notify(&old_key, old.value);
        }
    }

    /// Clones of every live value, most recently used first.
    pub fn values(&self) -> Vec<V> {
        let now = Instant::now();
        rw_read(&self.entries, self.table, "values")
            .iter()
            .filter(|(_, slot)| !slot.is_expired(now))
            .map(|(_, slot)| slot.value.clone())
            .collect()
    }

    /// Drop every expired entry; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(K, Timed<V>)> = {
            let mut entries = rw_write(&self.entries, self.table, "purge_expired");
            let keys: Vec<K> = entries
                .iter()
                .filter(|(_, slot)| slot.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| entries.pop(&key).map(|slot| (key, slot)))
                .collect()
        };
        let purged = expired.len();
        for (key, slot) in expired {
            self.notify(&key, slot.value);
        }
        purged
    }

    pub fn clear(&self) {
        let drained: Vec<(K, Timed<V>)> = {
            let mut entries = rw_write(&self.entries, self.table, "clear");
            let mut drained = Vec::with_capacity(entries.len());
            while let Some(pair) = entries.pop_lru() {
                drained.push(pair);
            }
            drained
        };
        for (key, slot) in drained {
            self.notify(&key, slot.value);
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, self.table, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, key: &K, value: V) {
        if let Some(listener) = self.on_evict.as_ref() {
            listener(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn capacity(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).expect("non-zero capacity")
    }

    fn recording_store(
        cap: usize,
        ttl: Duration,
    ) -> (TtlStore<String, u32>, Arc<Mutex<Vec<String>>>) {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&evicted);
        let store = TtlStore::new("test", capacity(cap), ttl).with_eviction_listener(
            move |key: &String, _value: u32| {
                sink.lock().expect("sink").push(key.clone());
            },
        );
        (store, evicted)
    }

    #[test]
    fn live_entries_are_returned() {
        let (store, evicted) = recording_store(4, Duration::from_secs(60));
        store.insert("a".to_string(), 1);
        assert_eq!(store.get("a"), Some(1));
        assert_eq!(store.values(), vec![1]);
        assert!(evicted.lock().expect("sink").is_empty());
    }

    #[test]
    fn expired_entries_are_dropped_and_reported() {
        let (store, evicted) = recording_store(4, Duration::ZERO);
        store.insert("a".to_string(), 1);
        assert!(store.values().is_empty());
        assert_eq!(store.get("a"), None);
        assert_eq!(store.len(), 0);
        assert_eq!(*evicted.lock().expect("sink"), vec!["a".to_string()]);
    }

    #[test]
    fn capacity_eviction_reports_least_recently_used() {
        let (store, evicted) = recording_store(2, Duration::from_secs(60));
        store.insert("a".to_string(), 1);
        store.insert("b".to_string(), 2);
        store.get("a");
        store.insert("c".to_string(), 3);

        assert_eq!(*evicted.lock().expect("sink"), vec!["b".to_string()]);
        assert_eq!(store.get("a"), Some(1));
        assert_eq!(store.get("c"), Some(3));
    }

    #[test]
    fn replacing_a_key_is_not_an_eviction() {
        let (store, evicted) = recording_store(2, Duration::from_secs(60));
        store.insert("a".to_string(), 1);
        store.insert("a".to_string(), 2);
        assert_eq!(store.get("a"), Some(2));
        assert!(evicted.lock().expect("sink").is_empty());
    }

    #[test]
    fn purge_and_clear_notify_every_entry() {
        let (store, evicted) = recording_store(8, Duration::ZERO);
        store.insert("a".to_string(), 1);
        store.insert("b".to_string(), 2);
        assert_eq!(store.purge_expired(), 2);
        assert!(store.is_empty());

        let (store, evicted_on_clear) = recording_store(8, Duration::from_secs(60));
        store.insert("x".to_string(), 1);
        store.insert("y".to_string(), 2);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(evicted_on_clear.lock().expect("sink").len(), 2);
        assert_eq!(evicted.lock().expect("sink").len(), 2);
    }
}
