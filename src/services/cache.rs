//! Small in-memory cache with per-entry expiry and LRU eviction, shared by the
//! providers.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::RwLock;

/// Entries kept per provider before the least recently used is evicted.
pub const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(n) => n,
    None => unreachable!(),
};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
pub struct TtlCache<K: Hash + Eq, V> {
    default_ttl: Duration,
    store: RwLock<LruCache<K, CacheEntry<V>>>,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_capacity(default_ttl, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(default_ttl: Duration, capacity: NonZeroUsize) -> Self {
        Self {
            default_ttl,
            store: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// A live entry for `key`, dropping it if it has expired.
    pub async fn get(&self, key: &K) -> Option<V> {
        // LruCache::get updates recency, so it needs the write lock
        let mut store = self.store.write().await;
        match store.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => Some(entry.value.clone()),
            Some(_) => {
                store.pop(key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl).await;
    }

    /// Insert with an explicit lifetime, e.g. one taken from an `Expires` header.
    pub async fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut store = self.store.write().await;

        let expired: Vec<K> = store
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            store.pop(k);
        }

        if let Some((evicted, _)) = store.push(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        ) {
            // push also returns the old value when the key was already cached
            if !store.contains(&evicted) {
                tracing::debug!("Cache full, evicted least recently used entry");
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }
}
