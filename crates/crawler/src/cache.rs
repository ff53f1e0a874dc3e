//! Time-bounded key/value cache.
//!
//! One instance per use (crawl subtrees, derived summaries, embeddings), each
//! with its own capacity and TTL. A read after expiry is a miss and drops
//! the entry. At capacity the least recently used entry is evicted.

use lantern_config::CachePolicy;
use lru::LruCache;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// A cached value with its expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
}

#[derive(Debug)]
pub struct TtlCache<V> {
    name: String,
    ttl: Duration,
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(name: impl Into<String>, capacity: usize, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            entries: Mutex::new(LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))),
        }
    }

    pub fn from_policy(name: impl Into<String>, policy: &CachePolicy) -> Self {
        Self::new(name, policy.capacity, Duration::from_secs(policy.ttl_secs))
    }

    /// Look up a live entry. Expired entries are removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        match entries.get(key) {
            None => return None,
            Some(entry) if now < entry.expires_at => return Some(entry.value.clone()),
            Some(_) => {}
        }

        entries.pop(key);
        trace!(cache = %self.name, key, "Cache entry expired");
        None
    }

    /// Insert or replace an entry, evicting the least recently used one when full.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        // Expired entries go first so a live one is not evicted in their place
        if !entries.contains(&key) && entries.len() >= entries.cap().get() {
            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(k, _)| k.clone())
                .collect();
            for k in &expired {
                entries.pop(k);
            }
        }

        let entry = CacheEntry {
            value,
            expires_at: now + self.ttl,
        };
        if let Some((evicted, _)) = entries.push(key.clone(), entry)
            && evicted != key
        {
            trace!(cache = %self.name, key = %evicted, "Evicted least recently used entry");
        }
    }

    /// Read-through lookup: on a miss, compute the value, store it on success,
    /// and return it. Errors are not cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = compute().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Number of stored entries, including ones that expired but were not yet read.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn hit_before_expiry_miss_after() {
        let cache = TtlCache::new("test", 4, Duration::from_secs(600));
        cache.insert("k", 1u32);

        tokio::time::advance(Duration::from_secs(599)).await;
        assert_eq!(cache.get("k"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_least_recently_used_at_capacity() {
        let cache = TtlCache::new("test", 2, Duration::from_secs(60));
        cache.insert("a", 1u32);
        cache.insert("b", 2u32);
        // Touch "a" so "b" becomes the eviction candidate
        assert_eq!(cache.get("a"), Some(1));

        cache.insert("c", 3u32);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_dropped_before_eviction() {
        let cache = TtlCache::new("test", 2, Duration::from_secs(10));
        cache.insert("old", 1u32);
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.insert("fresh", 2u32);
        tokio::time::advance(Duration::from_secs(6)).await;

        cache.insert("new", 3u32);
        assert_eq!(cache.get("fresh"), Some(2));
        assert_eq!(cache.get("new"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_a_key_does_not_evict() {
        let cache = TtlCache::new("test", 2, Duration::from_secs(60));
        cache.insert("a", 1u32);
        cache.insert("b", 2u32);
        cache.insert("a", 10u32);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn zero_capacity_still_holds_one_entry() {
        let cache = TtlCache::new("test", 0, Duration::from_secs(60));
        cache.insert("a", 1u32);
        cache.insert("b", 2u32);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("b"), Some(2));
    }

    #[tokio::test]
    async fn read_through_computes_once() {
        let cache = TtlCache::new("test", 4, Duration::from_secs(60));
        let mut calls = 0;

        let first: Result<String, ()> = cache
            .get_or_try_insert_with("q", || {
                calls += 1;
                async { Ok("value".to_string()) }
            })
            .await;
        assert_eq!(first.unwrap(), "value");

        let second: Result<String, ()> = cache
            .get_or_try_insert_with("q", || async { Err(()) })
            .await;
        assert_eq!(second.unwrap(), "value");
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn read_through_does_not_cache_errors() {
        let cache: TtlCache<u32> = TtlCache::new("test", 4, Duration::from_secs(60));
        let failed: Result<u32, &str> = cache.get_or_try_insert_with("k", || async { Err("boom") }).await;
        assert!(failed.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn from_policy_uses_capacity_and_ttl() {
        let cache: TtlCache<u8> = TtlCache::from_policy("crawl", &CachePolicy { capacity: 3, ttl_secs: 5 });
        assert_eq!(cache.name(), "crawl");
        assert_eq!(cache.entries.lock().unwrap().cap().get(), 3);
        assert_eq!(cache.ttl, Duration::from_secs(5));
    }
}
