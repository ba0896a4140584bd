//! Digest cache
//!
//! Remembers the last remote digest seen for each image so overlapping
//! polls (the global sweep and a workload's own schedule checking the same
//! image) do not each cost a registry round-trip.
//!
//! ## Expiry
//!
//! A record older than the TTL is treated as absent. Expired records are
//! dropped lazily when they are looked up, or in bulk by `purge_expired`.
//!
//! ## Eviction
//!
//! Records live in an `IndexMap` kept in recency order: lookups and writes
//! move a record to the back, so the front is always the least recently
//! used record and is the one evicted when the cache is full.
//!
//! A single mutex guards everything. Lookups cost nanoseconds next to the
//! registry calls they save.

use chrono::{DateTime, Utc};
use drydock_core::Clock;
use drydock_core::domain::cache::CacheStats;
use drydock_core::domain::image::{ImageReference, RegistryCredentials};
use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Identity used for anonymous lookups
const ANONYMOUS: &str = "anonymous";

/// Cache and coalescing key: an image plus who is asking for it
///
/// Private registries may serve different manifests to different users, so
/// the credential identity is part of the key. Passwords never are.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub image: String,
    pub identity: String,
}

impl CacheKey {
    pub fn new(image: &ImageReference, credentials: Option<&RegistryCredentials>) -> Self {
        let identity = credentials
            .map(|c| format!("{}@{}", c.username, image.registry))
            .unwrap_or_else(|| ANONYMOUS.to_string());

        Self {
            image: image.to_string(),
            identity,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.image, self.identity)
    }
}

#[derive(Debug, Clone)]
struct CacheRecord {
    digest: String,
    fetched_at: DateTime<Utc>,
}

#[derive(Default)]
struct CacheInner {
    records: IndexMap<CacheKey, CacheRecord>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Bounded, TTL-aware LRU cache of remote digests
pub struct DigestCache {
    inner: Mutex<CacheInner>,
    ttl: chrono::Duration,
    max_size: usize,
    clock: Arc<dyn Clock>,
}

impl DigestCache {
    /// Creates a cache holding at most `max_size` records for `ttl` each
    pub fn new(ttl: Duration, max_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            max_size: max_size.max(1),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, record: &CacheRecord, now: DateTime<Utc>) -> bool {
        now - record.fetched_at > self.ttl
    }

    /// Returns the cached digest for `key` if present and fresh
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let now = self.clock.now();
        let mut inner = self.lock();

        let Some(idx) = inner.records.get_index_of(key) else {
            inner.misses += 1;
            return None;
        };

        let (expired, digest) = match inner.records.get_index(idx) {
            Some((_, record)) => (self.is_expired(record, now), record.digest.clone()),
            None => (true, String::new()),
        };

        if expired {
            inner.records.shift_remove_index(idx);
            inner.misses += 1;
            debug!(key = %key, "Digest cache record expired");
            return None;
        }

        let last = inner.records.len() - 1;
        inner.records.move_index(idx, last);
        inner.hits += 1;
        Some(digest)
    }

    /// Stores `digest` for `key`, evicting the least recently used record if full
    pub fn put(&self, key: CacheKey, digest: impl Into<String>) {
        let record = CacheRecord {
            digest: digest.into(),
            fetched_at: self.clock.now(),
        };
        let mut inner = self.lock();

        if let Some(idx) = inner.records.get_index_of(&key) {
            if let Some((_, existing)) = inner.records.get_index_mut(idx) {
                *existing = record;
            }
            let last = inner.records.len() - 1;
            inner.records.move_index(idx, last);
            return;
        }

        while inner.records.len() >= self.max_size {
            if let Some((evicted, _)) = inner.records.shift_remove_index(0) {
                inner.evictions += 1;
                debug!(key = %evicted, "Evicted least recently used digest");
            } else {
                break;
            }
        }

        inner.records.insert(key, record);
    }

    /// Drops the record for `key`, if any
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.lock().records.shift_remove(key).is_some()
    }

    /// Drops every expired record, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let before = inner.records.len();
        inner
            .records
            .retain(|_, record| now - record.fetched_at <= self.ttl);
        before - inner.records.len()
    }

    /// Drops every record; counters are kept
    pub fn clear(&self) {
        self.lock().records.clear();
    }

    pub fn size(&self) -> usize {
        self.lock().records.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            size: inner.records.len(),
            max_size: self.max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drydock_core::FakeClock;

    const TTL: Duration = Duration::from_secs(300);

    fn key(name: &str) -> CacheKey {
        CacheKey {
            image: format!("docker.io/library/{}:latest", name),
            identity: ANONYMOUS.to_string(),
        }
    }

    fn cache(max_size: usize) -> (DigestCache, FakeClock) {
        let clock = FakeClock::new();
        (DigestCache::new(TTL, max_size, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_put_then_get_hits() {
        let (cache, _) = cache(10);
        cache.put(key("nginx"), "sha256:1");

        assert_eq!(cache.get(&key("nginx")).as_deref(), Some("sha256:1"));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_absent_key_is_a_miss() {
        let (cache, _) = cache(10);
        assert!(cache.get(&key("redis")).is_none());
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hit_rate(), 0.0);
    }

    #[test]
    fn test_expired_record_is_a_miss_and_dropped() {
        let (cache, clock) = cache(10);
        cache.put(key("nginx"), "sha256:1");

        clock.advance(TTL + Duration::from_secs(1));

        assert!(cache.get(&key("nginx")).is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn test_record_at_exact_ttl_is_still_fresh() {
        let (cache, clock) = cache(10);
        cache.put(key("nginx"), "sha256:1");
        clock.advance(TTL);
        assert!(cache.get(&key("nginx")).is_some());
    }

    #[test]
    fn test_overflow_evicts_exactly_one() {
        let (cache, _) = cache(3);
        for name in ["a", "b", "c", "d"] {
            cache.put(key(name), format!("sha256:{}", name));
        }

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(cache.size(), 3);
        assert!(cache.get(&key("a")).is_none());
    }

    #[test]
    fn test_eviction_prefers_least_recently_used() {
        let (cache, _) = cache(3);
        cache.put(key("a"), "1");
        cache.put(key("b"), "2");
        cache.put(key("c"), "3");

        // Touch "a" so "b" becomes the oldest
        assert!(cache.get(&key("a")).is_some());
        cache.put(key("d"), "4");

        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("c")).is_some());
        assert!(cache.get(&key("d")).is_some());
    }

    #[test]
    fn test_refresh_does_not_evict() {
        let (cache, clock) = cache(2);
        cache.put(key("a"), "1");
        cache.put(key("b"), "2");

        clock.advance(TTL);
        cache.put(key("a"), "1b");
        clock.advance(Duration::from_secs(10));

        assert_eq!(cache.get(&key("a")).as_deref(), Some("1b"));
        assert!(cache.get(&key("b")).is_none());
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_purge_and_invalidate() {
        let (cache, clock) = cache(10);
        cache.put(key("a"), "1");
        clock.advance(TTL + Duration::from_secs(1));
        cache.put(key("b"), "2");

        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.invalidate(&key("b")));
        assert!(!cache.invalidate(&key("b")));
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_key_identity() {
        let image = ImageReference::parse("ghcr.io/org/app:1").unwrap();
        let anonymous = CacheKey::new(&image, None);
        let creds = RegistryCredentials::new("bot", "secret");
        let authed = CacheKey::new(&image, Some(&creds));

        assert_eq!(anonymous.identity, "anonymous");
        assert_eq!(authed.identity, "bot@ghcr.io");
        assert_ne!(anonymous, authed);
    }

    #[test]
    fn test_concurrent_access() {
        let (cache, _) = cache(64);
        let cache = Arc::new(cache);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let k = key(&format!("img{}", (t * 100 + i) % 80));
                        cache.put(k.clone(), "d");
                        let _ = cache.get(&k);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 800);
        assert!(stats.size <= 64);
    }
}
