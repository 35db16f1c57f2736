//! Hot cache layer using [`moka`].
//!
//! Stores values directly (no serialisation) in an async, TTL-bounded cache
//! and keeps hit/miss counters so the CLI can report effectiveness.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use crate::error::StoreResult;

// ── cache stats ──────────────────────────────────────────────────────

/// Counters tracking cache effectiveness.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate in `[0, 1]`; 0 when nothing was looked up yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.hit_rate() * 100.0
        )
    }
}

// ── cache layer ──────────────────────────────────────────────────────

/// Async read-through cache keyed by string.
pub struct CacheLayer<V> {
    name: &'static str,
    inner: Cache<String, V>,
    stats: Arc<CacheStats>,
}

impl<V> Clone for CacheLayer<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: self.inner.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<V> CacheLayer<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Build a cache holding at most `max_capacity` entries for `ttl`.
    pub fn new(name: &'static str, max_capacity: u64, ttl: Duration) -> Self {
        debug!(cache = name, max_capacity, ttl_secs = ttl.as_secs(), "cache layer created");
        Self {
            name,
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let value = self.inner.get(key).await;
        if value.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        debug!(cache = self.name, key, hit = value.is_some(), "cache lookup");
        value
    }

    pub async fn insert(&self, key: &str, value: V) {
        self.inner.insert(key.to_string(), value).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
        debug!(cache = self.name, key, "cache invalidate");
    }

    /// Return the cached value or load, cache and return it.  Loader errors
    /// are propagated and nothing is cached.
    pub async fn get_or_try_load<F, Fut>(&self, key: &str, loader: F) -> StoreResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<V>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = loader().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn make_cache() -> CacheLayer<String> {
        CacheLayer::new("test", 100, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn insert_get_invalidate() {
        let cache = make_cache();
        cache.insert("k", "v".to_string()).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        cache.invalidate("k").await;
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[tokio::test]
    async fn loader_runs_once() {
        let cache = make_cache();
        let first = cache
            .get_or_try_load("k", || async { Ok("loaded".to_string()) })
            .await
            .unwrap();
        let second = cache
            .get_or_try_load("k", || async { Ok("ignored".to_string()) })
            .await
            .unwrap();
        assert_eq!(first, "loaded");
        assert_eq!(second, "loaded");
    }

    #[tokio::test]
    async fn loader_error_is_not_cached() {
        let cache = make_cache();
        let err = cache
            .get_or_try_load("k", || async {
                Err(StoreError::InvalidArgument("boom".into()))
            })
            .await;
        assert!(err.is_err());
        assert!(cache.get("k").await.is_none());
    }

    #[test]
    fn stats_display() {
        let stats = CacheStats::default();
        stats.hits.store(3, Ordering::Relaxed);
        stats.misses.store(1, Ordering::Relaxed);
        let shown = stats.to_string();
        assert!(shown.contains("hits=3"));
        assert!(shown.contains("75.00%"));
    }
}
