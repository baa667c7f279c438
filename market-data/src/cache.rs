//! Time-bounded cache with single-flight fetches.
//!
//! Every external lookup in the pipeline goes through here. A fresh entry is
//! returned without touching the network; an expired or missing entry triggers
//! one fetch while concurrent callers for the same key wait on a per-key lock
//! and pick up the stored result. Distinct keys never contend.
//!
//! Fetch failures (including timeouts) fall back to the last known value when
//! one exists, however stale. Only a failure with no prior value surfaces as
//! `FetchFailed`.

use chrono::{DateTime, Utc};
use common::EngineError;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One cached value. Owned exclusively by the cache.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    fetched_at: DateTime<Utc>,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = (now - self.fetched_at).to_std().unwrap_or(Duration::MAX);
        age < self.ttl
    }
}

/// Hit/miss counters, mostly for tests and the demo binary
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_fallbacks: u64,
}

/// TTL cache keyed by string, generic over the cached value.
///
/// TTL is supplied per call: the same cache instance serves short-lived price
/// data and long-lived qualitative assessments side by side.
pub struct DataCache<V: Clone + Send + Sync + 'static> {
    entries: DashMap<String, CacheEntry<V>>,
    key_locks: DashMap<String, Arc<Mutex<()>>>,
    fetch_timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_fallbacks: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> DataCache<V> {
    pub fn new(fetch_timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            key_locks: DashMap::new(),
            fetch_timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_fallbacks: AtomicU64::new(0),
        }
    }

    /// Look up `key`, fetching through `fetcher` only when the entry is
    /// missing or older than `ttl`.
    pub async fn get<F, Fut>(&self, key: &str, ttl: Duration, fetcher: F) -> Result<V, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let now = Utc::now();
        if let Some(value) = self.fresh_value(key, now) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key, "cache hit");
            return Ok(value);
        }

        // Single-flight: serialize fetches for this key only.
        let lock = {
            let entry = self
                .key_locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            entry.value().clone()
        };
        let result = {
            let _guard = lock.lock().await;

            // A concurrent caller may have fetched while we waited.
            let now = Utc::now();
            if let Some(value) = self.fresh_value(key, now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache hit after waiting on in-flight fetch");
                Ok(value)
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let outcome = match tokio::time::timeout(self.fetch_timeout, fetcher()).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(format!("{e:#}")),
                    Err(_) => Err(format!("timed out after {:?}", self.fetch_timeout)),
                };

                match outcome {
                    Ok(value) => {
                        self.entries.insert(
                            key.to_string(),
                            CacheEntry {
                                value: value.clone(),
                                fetched_at: Utc::now(),
                                ttl,
                            },
                        );
                        Ok(value)
                    }
                    Err(reason) => {
                        if let Some(stale) = self.any_value(key) {
                            self.stale_fallbacks.fetch_add(1, Ordering::Relaxed);
                            warn!(key, %reason, "fetch failed, serving stale value");
                            Ok(stale)
                        } else {
                            warn!(key, %reason, "fetch failed with no cached value");
                            Err(EngineError::fetch_failed(key, reason))
                        }
                    }
                }
            }
        };

        // Waiters hold their own clone of the lock; once only this caller and
        // the map itself do, the entry is garbage and can go.
        self.key_locks
            .remove_if(key, |_, entry| Arc::strong_count(entry) <= 2);
        result
    }

    /// Drop a key so the next `get` re-fetches
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_fallbacks: self.stale_fallbacks.load(Ordering::Relaxed),
        }
    }

    fn fresh_value(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        self.entries
            .get(key)
            .filter(|e| e.is_fresh(now))
            .map(|e| e.value.clone())
    }

    fn any_value(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|e| e.value.clone())
    }
}
