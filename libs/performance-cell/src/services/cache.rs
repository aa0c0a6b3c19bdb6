use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::models::{CacheStats, InvalidationReport};
use crate::services::backend::CacheBackend;

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidated_keys: AtomicU64,
    invalidation_failures: AtomicU64,
}

/// Typed JSON cache over a [`CacheBackend`]. Every method is best effort:
/// backend failures degrade to a miss or a skipped write and are logged,
/// never returned, so a cache outage cannot fail the caller's operation.
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    counters: Counters,
}

impl CacheService {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            counters: Counters::default(),
        }
    }

    pub fn backend(&self) -> Arc<dyn CacheBackend> {
        Arc::clone(&self.backend)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("Cache hit: {}", key);
                    Some(value)
                }
                Err(e) => {
                    warn!("Discarding undecodable cache entry {}: {}", key, e);
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    let _ = self.backend.delete(&[key.to_string()]).await;
                    None
                }
            },
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss: {}", key);
                None
            }
            Err(e) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cannot serialize cache entry {}: {}", key, e);
                return;
            }
        };

        match self.backend.set(key, &raw, Some(ttl)).await {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!("Cache write failed for {}: {}", key, e),
        }
    }

    /// Read-through helper for projections: on a miss the loader recomputes
    /// from storage and the result is cached for `ttl`.
    pub async fn get_or_load<T, E, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get_json::<T>(key).await {
            return Ok(cached);
        }

        let fresh = loader().await?;
        self.put_json(key, &fresh, ttl).await;
        Ok(fresh)
    }

    pub async fn invalidate(&self, keys: &[String]) -> InvalidationReport {
        if keys.is_empty() {
            return InvalidationReport::default();
        }

        match self.backend.delete(keys).await {
            Ok(deleted) => {
                self.counters.invalidated_keys.fetch_add(deleted, Ordering::Relaxed);
                debug!("Invalidated {} of {} cache keys", deleted, keys.len());
                InvalidationReport { keys_deleted: deleted, failures: 0 }
            }
            Err(e) => {
                self.counters.invalidation_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Cache invalidation failed for {:?}: {} (entries expire via TTL)", keys, e);
                InvalidationReport { keys_deleted: 0, failures: 1 }
            }
        }
    }

    pub async fn invalidate_pattern(&self, pattern: &str) -> InvalidationReport {
        match self.backend.delete_pattern(pattern).await {
            Ok(deleted) => {
                self.counters.invalidated_keys.fetch_add(deleted, Ordering::Relaxed);
                debug!("Invalidated {} cache keys matching {}", deleted, pattern);
                InvalidationReport { keys_deleted: deleted, failures: 0 }
            }
            Err(e) => {
                self.counters.invalidation_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Pattern invalidation failed for {}: {} (entries expire via TTL)", pattern, e);
                InvalidationReport { keys_deleted: 0, failures: 1 }
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            invalidated_keys: self.counters.invalidated_keys.load(Ordering::Relaxed),
            invalidation_failures: self.counters.invalidation_failures.load(Ordering::Relaxed),
        }
    }
}
