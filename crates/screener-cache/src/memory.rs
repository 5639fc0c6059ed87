//! In-memory cache implementation.

use async_trait::async_trait;
use chrono::Utc;
use screener_core::{
    CacheCategory, CacheEntry, CacheKey, CacheStats, RecordCache, Result, TtlPolicy,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Simple in-memory cache for testing and development.
///
/// Entries are stored in a `RwLock`-protected `HashMap` and are lost when the
/// cache is dropped. Expiry follows the same read-time rules as
/// [`FileCache`](crate::FileCache).
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: TtlPolicy,
}

impl InMemoryCache {
    /// Create a new empty in-memory cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the expiry policy.
    #[must_use]
    pub fn with_ttl(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    /// Removes `key` only if the entry stored under it is still expired.
    ///
    /// A writer may replace the entry between the expired read and the write
    /// lock; the replacement must survive.
    async fn evict_if_expired(&self, key: &CacheKey) -> bool {
        let mut cache = self.entries.write().await;
        let still_expired = cache
            .get(key)
            .is_some_and(|entry| self.ttl.is_expired(entry, Utc::now()));
        still_expired && cache.remove(key).is_some()
    }
}

#[async_trait]
impl RecordCache for InMemoryCache {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let expired = {
            let cache = self.entries.read().await;
            match cache.get(key) {
                None => {
                    debug!("Cache miss");
                    return Ok(None);
                }
                Some(entry) if !self.ttl.is_expired(entry, Utc::now()) => {
                    debug!("Cache hit");
                    return Ok(Some(entry.clone()));
                }
                Some(_) => true,
            }
        };

        if expired && self.evict_if_expired(key).await {
            debug!("Evicted expired entry");
        }
        Ok(None)
    }

    #[instrument(skip(self, entry), fields(key = %entry.key))]
    async fn set(&self, entry: &CacheEntry) -> Result<bool> {
        if entry.category == CacheCategory::Volatile {
            return Ok(false);
        }
        self.entries
            .write()
            .await
            .insert(entry.key.clone(), entry.clone());
        debug!(periods = entry.payload.len(), "Cached entry");
        Ok(true)
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn list_keys(&self) -> Result<Vec<CacheKey>> {
        let mut keys: Vec<_> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    #[instrument(skip(self))]
    async fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut cache = self.entries.write().await;
        let before = cache.len();
        cache.retain(|_, entry| !self.ttl.is_expired(entry, now));
        let removed = before - cache.len();
        if removed > 0 {
            debug!("Invalidated {} stale cache entries", removed);
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats> {
        let now = Utc::now();
        let cache = self.entries.read().await;
        let mut stats = CacheStats {
            total: cache.len(),
            ..CacheStats::default()
        };
        for entry in cache.values() {
            if self.ttl.is_expired(entry, now) {
                stats.expired += 1;
            } else {
                stats.valid += 1;
                *stats.by_category.entry(entry.category).or_default() += 1;
            }
        }
        Ok(stats)
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<usize> {
        let mut cache = self.entries.write().await;
        let removed = cache.len();
        cache.clear();
        debug!("Cleared all cache entries");
        Ok(removed)
    }
}
