//! No-op cache implementation.

use async_trait::async_trait;
use screener_core::{CacheEntry, CacheKey, CacheStats, RecordCache, Result};
use tracing::trace;

/// A no-op cache that doesn't store anything.
///
/// `get` always returns `Ok(None)` and `set` reports that nothing was stored.
/// Useful for disabling caching so every fetch goes to the provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl NoopCache {
    /// Create a new no-op cache.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RecordCache for NoopCache {
    async fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>> {
        trace!("NoopCache: get called, returning None");
        Ok(None)
    }

    async fn set(&self, _entry: &CacheEntry) -> Result<bool> {
        trace!("NoopCache: set called, doing nothing");
        Ok(false)
    }

    async fn delete(&self, _key: &CacheKey) -> Result<bool> {
        Ok(false)
    }

    async fn list_keys(&self) -> Result<Vec<CacheKey>> {
        Ok(Vec::new())
    }

    async fn sweep_expired(&self) -> Result<usize> {
        Ok(0)
    }

    async fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats::default())
    }

    async fn clear(&self) -> Result<usize> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screener_core::CacheCategory;

    #[tokio::test]
    async fn test_noop_cache_stores_nothing() {
        let cache = NoopCache::new();
        let entry = CacheEntry::new(CacheKey::new("A").unwrap(), CacheCategory::Periodic);

        assert!(!cache.set(&entry).await.unwrap());
        assert!(cache.get(&entry.key).await.unwrap().is_none());
        assert!(cache.list_keys().await.unwrap().is_empty());
    }
}
