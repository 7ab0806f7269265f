//! Caching composition of an origin and a cache store.

use crate::error::StoreResult;
use crate::singleflight::SingleFlightStore;
use crate::traits::BlobStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;

/// Combines two stores, typically a durable or remote origin and a fast
/// local cache. Accessed blobs are retrieved from the cache when possible;
/// on a miss they are fetched from the origin and cached. Puts go to the
/// origin first and are then cached.
///
/// The origin is always single-flight-wrapped at construction; the cache is
/// expected to be local and cheap and is not.
pub struct CachingStore {
    component: String,
    origin: Arc<dyn BlobStore>,
    cache: Arc<dyn BlobStore>,
}

impl CachingStore {
    /// Create a caching store. `component` labels this composition in
    /// cache metrics.
    pub fn new(component: &str, origin: Arc<dyn BlobStore>, cache: Arc<dyn BlobStore>) -> Self {
        Self {
            component: component.to_string(),
            origin: Arc::new(SingleFlightStore::new(origin)),
            cache,
        }
    }

    fn record_speed(&self, source: &str, len: usize, start: Instant) {
        let secs = start.elapsed().as_secs_f64();
        if secs > 0.0 {
            let rate = len as f64 / 1024.0 / 1024.0 / secs;
            depot_metrics::record_retrieval_speed(
                self.cache.name(),
                &self.component,
                source,
                rate,
            );
        }
    }
}

#[async_trait]
impl BlobStore for CachingStore {
    fn name(&self) -> &'static str {
        "caching"
    }

    /// Checks the cache and then the origin. True if either store has it.
    async fn has(&self, hash: &str) -> StoreResult<bool> {
        let has = self.cache.has(hash).await?;
        if has {
            return Ok(true);
        }
        self.origin.has(hash).await
    }

    /// Tries the cache first, falling back to the origin. A blob served
    /// from the origin is stored in the cache before returning.
    async fn get(&self, hash: &str) -> StoreResult<Bytes> {
        let start = Instant::now();
        match self.cache.get(hash).await {
            Ok(blob) => {
                depot_metrics::record_cache_hit(self.cache.name(), &self.component);
                self.record_speed("cache", blob.len(), start);
                Ok(blob)
            }
            Err(e) if e.is_not_found() => {
                depot_metrics::record_cache_miss(self.cache.name(), &self.component);
                let start = Instant::now();
                let blob = self.origin.get(hash).await?;
                self.record_speed("origin", blob.len(), start);
                self.cache.put(hash, blob.clone()).await?;
                Ok(blob)
            }
            // Cache unavailability is surfaced rather than papered over with
            // a stale read.
            Err(e) => Err(e),
        }
    }

    /// Stores the blob in the origin and then the cache.
    async fn put(&self, hash: &str, blob: Bytes) -> StoreResult<()> {
        self.origin.put(hash, blob.clone()).await?;
        self.cache.put(hash, blob).await
    }

    /// Stores the sd blob in the origin and then the cache.
    async fn put_sd(&self, hash: &str, blob: Bytes) -> StoreResult<()> {
        self.origin.put_sd(hash, blob.clone()).await?;
        self.cache.put_sd(hash, blob).await
    }

    /// Deletes from both tiers. Both attempts are made even if the first
    /// fails; a successful delete implies absence in both.
    async fn delete(&self, hash: &str) -> StoreResult<()> {
        let origin_result = self.origin.delete(hash).await;
        let cache_result = self.cache.delete(hash).await;
        origin_result?;
        cache_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use depot_core::BlobHash;

    fn named(data: &[u8]) -> (String, Bytes) {
        (
            BlobHash::compute(data).to_hex(),
            Bytes::copy_from_slice(data),
        )
    }

    fn caching() -> (Arc<MemoryStore>, Arc<MemoryStore>, CachingStore) {
        let origin = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryStore::new());
        let store = CachingStore::new("test", origin.clone(), cache.clone());
        (origin, cache, store)
    }

    #[tokio::test]
    async fn test_get_populates_cache() {
        let (origin, cache, store) = caching();
        let (hash, data) = named(b"origin only");
        origin.put(&hash, data.clone()).await.unwrap();

        assert!(!cache.has(&hash).await.unwrap());
        assert_eq!(store.get(&hash).await.unwrap(), data);
        assert!(cache.has(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_served_from_cache_when_origin_lacks_it() {
        let (origin, cache, store) = caching();
        let (hash, data) = named(b"cache only");
        cache.put(&hash, data.clone()).await.unwrap();

        assert!(!origin.has(&hash).await.unwrap());
        assert_eq!(store.get(&hash).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_get_missing_everywhere() {
        let (_origin, _cache, store) = caching();
        let (hash, _) = named(b"nowhere");
        assert!(store.get(&hash).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_put_writes_both_tiers() {
        let (origin, cache, store) = caching();
        let (hash, data) = named(b"both");

        store.put(&hash, data).await.unwrap();
        assert!(origin.has(&hash).await.unwrap());
        assert!(cache.has(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_has_consults_both() {
        let (origin, cache, store) = caching();
        let (in_origin, d1) = named(b"in origin");
        let (in_cache, d2) = named(b"in cache");
        let (nowhere, _) = named(b"nowhere");

        origin.put(&in_origin, d1).await.unwrap();
        cache.put(&in_cache, d2).await.unwrap();

        assert!(store.has(&in_origin).await.unwrap());
        assert!(store.has(&in_cache).await.unwrap());
        assert!(!store.has(&nowhere).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_clears_both_tiers() {
        let (origin, cache, store) = caching();
        let (hash, data) = named(b"doomed");

        store.put(&hash, data).await.unwrap();
        store.delete(&hash).await.unwrap();
        assert!(!origin.has(&hash).await.unwrap());
        assert!(!cache.has(&hash).await.unwrap());
    }
}
