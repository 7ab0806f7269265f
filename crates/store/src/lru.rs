//! Bounded-size LRU eviction over another store.

use crate::error::StoreResult;
use crate::traits::BlobStore;
use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Eviction bound, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LruBound {
    /// At most this many blobs.
    Count(usize),
    /// At most this many total bytes.
    Bytes(u64),
}

struct LruState {
    /// Recency tracker: hash -> size. Insertion and `get` both move the
    /// entry to most-recently-used.
    entries: LruCache<String, u64>,
    total_bytes: u64,
}

/// Wraps any store with LRU eviction.
///
/// Successful `get`/`has` touch recency; `put` inserts then evicts
/// least-recently-used entries (calling the inner `delete` for each) until
/// the bound holds. Eviction failures are logged and do not roll back the
/// insert that triggered them.
pub struct LruStore {
    inner: Arc<dyn BlobStore>,
    bound: LruBound,
    state: Mutex<LruState>,
}

impl LruStore {
    /// Create an LRU wrapper over `inner` with the given bound.
    pub fn new(inner: Arc<dyn BlobStore>, bound: LruBound) -> Self {
        Self {
            inner,
            bound,
            state: Mutex::new(LruState {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
        }
    }

    fn over_bound(&self, state: &LruState) -> bool {
        match self.bound {
            LruBound::Count(max) => state.entries.len() > max,
            LruBound::Bytes(max) => state.total_bytes > max,
        }
    }

    /// Track a blob and evict until the bound holds. Caller holds the lock.
    async fn track_and_evict(&self, state: &mut LruState, hash: &str, size: u64) {
        if let Some(old) = state.entries.put(hash.to_string(), size) {
            state.total_bytes = state.total_bytes.saturating_sub(old);
        }
        state.total_bytes += size;

        while self.over_bound(state) {
            let Some((victim, victim_size)) = state.entries.pop_lru() else {
                break;
            };
            state.total_bytes = state.total_bytes.saturating_sub(victim_size);
            if let Err(e) = self.inner.delete(&victim).await {
                tracing::warn!(hash = %victim, error = %e, "lru eviction failed");
            }
        }
    }
}

#[async_trait]
impl BlobStore for LruStore {
    fn name(&self) -> &'static str {
        "lru"
    }

    async fn has(&self, hash: &str) -> StoreResult<bool> {
        let has = self.inner.has(hash).await?;
        if has {
            self.state.lock().await.entries.get(hash);
        }
        Ok(has)
    }

    async fn get(&self, hash: &str) -> StoreResult<Bytes> {
        let blob = self.inner.get(hash).await?;
        let mut state = self.state.lock().await;
        if state.entries.get(hash).is_none() {
            // Blob pre-existed in the inner store (e.g. a populated disk
            // cache); bring it under the bound.
            let size = blob.len() as u64;
            self.track_and_evict(&mut state, hash, size).await;
        }
        Ok(blob)
    }

    async fn put(&self, hash: &str, blob: Bytes) -> StoreResult<()> {
        let size = blob.len() as u64;
        self.inner.put(hash, blob).await?;
        let mut state = self.state.lock().await;
        self.track_and_evict(&mut state, hash, size).await;
        Ok(())
    }

    async fn put_sd(&self, hash: &str, blob: Bytes) -> StoreResult<()> {
        let size = blob.len() as u64;
        self.inner.put_sd(hash, blob).await?;
        let mut state = self.state.lock().await;
        self.track_and_evict(&mut state, hash, size).await;
        Ok(())
    }

    async fn delete(&self, hash: &str) -> StoreResult<()> {
        self.inner.delete(hash).await?;
        let mut state = self.state.lock().await;
        if let Some(size) = state.entries.pop(hash) {
            state.total_bytes = state.total_bytes.saturating_sub(size);
        }
        Ok(())
    }
}

impl std::fmt::Debug for LruStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruStore")
            .field("inner", &self.inner.name())
            .field("bound", &self.bound)
            .finish()
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

    #[tokio::test]
    async fn test_count_bound_evicts_lru() {
        let inner = Arc::new(MemoryStore::new());
        let store = LruStore::new(inner.clone(), LruBound::Count(2));

        let (a, da) = named(b"blob a");
        let (b, db) = named(b"blob b");
        let (c, dc) = named(b"blob c");

        store.put(&a, da.clone()).await.unwrap();
        store.put(&b, db).await.unwrap();
        // Touch `a` so `b` becomes least recently used.
        assert_eq!(store.get(&a).await.unwrap(), da);
        store.put(&c, dc.clone()).await.unwrap();

        assert!(store.get(&b).await.unwrap_err().is_not_found());
        assert_eq!(store.get(&a).await.unwrap(), da);
        assert_eq!(store.get(&c).await.unwrap(), dc);
    }

    #[tokio::test]
    async fn test_byte_bound_holds() {
        let inner = Arc::new(MemoryStore::new());
        // Each payload below is 8 bytes; bound fits two of them.
        let store = LruStore::new(inner.clone(), LruBound::Bytes(16));

        let (a, da) = named(b"payloadA");
        let (b, db) = named(b"payloadB");
        let (c, dc) = named(b"payloadC");

        store.put(&a, da).await.unwrap();
        store.put(&b, db).await.unwrap();
        store.put(&c, dc).await.unwrap();

        let state = store.state.lock().await;
        assert!(state.total_bytes <= 16);
        assert_eq!(state.entries.len(), 2);
        drop(state);

        assert!(!inner.has(&a).await.unwrap());
        assert!(inner.has(&b).await.unwrap());
        assert!(inner.has(&c).await.unwrap());
    }

    #[tokio::test]
    async fn test_has_touches_recency() {
        let inner = Arc::new(MemoryStore::new());
        let store = LruStore::new(inner, LruBound::Count(2));

        let (a, da) = named(b"first");
        let (b, db) = named(b"second");
        let (c, dc) = named(b"third");

        store.put(&a, da).await.unwrap();
        store.put(&b, db).await.unwrap();
        assert!(store.has(&a).await.unwrap());
        store.put(&c, dc).await.unwrap();

        assert!(store.has(&a).await.unwrap());
        assert!(!store.has(&b).await.unwrap());
        assert!(store.has(&c).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_untracks() {
        let inner = Arc::new(MemoryStore::new());
        let store = LruStore::new(inner, LruBound::Bytes(1024));

        let (a, da) = named(b"tracked");
        store.put(&a, da).await.unwrap();
        store.delete(&a).await.unwrap();

        let state = store.state.lock().await;
        assert_eq!(state.total_bytes, 0);
        assert_eq!(state.entries.len(), 0);
    }

    #[tokio::test]
    async fn test_get_adopts_preexisting_blob() {
        let inner = Arc::new(MemoryStore::new());
        let (a, da) = named(b"preexisting");
        inner.put(&a, da.clone()).await.unwrap();

        let store = LruStore::new(inner, LruBound::Bytes(1024));
        assert_eq!(store.get(&a).await.unwrap(), da);

        let state = store.state.lock().await;
        assert_eq!(state.total_bytes, da.len() as u64);
    }
}
