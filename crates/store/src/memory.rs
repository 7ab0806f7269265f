//! In-process memory store.

use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;

/// A blob store backed by an in-process map. Unbounded on its own; bounds
/// are imposed by a wrapping LRU.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently held.
    pub fn len(&self) -> usize {
        self.blobs.lock().expect("memory store lock poisoned").len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn has(&self, hash: &str) -> StoreResult<bool> {
        let blobs = self.blobs.lock().expect("memory store lock poisoned");
        Ok(blobs.contains_key(hash))
    }

    async fn get(&self, hash: &str) -> StoreResult<Bytes> {
        let blobs = self.blobs.lock().expect("memory store lock poisoned");
        blobs.get(hash).cloned().ok_or(StoreError::NotFound)
    }

    async fn put(&self, hash: &str, blob: Bytes) -> StoreResult<()> {
        depot_core::verify_named(hash, &blob)?;
        let mut blobs = self.blobs.lock().expect("memory store lock poisoned");
        blobs.insert(hash.to_string(), blob);
        Ok(())
    }

    async fn put_sd(&self, hash: &str, blob: Bytes) -> StoreResult<()> {
        // The memory store does not track the sd tag; that lives in the index.
        self.put(hash, blob).await
    }

    async fn delete(&self, hash: &str) -> StoreResult<()> {
        let mut blobs = self.blobs.lock().expect("memory store lock poisoned");
        blobs.remove(hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::BlobHash;

    fn named(data: &[u8]) -> (String, Bytes) {
        (
            BlobHash::compute(data).to_hex(),
            Bytes::copy_from_slice(data),
        )
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryStore::new();
        let (hash, data) = named(b"hello world");

        store.put(&hash, data.clone()).await.unwrap();
        assert!(store.has(&hash).await.unwrap());
        assert_eq!(store.get(&hash).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let (hash, _) = named(b"absent");
        let err = store.get(&hash).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.has(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_rejects_wrong_hash() {
        let store = MemoryStore::new();
        let wrong = BlobHash::compute(b"other").to_hex();
        let err = store.put(&wrong, Bytes::from_static(b"data")).await.unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
        assert!(!store.has(&wrong).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = MemoryStore::new();
        let (hash, data) = named(b"repeat");

        store.put(&hash, data.clone()).await.unwrap();
        store.put(&hash, data.clone()).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&hash).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_delete_absent_is_success() {
        let store = MemoryStore::new();
        let (hash, data) = named(b"gone");

        store.delete(&hash).await.unwrap();
        store.put(&hash, data).await.unwrap();
        store.delete(&hash).await.unwrap();
        assert!(!store.has(&hash).await.unwrap());
    }
}
