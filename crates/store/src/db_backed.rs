//! Index-database-backed store: existence from the index, blocklist
//! enforcement, access tracking.

use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStore;
use async_trait::async_trait;
use bytes::Bytes;
use depot_index::BlobIndex;
use std::sync::Arc;
use time::OffsetDateTime;

/// Wraps an origin with the blob index. Existence checks consult the index
/// so they never hit the (possibly remote) origin; puts are rejected for
/// blocklisted hashes and recorded in the index on success.
pub struct DbBackedStore {
    origin: Arc<dyn BlobStore>,
    index: Arc<dyn BlobIndex>,
    track_access: bool,
}

impl DbBackedStore {
    /// Create a DB-backed store over `origin`.
    pub fn new(origin: Arc<dyn BlobStore>, index: Arc<dyn BlobIndex>, track_access: bool) -> Self {
        Self {
            origin,
            index,
            track_access,
        }
    }

    /// The index this store records into.
    pub fn index(&self) -> &Arc<dyn BlobIndex> {
        &self.index
    }
}

#[async_trait]
impl BlobStore for DbBackedStore {
    fn name(&self) -> &'static str {
        "db_backed"
    }

    /// Consults the index, not the origin, so cheap existence checks do not
    /// hit a remote object store.
    async fn has(&self, hash: &str) -> StoreResult<bool> {
        Ok(self.index.has_blob(hash).await?)
    }

    async fn get(&self, hash: &str) -> StoreResult<Bytes> {
        let blob = self.origin.get(hash).await?;
        if self.track_access {
            // Eventually consistent: a failed touch never fails the read.
            if let Err(e) = self.index.touch_blob(hash, OffsetDateTime::now_utc()).await {
                tracing::warn!(hash = %hash, error = %e, "failed to update last_accessed");
            }
        }
        Ok(blob)
    }

    async fn put(&self, hash: &str, blob: Bytes) -> StoreResult<()> {
        if self.index.is_blocked(hash).await? {
            return Err(StoreError::Blocked);
        }
        let size = blob.len() as u64;
        self.origin.put(hash, blob).await?;
        self.index.add_blob(hash, size, false).await?;
        Ok(())
    }

    async fn put_sd(&self, hash: &str, blob: Bytes) -> StoreResult<()> {
        if self.index.is_blocked(hash).await? {
            return Err(StoreError::Blocked);
        }
        let size = blob.len() as u64;
        self.origin.put_sd(hash, blob).await?;
        self.index.add_blob(hash, size, true).await?;
        Ok(())
    }

    async fn delete(&self, hash: &str) -> StoreResult<()> {
        self.origin.delete(hash).await?;
        self.index.delete_blob(hash).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use depot_core::BlobHash;
    use depot_index::SqliteIndex;

    fn named(data: &[u8]) -> (String, Bytes) {
        (
            BlobHash::compute(data).to_hex(),
            Bytes::copy_from_slice(data),
        )
    }

    async fn db_backed(track_access: bool) -> (tempfile::TempDir, Arc<dyn BlobIndex>, DbBackedStore)
    {
        let temp = tempfile::tempdir().unwrap();
        let index: Arc<dyn BlobIndex> = Arc::new(
            SqliteIndex::new(temp.path().join("index.db")).await.unwrap(),
        );
        let store = DbBackedStore::new(Arc::new(MemoryStore::new()), index.clone(), track_access);
        (temp, index, store)
    }

    #[tokio::test]
    async fn test_put_records_index_row() {
        let (_temp, index, store) = db_backed(false).await;
        let (hash, data) = named(b"indexed");

        assert!(!store.has(&hash).await.unwrap());
        store.put(&hash, data.clone()).await.unwrap();
        assert!(store.has(&hash).await.unwrap());

        let row = index.get_blob(&hash).await.unwrap().unwrap();
        assert_eq!(row.size_bytes, data.len() as i64);
        assert!(!row.is_sd);
    }

    #[tokio::test]
    async fn test_put_sd_records_tag() {
        let (_temp, index, store) = db_backed(false).await;
        let (hash, data) = named(b"descriptor");

        store.put_sd(&hash, data).await.unwrap();
        let row = index.get_blob(&hash).await.unwrap().unwrap();
        assert!(row.is_sd);
    }

    #[tokio::test]
    async fn test_blocked_put_is_rejected() {
        let (_temp, index, store) = db_backed(false).await;
        let (hash, data) = named(b"forbidden");

        index.block(&hash, "test").await.unwrap();
        let err = store.put(&hash, data).await.unwrap_err();
        assert!(matches!(err, StoreError::Blocked));

        // Nothing was stored or indexed.
        assert!(!store.has(&hash).await.unwrap());
        assert!(store.get(&hash).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_get_touches_access_time() {
        let (_temp, index, store) = db_backed(true).await;
        let (hash, data) = named(b"touched");

        store.put(&hash, data).await.unwrap();
        assert!(index
            .get_blob(&hash)
            .await
            .unwrap()
            .unwrap()
            .last_accessed_at
            .is_none());

        store.get(&hash).await.unwrap();
        assert!(index
            .get_blob(&hash)
            .await
            .unwrap()
            .unwrap()
            .last_accessed_at
            .is_some());
    }

    #[tokio::test]
    async fn test_writes_do_not_touch_access_time() {
        let (_temp, index, store) = db_backed(true).await;
        let (hash, data) = named(b"written twice");

        store.put(&hash, data.clone()).await.unwrap();
        store.put(&hash, data).await.unwrap();
        assert!(index
            .get_blob(&hash)
            .await
            .unwrap()
            .unwrap()
            .last_accessed_at
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_index_row() {
        let (_temp, index, store) = db_backed(false).await;
        let (hash, data) = named(b"short lived");

        store.put(&hash, data).await.unwrap();
        store.delete(&hash).await.unwrap();
        assert!(!store.has(&hash).await.unwrap());
        assert!(index.get_blob(&hash).await.unwrap().is_none());
    }
}
