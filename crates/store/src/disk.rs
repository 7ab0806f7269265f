//! Filesystem-backed store with sharded layout.

use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStore;
use async_trait::async_trait;
use bytes::Bytes;
use depot_core::BlobHash;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// A blob store keeping each blob as one file under
/// `<root>/<hash[..prefix_length]>/<hash>`. A prefix length of 0 disables
/// sharding. Initialization is lazy on first operation and idempotent.
pub struct DiskStore {
    root: PathBuf,
    prefix_length: usize,
    init: OnceCell<()>,
}

impl DiskStore {
    /// Create a disk store rooted at `root`. The directory is created on
    /// first use.
    pub fn new(root: impl AsRef<Path>, prefix_length: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            prefix_length,
            init: OnceCell::new(),
        }
    }

    async fn init_once(&self) -> StoreResult<()> {
        self.init
            .get_or_try_init(|| async {
                fs::create_dir_all(&self.root).await?;
                Ok::<(), StoreError>(())
            })
            .await?;
        Ok(())
    }

    /// Reject names that are not valid blob hashes before touching the
    /// filesystem. This doubles as path-traversal protection.
    fn check_hash(hash: &str) -> StoreResult<()> {
        BlobHash::from_hex(hash)
            .map(|_| ())
            .map_err(|e| StoreError::InvalidBlob(e.to_string()))
    }

    fn dir(&self, hash: &str) -> PathBuf {
        if self.prefix_length == 0 || hash.len() < self.prefix_length {
            return self.root.clone();
        }
        self.root.join(&hash[..self.prefix_length])
    }

    fn path(&self, hash: &str) -> PathBuf {
        self.dir(hash).join(hash)
    }

    /// Walk the tree and return all stored blob hashes. Used by operator
    /// tooling, not the hot path.
    pub async fn list(&self) -> StoreResult<Vec<String>> {
        self.init_once().await?;

        let mut results = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if file_type.is_file() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    // Skip in-progress temp files.
                    if BlobHash::from_hex(&name).is_ok() {
                        results.push(name);
                    }
                }
            }
        }

        Ok(results)
    }
}

#[async_trait]
impl BlobStore for DiskStore {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn has(&self, hash: &str) -> StoreResult<bool> {
        Self::check_hash(hash)?;
        self.init_once().await?;
        fs::try_exists(&self.path(hash)).await.map_err(StoreError::Io)
    }

    async fn get(&self, hash: &str) -> StoreResult<Bytes> {
        Self::check_hash(hash)?;
        self.init_once().await?;

        let data = fs::read(&self.path(hash)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(Bytes::from(data))
    }

    async fn put(&self, hash: &str, blob: Bytes) -> StoreResult<()> {
        depot_core::verify_named(hash, &blob)?;
        self.init_once().await?;

        let path = self.path(hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a uniquely named temp file, fsync, then rename so no
        // partially written file ever becomes readable under its final name.
        let temp_path = self.dir(hash).join(format!("{hash}.tmp.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&blob).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    async fn put_sd(&self, hash: &str, blob: Bytes) -> StoreResult<()> {
        // The disk layout does not distinguish sd blobs; the tag lives in
        // the index.
        self.put(hash, blob).await
    }

    async fn delete(&self, hash: &str) -> StoreResult<()> {
        Self::check_hash(hash)?;
        self.init_once().await?;

        match fs::remove_file(&self.path(hash)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(data: &[u8]) -> (String, Bytes) {
        (
            BlobHash::compute(data).to_hex(),
            Bytes::copy_from_slice(data),
        )
    }

    #[tokio::test]
    async fn test_put_get_roundtrip_sharded() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("blobs"), 2);
        let (hash, data) = named(b"hello world");

        store.put(&hash, data.clone()).await.unwrap();
        assert!(store.has(&hash).await.unwrap());
        assert_eq!(store.get(&hash).await.unwrap(), data);

        // Sharded layout: <root>/<hash[..2]>/<hash>
        let expected = dir.path().join("blobs").join(&hash[..2]).join(&hash);
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn test_unsharded_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path(), 0);
        let (hash, data) = named(b"flat");

        store.put(&hash, data).await.unwrap();
        assert!(dir.path().join(&hash).exists());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path(), 2);
        let (hash, _) = named(b"absent");

        let err = store.get(&hash).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_tolerates_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path(), 2);
        let (hash, data) = named(b"temp");

        store.delete(&hash).await.unwrap();
        store.put(&hash, data).await.unwrap();
        store.delete(&hash).await.unwrap();
        assert!(!store.has(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_rejects_wrong_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path(), 2);
        let wrong = BlobHash::compute(b"other").to_hex();

        let err = store.put(&wrong, Bytes::from_static(b"data")).await.unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
        assert!(!store.has(&wrong).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_non_hash_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path(), 2);

        let err = store.get("../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidBlob(_)));
    }

    #[tokio::test]
    async fn test_list_returns_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path(), 2);
        let (hash_a, data_a) = named(b"aaa");
        let (hash_b, data_b) = named(b"bbb");

        store.put(&hash_a, data_a).await.unwrap();
        store.put(&hash_b, data_b).await.unwrap();

        let mut listed = store.list().await.unwrap();
        listed.sort();
        let mut expected = vec![hash_a, hash_b];
        expected.sort();
        assert_eq!(listed, expected);
    }
}
