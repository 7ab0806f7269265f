//! Parallel ingest of a directory tree into a store.
//!
//! Filenames are blob hashes. The walk produces candidates, an optional
//! batched index check filters blobs the origin already holds, and a fixed
//! worker pool reads, verifies, classifies, and uploads each file.

use bytes::Bytes;
use depot_core::BlobHash;
use depot_index::BlobIndex;
use depot_store::{BlobStore, StoreResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Upload progress counters.
#[derive(Debug, Default)]
pub struct UploaderCounts {
    pub total: AtomicU64,
    pub existing: AtomicU64,
    pub uploaded: AtomicU64,
    pub failed: AtomicU64,
}

/// Parallel uploader with a fixed worker pool.
pub struct Uploader {
    index: Arc<dyn BlobIndex>,
    store: Arc<dyn BlobStore>,
    workers: usize,
    skip_exists_check: bool,
    delete_after_upload: bool,
    stop: CancellationToken,
    counts: Arc<UploaderCounts>,
}

impl Uploader {
    /// Create an uploader writing into `store`, with `index` used for the
    /// batched existence filter.
    pub fn new(
        index: Arc<dyn BlobIndex>,
        store: Arc<dyn BlobStore>,
        workers: usize,
        skip_exists_check: bool,
        delete_after_upload: bool,
    ) -> Self {
        Self {
            index,
            store,
            workers: workers.max(1),
            skip_exists_check,
            delete_after_upload,
            stop: CancellationToken::new(),
            counts: Arc::new(UploaderCounts::default()),
        }
    }

    /// Signal a graceful stop: workers drain their current item and exit,
    /// and no new items are dispatched.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Progress counters.
    pub fn counts(&self) -> &UploaderCounts {
        &self.counts
    }

    /// Walk `root` and upload every blob file under it.
    pub async fn upload(&self, root: &Path) -> anyhow::Result<()> {
        let candidates = walk_blob_files(root).await?;
        self.counts
            .total
            .store(candidates.len() as u64, Ordering::SeqCst);
        tracing::info!(count = candidates.len(), root = %root.display(), "found blob files");

        let candidates = if self.skip_exists_check {
            candidates
        } else {
            self.filter_existing(candidates).await?
        };

        let (tx, rx) = mpsc::channel::<(String, PathBuf)>(self.workers * 2);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let rx = rx.clone();
            let store = self.store.clone();
            let counts = self.counts.clone();
            let stop = self.stop.clone();
            let delete_after_upload = self.delete_after_upload;
            workers.push(tokio::spawn(async move {
                loop {
                    let item = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            _ = stop.cancelled() => None,
                            item = rx.recv() => item,
                        }
                    };
                    let Some((hash, path)) = item else { break };

                    match upload_one(&store, &hash, &path, delete_after_upload).await {
                        Ok(is_sd) => {
                            counts.uploaded.fetch_add(1, Ordering::SeqCst);
                            if is_sd {
                                depot_metrics::SD_BLOB_UPLOAD_COUNT.inc();
                            } else {
                                depot_metrics::BLOB_UPLOAD_COUNT.inc();
                            }
                        }
                        Err(e) => {
                            counts.failed.fetch_add(1, Ordering::SeqCst);
                            depot_metrics::record_error(e.kind());
                            tracing::warn!(hash = %hash, error = %e, "blob upload failed");
                        }
                    }
                }
            }));
        }

        for item in candidates {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                result = tx.send(item) => {
                    if result.is_err() {
                        break;
                    }
                }
            }
        }
        drop(tx);

        for worker in workers {
            let _ = worker.await;
        }

        tracing::info!(
            total = self.counts.total.load(Ordering::SeqCst),
            existing = self.counts.existing.load(Ordering::SeqCst),
            uploaded = self.counts.uploaded.load(Ordering::SeqCst),
            failed = self.counts.failed.load(Ordering::SeqCst),
            "upload finished"
        );
        Ok(())
    }

    /// Drop candidates the index already records, counting them as existing.
    async fn filter_existing(
        &self,
        candidates: Vec<(String, PathBuf)>,
    ) -> anyhow::Result<Vec<(String, PathBuf)>> {
        let hashes: Vec<String> = candidates.iter().map(|(hash, _)| hash.clone()).collect();
        let present = self.index.has_blobs(&hashes).await?;
        self.counts
            .existing
            .store(present.len() as u64, Ordering::SeqCst);

        Ok(candidates
            .into_iter()
            .filter(|(hash, _)| !present.contains(hash))
            .collect())
    }
}

/// Read, verify, classify, and store one blob file.
async fn upload_one(
    store: &Arc<dyn BlobStore>,
    hash: &str,
    path: &Path,
    delete_after_upload: bool,
) -> StoreResult<bool> {
    let data = Bytes::from(tokio::fs::read(path).await?);
    // The filename must equal the hash of the file bytes.
    depot_core::verify_named(hash, &data)?;

    let is_sd = depot_core::is_sd_payload(&data);
    if is_sd {
        store.put_sd(hash, data).await?;
    } else {
        store.put(hash, data).await?;
    }

    if delete_after_upload {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete uploaded blob");
        }
    }

    Ok(is_sd)
}

/// Walk the tree collecting files whose names parse as blob hashes.
async fn walk_blob_files(root: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if BlobHash::from_hex(&name).is_ok() {
                files.push((name, entry.into_path()));
            } else {
                tracing::warn!(path = %entry.path().display(), "skipping non-blob file");
            }
        }
        Ok(files)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::{BlobInfo, SdBlob};
    use depot_index::SqliteIndex;
    use depot_store::{DbBackedStore, MemoryStore};

    async fn write_blob(dir: &Path, data: &[u8]) -> String {
        let hash = BlobHash::compute(data).to_hex();
        tokio::fs::write(dir.join(&hash), data).await.unwrap();
        hash
    }

    async fn build_uploader(workers: usize, skip: bool, delete: bool) -> (tempfile::TempDir, Uploader)
    {
        let temp = tempfile::tempdir().unwrap();
        let index: Arc<dyn BlobIndex> = Arc::new(
            SqliteIndex::new(temp.path().join("index.db")).await.unwrap(),
        );
        let store = Arc::new(DbBackedStore::new(
            Arc::new(MemoryStore::new()),
            index.clone(),
            false,
        ));
        (temp, Uploader::new(index, store, workers, skip, delete))
    }

    #[tokio::test]
    async fn test_uploads_data_and_sd_blobs() {
        let (temp, uploader) = build_uploader(4, false, false).await;
        let blob_dir = temp.path().join("blobs");
        tokio::fs::create_dir_all(&blob_dir).await.unwrap();

        let data_hash = write_blob(&blob_dir, b"plain data payload").await;
        let sd = SdBlob {
            blobs: vec![BlobInfo {
                blob_num: 0,
                blob_hash: None,
                iv: "00".to_string(),
                length: 0,
            }],
            stream_name: None,
            stream_type: None,
            stream_hash: None,
            key: None,
            suggested_file_name: None,
        };
        let sd_bytes = sd.to_bytes().unwrap();
        let sd_hash = write_blob(&blob_dir, &sd_bytes).await;

        uploader.upload(&blob_dir).await.unwrap();

        assert_eq!(uploader.counts().uploaded.load(Ordering::SeqCst), 2);
        assert_eq!(uploader.counts().failed.load(Ordering::SeqCst), 0);
        assert!(uploader.store.has(&data_hash).await.unwrap());
        assert!(uploader.store.has(&sd_hash).await.unwrap());

        let row = uploader.index.get_blob(&sd_hash).await.unwrap().unwrap();
        assert!(row.is_sd);
        let row = uploader.index.get_blob(&data_hash).await.unwrap().unwrap();
        assert!(!row.is_sd);
    }

    #[tokio::test]
    async fn test_exists_check_skips_present_blobs() {
        let (temp, uploader) = build_uploader(2, false, false).await;
        let blob_dir = temp.path().join("blobs");
        tokio::fs::create_dir_all(&blob_dir).await.unwrap();

        let hash = write_blob(&blob_dir, b"already there").await;
        uploader.index.add_blob(&hash, 13, false).await.unwrap();

        uploader.upload(&blob_dir).await.unwrap();

        assert_eq!(uploader.counts().existing.load(Ordering::SeqCst), 1);
        assert_eq!(uploader.counts().uploaded.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_counts_as_failed() {
        let (temp, uploader) = build_uploader(2, true, false).await;
        let blob_dir = temp.path().join("blobs");
        tokio::fs::create_dir_all(&blob_dir).await.unwrap();

        // A file named for one payload but holding another.
        let hash = BlobHash::compute(b"declared").to_hex();
        tokio::fs::write(blob_dir.join(&hash), b"tampered").await.unwrap();

        uploader.upload(&blob_dir).await.unwrap();

        assert_eq!(uploader.counts().failed.load(Ordering::SeqCst), 1);
        assert!(!uploader.store.has(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_after_upload() {
        let (temp, uploader) = build_uploader(1, true, true).await;
        let blob_dir = temp.path().join("blobs");
        tokio::fs::create_dir_all(&blob_dir).await.unwrap();

        let hash = write_blob(&blob_dir, b"remove me after").await;
        uploader.upload(&blob_dir).await.unwrap();

        assert!(uploader.store.has(&hash).await.unwrap());
        assert!(!blob_dir.join(&hash).exists());
    }

    #[tokio::test]
    async fn test_non_hash_files_are_skipped() {
        let (temp, uploader) = build_uploader(1, true, false).await;
        let blob_dir = temp.path().join("blobs");
        tokio::fs::create_dir_all(&blob_dir).await.unwrap();

        tokio::fs::write(blob_dir.join("README.txt"), b"not a blob")
            .await
            .unwrap();
        let hash = write_blob(&blob_dir, b"a real blob").await;

        uploader.upload(&blob_dir).await.unwrap();

        assert_eq!(uploader.counts().total.load(Ordering::SeqCst), 1);
        assert!(uploader.store.has(&hash).await.unwrap());
    }
}
