//! Layered blob store composition for depot.
//!
//! This crate provides:
//! - The `BlobStore` contract every store satisfies
//! - Leaf stores: in-process memory and sharded disk
//! - Wrappers, each adding one property: LRU eviction, single-flight
//!   coalescing, origin+cache composition, index-database backing

pub mod caching;
pub mod db_backed;
pub mod disk;
pub mod error;
pub mod lru;
pub mod memory;
pub mod singleflight;
pub mod traits;

pub use caching::CachingStore;
pub use db_backed::DbBackedStore;
pub use disk::DiskStore;
pub use error::{StoreError, StoreResult};
pub use lru::{LruBound, LruStore};
pub use memory::MemoryStore;
pub use singleflight::SingleFlightStore;
pub use traits::BlobStore;

use depot_core::config::StorageConfig;
use std::sync::Arc;

/// Create an origin store from configuration.
pub fn from_config(config: &StorageConfig) -> Arc<dyn BlobStore> {
    match config {
        StorageConfig::Disk {
            path,
            prefix_length,
        } => Arc::new(DiskStore::new(path, *prefix_length)),
        StorageConfig::Memory => Arc::new(MemoryStore::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use depot_core::BlobHash;

    #[tokio::test]
    async fn test_from_config_disk() {
        let temp = tempfile::tempdir().unwrap();
        let config = StorageConfig::Disk {
            path: temp.path().join("blobs"),
            prefix_length: 2,
        };

        let store = from_config(&config);
        assert_eq!(store.name(), "disk");

        let data = Bytes::from_static(b"configured");
        let hash = BlobHash::compute(&data).to_hex();
        store.put(&hash, data).await.unwrap();
        assert!(store.has(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_from_config_memory() {
        let store = from_config(&StorageConfig::Memory);
        assert_eq!(store.name(), "memory");
    }
}
