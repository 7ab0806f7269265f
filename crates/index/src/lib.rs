//! Blob index abstraction and SQLite implementation for depot.
//!
//! The index is the node's control-plane record of which blobs the origin
//! holds: size, stream-descriptor tag, access times, and the blocklist of
//! hashes that are neither served nor stored.

pub mod error;
pub mod models;
pub mod store;

pub use error::{IndexError, IndexResult};
pub use models::{BlobRow, BlockedEntry};
pub use store::{BlobIndex, SqliteIndex};

use depot_core::config::IndexConfig;
use std::sync::Arc;

/// Create a blob index from configuration.
pub async fn from_config(config: &IndexConfig) -> IndexResult<Arc<dyn BlobIndex>> {
    let index = SqliteIndex::new(&config.path).await?;
    Ok(Arc::new(index) as Arc<dyn BlobIndex>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("index.db");
        let config = IndexConfig {
            enabled: true,
            path: db_path.clone(),
            track_access: true,
        };

        let index = from_config(&config).await.unwrap();
        index.health_check().await.unwrap();
        assert!(db_path.exists());
    }
}
