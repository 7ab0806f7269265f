//! Read-only blob store backed by a remote HTTP/3 peer.

use super::Http3Client;
use async_trait::async_trait;
use bytes::Bytes;
use depot_store::{BlobStore, StoreResult};
use std::time::Duration;

/// A blob store that fetches from another node over HTTP/3. Each call
/// opens a fresh client with the configured timeout and closes on return.
/// Writes are a programmer error: composition must never route
/// `put`/`delete` to a remote peer.
pub struct Http3Store {
    address: String,
    timeout: Duration,
}

impl Http3Store {
    /// Create an HTTP/3 store for the node at `address`.
    pub fn new(address: &str, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl BlobStore for Http3Store {
    fn name(&self) -> &'static str {
        "http3"
    }

    async fn has(&self, hash: &str) -> StoreResult<bool> {
        let mut client = Http3Client::connect(&self.address, self.timeout).await?;
        let result = client.has_blob(hash).await;
        client.close().await;
        result
    }

    async fn get(&self, hash: &str) -> StoreResult<Bytes> {
        let mut client = Http3Client::connect(&self.address, self.timeout).await?;
        let result = client.get_blob(hash).await;
        client.close().await;
        result
    }

    async fn put(&self, _hash: &str, _blob: Bytes) -> StoreResult<()> {
        panic!("http3 store is read-only and cannot put blobs");
    }

    async fn put_sd(&self, _hash: &str, _blob: Bytes) -> StoreResult<()> {
        panic!("http3 store is read-only and cannot put blobs");
    }

    async fn delete(&self, _hash: &str) -> StoreResult<()> {
        panic!("http3 store is read-only and cannot delete blobs");
    }
}
