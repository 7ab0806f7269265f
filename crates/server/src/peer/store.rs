//! Read-only blob store backed by a remote TCP peer.

use super::PeerClient;
use async_trait::async_trait;
use bytes::Bytes;
use depot_store::{BlobStore, StoreResult};
use std::time::Duration;

/// A blob store that fetches from another node over the TCP peer protocol.
/// Each call opens a fresh client with the configured timeout and closes on
/// return. Writes are a programmer error: composition must never route
/// `put`/`delete` to a remote peer.
pub struct PeerStore {
    address: String,
    timeout: Duration,
}

impl PeerStore {
    /// Create a peer store for the node at `address`.
    pub fn new(address: &str, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            timeout,
        }
    }

    async fn client(&self) -> StoreResult<PeerClient> {
        PeerClient::connect(&self.address, self.timeout).await
    }
}

#[async_trait]
impl BlobStore for PeerStore {
    fn name(&self) -> &'static str {
        "peer"
    }

    async fn has(&self, hash: &str) -> StoreResult<bool> {
        self.client().await?.has_blob(hash).await
    }

    async fn get(&self, hash: &str) -> StoreResult<Bytes> {
        self.client().await?.get_blob(hash).await
    }

    async fn put(&self, _hash: &str, _blob: Bytes) -> StoreResult<()> {
        panic!("peer store is read-only and cannot put blobs");
    }

    async fn put_sd(&self, _hash: &str, _blob: Bytes) -> StoreResult<()> {
        panic!("peer store is read-only and cannot put blobs");
    }

    async fn delete(&self, _hash: &str) -> StoreResult<()> {
        panic!("peer store is read-only and cannot delete blobs");
    }
}
