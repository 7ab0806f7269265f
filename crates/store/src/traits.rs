//! Blob store trait definition.

use crate::error::StoreResult;
use async_trait::async_trait;
use bytes::Bytes;

/// The blob store contract. Every concrete store and every wrapper
/// implements it; composition is built at configuration time over
/// `Arc<dyn BlobStore>`.
///
/// Hashes are 96-character lowercase hex SHA-384 digests of the blob bytes.
/// Read-only stores (remote peers) treat `put`/`put_sd`/`delete` as a
/// programmer error and panic; composition must never route writes to them.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Stable identifier used for metrics labelling.
    fn name(&self) -> &'static str;

    /// True iff a subsequent `get` would return bytes.
    async fn has(&self, hash: &str) -> StoreResult<bool>;

    /// Fetch a blob. Fails with `NotFound` when absent.
    async fn get(&self, hash: &str) -> StoreResult<Bytes>;

    /// Store a data blob. Idempotent: re-putting identical bytes succeeds
    /// without duplication.
    async fn put(&self, hash: &str, blob: Bytes) -> StoreResult<()>;

    /// As `put`, but records the stream-descriptor tag.
    async fn put_sd(&self, hash: &str, blob: Bytes) -> StoreResult<()>;

    /// Remove a blob. Deleting an absent blob is a success.
    async fn delete(&self, hash: &str) -> StoreResult<()>;
}
