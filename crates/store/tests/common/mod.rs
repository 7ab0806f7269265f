//! Common test utilities for store composition tests.

use async_trait::async_trait;
use bytes::Bytes;
use depot_core::BlobHash;
use depot_store::{BlobStore, MemoryStore, StoreError, StoreResult};
use std::sync::atomic::{AtomicBool, Ordering};

/// Hash a payload and return `(hex_hash, bytes)`.
pub fn named(data: &[u8]) -> (String, Bytes) {
    (
        BlobHash::compute(data).to_hex(),
        Bytes::copy_from_slice(data),
    )
}

/// A memory store whose reads can be switched off, simulating an origin
/// outage.
pub struct GateStore {
    inner: MemoryStore,
    enabled: AtomicBool,
}

impl GateStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.enabled.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Transport("origin disabled".to_string()))
        }
    }
}

impl Default for GateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for GateStore {
    fn name(&self) -> &'static str {
        "gate"
    }

    async fn has(&self, hash: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.has(hash).await
    }

    async fn get(&self, hash: &str) -> StoreResult<Bytes> {
        self.check()?;
        self.inner.get(hash).await
    }

    async fn put(&self, hash: &str, blob: Bytes) -> StoreResult<()> {
        self.check()?;
        self.inner.put(hash, blob).await
    }

    async fn put_sd(&self, hash: &str, blob: Bytes) -> StoreResult<()> {
        self.check()?;
        self.inner.put_sd(hash, blob).await
    }

    async fn delete(&self, hash: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.delete(hash).await
    }
}
