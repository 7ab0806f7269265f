//! Coalescing of concurrent identical reads onto a single inner call.

use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

type FlightTable<T> = Mutex<HashMap<String, broadcast::Sender<Result<T, Arc<StoreError>>>>>;

/// Wraps any store so that for each `(hash, op)` with `op` in `{get, has}`
/// at most one call reaches the inner store concurrently. Additional
/// callers attach to the in-flight call and receive the same result (a
/// cheap clone of the bytes for `get`). Writes pass through untransformed.
///
/// Upstream tiers are expensive; duplicate fetches of the same missing blob
/// would thundering-herd the origin.
pub struct SingleFlightStore {
    inner: Arc<dyn BlobStore>,
    gets: FlightTable<Bytes>,
    hases: FlightTable<bool>,
}

enum Role<T> {
    Leader(broadcast::Sender<Result<T, Arc<StoreError>>>),
    Waiter(broadcast::Receiver<Result<T, Arc<StoreError>>>),
}

/// Removes the flight slot when the leader finishes or is abandoned, so
/// waiters never hang on a dead flight.
struct FlightGuard<'a, T> {
    table: &'a FlightTable<T>,
    hash: &'a str,
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        self.table
            .lock()
            .expect("single-flight table lock poisoned")
            .remove(self.hash);
    }
}

impl SingleFlightStore {
    /// Create a single-flight wrapper over `inner`.
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            gets: Mutex::new(HashMap::new()),
            hases: Mutex::new(HashMap::new()),
        }
    }

    fn join<T: Clone>(table: &FlightTable<T>, hash: &str) -> Role<T> {
        let mut flights = table.lock().expect("single-flight table lock poisoned");
        match flights.get(hash) {
            Some(tx) => Role::Waiter(tx.subscribe()),
            None => {
                let (tx, _rx) = broadcast::channel(1);
                flights.insert(hash.to_string(), tx.clone());
                Role::Leader(tx)
            }
        }
    }
}

#[async_trait]
impl BlobStore for SingleFlightStore {
    fn name(&self) -> &'static str {
        "singleflight"
    }

    async fn has(&self, hash: &str) -> StoreResult<bool> {
        loop {
            match Self::join(&self.hases, hash) {
                Role::Leader(tx) => {
                    let guard = FlightGuard {
                        table: &self.hases,
                        hash,
                    };
                    let result = self.inner.has(hash).await;
                    // Free the slot before broadcasting so late arrivals
                    // start a fresh flight instead of waiting on a closed one.
                    drop(guard);
                    let shared = match &result {
                        Ok(has) => Ok(*has),
                        Err(e) => Err(Arc::new(e.duplicate())),
                    };
                    let _ = tx.send(shared);
                    return result;
                }
                Role::Waiter(mut rx) => match rx.recv().await {
                    Ok(Ok(has)) => return Ok(has),
                    Ok(Err(e)) => return Err(e.duplicate()),
                    // Leader was abandoned; race for leadership again.
                    Err(_) => continue,
                },
            }
        }
    }

    async fn get(&self, hash: &str) -> StoreResult<Bytes> {
        loop {
            match Self::join(&self.gets, hash) {
                Role::Leader(tx) => {
                    let guard = FlightGuard {
                        table: &self.gets,
                        hash,
                    };
                    let result = self.inner.get(hash).await;
                    drop(guard);
                    let shared = match &result {
                        Ok(blob) => Ok(blob.clone()),
                        Err(e) => Err(Arc::new(e.duplicate())),
                    };
                    let _ = tx.send(shared);
                    return result;
                }
                Role::Waiter(mut rx) => match rx.recv().await {
                    Ok(Ok(blob)) => return Ok(blob),
                    Ok(Err(e)) => return Err(e.duplicate()),
                    Err(_) => continue,
                },
            }
        }
    }

    async fn put(&self, hash: &str, blob: Bytes) -> StoreResult<()> {
        self.inner.put(hash, blob).await
    }

    async fn put_sd(&self, hash: &str, blob: Bytes) -> StoreResult<()> {
        self.inner.put_sd(hash, blob).await
    }

    async fn delete(&self, hash: &str) -> StoreResult<()> {
        self.inner.delete(hash).await
    }
}
