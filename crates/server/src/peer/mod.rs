//! TCP peer protocol: a streaming-JSON request/response protocol serving
//! blobs, with keep-alive request cycles per connection.

pub mod client;
pub mod store;

pub use client::PeerClient;
pub use store::PeerStore;

use crate::bufpool::BufferPool;
use crate::framing;
use depot_store::{BlobStore, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Default TCP peer port.
pub const DEFAULT_PORT: u16 = 5567;

/// Default per-request timeout on the serving side.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error string sent when a requested blob is absent.
pub(crate) const ERR_BLOB_NOT_FOUND: &str = "BLOB_NOT_FOUND";

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AvailabilityRequest {
    pub requested_blobs: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AvailabilityResponse {
    pub available_blobs: Vec<String>,
    pub lbrycrd_address: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct BlobRequest {
    pub requested_blob: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct BlobResponse {
    pub incoming_blob: IncomingBlob,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct IncomingBlob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One request cycle's message, distinguished by its fields.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PeerRequest {
    Availability(AvailabilityRequest),
    Blob(BlobRequest),
}

/// TCP peer server. `start` binds and accepts in the background; each
/// accepted connection is handled by an independent task with a
/// per-request timeout.
pub struct PeerServer {
    store: Arc<dyn BlobStore>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// How long `shutdown` waits for in-flight handlers.
    pub grace: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    pool: Arc<BufferPool>,
    local_addr: Mutex<Option<SocketAddr>>,
    started: AtomicBool,
}

impl PeerServer {
    /// Create a peer server over the given store.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_TIMEOUT,
            grace: Duration::from_secs(10),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            pool: Arc::new(BufferPool::new()),
            local_addr: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Bind `addr` and accept connections in the background.
    ///
    /// Errors if the server was already started or shut down.
    pub async fn start(&self, addr: &str) -> anyhow::Result<()> {
        if self.shutdown.is_cancelled() {
            anyhow::bail!("peer server is shut down");
        }
        if self.started.swap(true, Ordering::SeqCst) {
            anyhow::bail!("peer server already started");
        }

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().expect("local_addr lock poisoned") = Some(local_addr);
        tracing::info!(addr = %local_addr, "tcp peer server listening");

        let store = self.store.clone();
        let timeout = self.timeout;
        let token = self.shutdown.clone();
        let tracker = self.tracker.clone();
        let pool = self.pool.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = listener.accept() => match result {
                        Ok((stream, remote)) => {
                            let store = store.clone();
                            let token = token.clone();
                            let pool = pool.clone();
                            tracker.spawn(async move {
                                handle_connection(stream, remote, store, timeout, token, pool)
                                    .await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to accept peer connection");
                        }
                    }
                }
            }
            // Dropping the listener refuses new connections during shutdown.
        });

        Ok(())
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("local_addr lock poisoned")
    }

    /// Stop accepting connections and wait for in-flight handlers up to the
    /// grace period.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        if tokio::time::timeout(self.grace, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!("peer server shutdown grace period elapsed with handlers in flight");
        }
        tracing::info!("tcp peer server stopped");
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote: SocketAddr,
    store: Arc<dyn BlobStore>,
    timeout: Duration,
    token: CancellationToken,
    pool: Arc<BufferPool>,
) {
    tracing::debug!(remote = %remote, "peer connection opened");
    if let Err(e) = handle_requests(stream, store, timeout, token, pool).await {
        depot_metrics::record_error(e.kind());
        match e {
            StoreError::Protocol(_) => {
                tracing::debug!(remote = %remote, error = %e, "peer connection closed")
            }
            _ => tracing::warn!(remote = %remote, error = %e, "peer connection error"),
        }
    }
}

async fn handle_requests(
    mut stream: TcpStream,
    store: Arc<dyn BlobStore>,
    timeout: Duration,
    token: CancellationToken,
    pool: Arc<BufferPool>,
) -> StoreResult<()> {
    let mut buf = pool.get();

    loop {
        let request = tokio::select! {
            _ = token.cancelled() => break,
            result = tokio::time::timeout(
                timeout,
                framing::read_json::<_, PeerRequest>(&mut stream, &mut buf),
            ) => match result {
                Ok(Ok(Some(request))) => request,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(StoreError::Protocol("request timed out".to_string()));
                }
            }
        };

        match request {
            PeerRequest::Availability(req) => {
                let mut available = Vec::with_capacity(req.requested_blobs.len());
                for hash in &req.requested_blobs {
                    match store.has(hash).await {
                        Ok(true) => available.push(hash.clone()),
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(hash = %hash, error = %e, "availability check failed");
                        }
                    }
                }
                let response = AvailabilityResponse {
                    available_blobs: available,
                    lbrycrd_address: true,
                };
                framing::write_json(&mut stream, &response).await?;
            }
            PeerRequest::Blob(req) => match store.get(&req.requested_blob).await {
                Ok(blob) => {
                    let response = BlobResponse {
                        incoming_blob: IncomingBlob {
                            blob_hash: Some(req.requested_blob.clone()),
                            length: Some(blob.len() as u64),
                            error: None,
                        },
                    };
                    framing::write_json(&mut stream, &response).await?;
                    stream.write_all(&blob).await?;
                    stream.flush().await?;
                    depot_metrics::SENT_BYTES_TCP.inc_by(blob.len() as u64);
                }
                Err(e) if e.is_not_found() => {
                    let response = BlobResponse {
                        incoming_blob: IncomingBlob {
                            error: Some(ERR_BLOB_NOT_FOUND.to_string()),
                            ..Default::default()
                        },
                    };
                    framing::write_json(&mut stream, &response).await?;
                }
                Err(e) => return Err(e),
            },
        }
    }

    pool.put(buf);
    Ok(())
}
