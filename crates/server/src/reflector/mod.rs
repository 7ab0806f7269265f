//! Reflector upload protocol: a streaming-JSON protocol with a version
//! handshake, a stream-descriptor phase, and a repeatable data-blob phase.
//! Every blob is content-verified before storage and blocklist checks run
//! before acceptance and before storage.

pub mod uploader;

pub use uploader::Uploader;

use crate::bufpool::BufferPool;
use crate::framing;
use depot_core::{MAX_BLOB_SIZE, SdBlob};
use depot_index::BlobIndex;
use depot_store::{BlobStore, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Default reflector receiver port.
pub const DEFAULT_PORT: u16 = 5566;

/// Default per-request timeout on the receive side.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Protocol versions this receiver accepts.
const SUPPORTED_VERSIONS: [u32; 2] = [0, 1];

/// Error string sent when an offered hash is blocklisted.
pub(crate) const ERR_BLOB_BLOCKED: &str = "BLOB_BLOCKED";

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Handshake {
    pub version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SdBlobRequest {
    pub sd_blob_hash: String,
    pub sd_blob_size: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct SdBlobResponse {
    pub send_sd_blob: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needed_blobs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SdBlobReceipt {
    pub received_sd_blob: bool,
    pub needed_blobs: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct DataBlobRequest {
    pub blob_hash: String,
    pub blob_size: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct DataBlobResponse {
    pub send_blob: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct DataBlobReceipt {
    pub received_blob: bool,
}

/// A post-handshake client message, distinguished by its fields.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UploadRequest {
    Sd(SdBlobRequest),
    Data(DataBlobRequest),
}

/// Reflector upload receiver.
///
/// Writes go through `store` (the db-backed store, so blocklist rejection
/// and index upserts apply); `index` is consulted for pre-acceptance
/// blocklist checks when present.
pub struct ReflectorServer {
    store: Arc<dyn BlobStore>,
    index: Option<Arc<dyn BlobIndex>>,
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

impl ReflectorServer {
    /// Create a receiver writing into `store`.
    pub fn new(store: Arc<dyn BlobStore>, index: Option<Arc<dyn BlobIndex>>) -> Self {
        Self {
            store,
            index,
            timeout: DEFAULT_TIMEOUT,
            grace: Duration::from_secs(10),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            pool: Arc::new(BufferPool::new()),
            local_addr: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Bind `addr` and accept upload connections in the background.
    pub async fn start(&self, addr: &str) -> anyhow::Result<()> {
        if self.shutdown.is_cancelled() {
            anyhow::bail!("reflector server is shut down");
        }
        if self.started.swap(true, Ordering::SeqCst) {
            anyhow::bail!("reflector server already started");
        }

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().expect("local_addr lock poisoned") = Some(local_addr);
        tracing::info!(addr = %local_addr, "reflector receiver listening");

        let store = self.store.clone();
        let index = self.index.clone();
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
                            let handler = ConnectionHandler {
                                store: store.clone(),
                                index: index.clone(),
                                timeout,
                                token: token.clone(),
                            };
                            let pool = pool.clone();
                            tracker.spawn(async move {
                                handler.run(stream, remote, pool).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to accept upload connection");
                        }
                    }
                }
            }
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
            tracing::warn!("reflector shutdown grace period elapsed with uploads in flight");
        }
        tracing::info!("reflector receiver stopped");
    }
}

struct ConnectionHandler {
    store: Arc<dyn BlobStore>,
    index: Option<Arc<dyn BlobIndex>>,
    timeout: Duration,
    token: CancellationToken,
}

impl ConnectionHandler {
    async fn run(&self, stream: TcpStream, remote: SocketAddr, pool: Arc<BufferPool>) {
        tracing::debug!(remote = %remote, "upload connection opened");
        let mut buf = pool.get();
        if let Err(e) = self.handle(stream, &mut buf).await {
            depot_metrics::record_error(e.kind());
            match e {
                StoreError::Protocol(_) | StoreError::HashMismatch { .. } => {
                    tracing::debug!(remote = %remote, error = %e, "upload connection closed")
                }
                _ => tracing::warn!(remote = %remote, error = %e, "upload connection error"),
            }
        }
        pool.put(buf);
    }

    async fn read_message<T: serde::de::DeserializeOwned>(
        &self,
        stream: &mut TcpStream,
        buf: &mut bytes::BytesMut,
    ) -> StoreResult<Option<T>> {
        tokio::select! {
            _ = self.token.cancelled() => Ok(None),
            result = tokio::time::timeout(self.timeout, framing::read_json(stream, buf)) => {
                result.map_err(|_| StoreError::Protocol("request timed out".to_string()))?
            }
        }
    }

    async fn read_body(
        &self,
        stream: &mut TcpStream,
        buf: &mut bytes::BytesMut,
        len: usize,
    ) -> StoreResult<bytes::Bytes> {
        tokio::time::timeout(self.timeout, framing::read_body(stream, buf, len))
            .await
            .map_err(|_| StoreError::Protocol("blob body timed out".to_string()))?
    }

    async fn is_blocked(&self, hash: &str) -> StoreResult<bool> {
        match &self.index {
            Some(index) => Ok(index.is_blocked(hash).await?),
            None => Ok(false),
        }
    }

    /// Which of the stream's data blobs are still missing from the store.
    async fn needed_blobs(&self, sd: &SdBlob) -> Vec<String> {
        let mut needed = Vec::new();
        for hash in sd.data_hashes() {
            match self.store.has(hash).await {
                Ok(true) => {}
                Ok(false) => needed.push(hash.to_string()),
                Err(e) => {
                    tracing::warn!(hash = %hash, error = %e, "needed-blob check failed");
                    needed.push(hash.to_string());
                }
            }
        }
        needed
    }

    async fn handle(&self, mut stream: TcpStream, buf: &mut bytes::BytesMut) -> StoreResult<()> {
        // Handshake: echo the client's version or close on mismatch.
        let Some(handshake) = self.read_message::<Handshake>(&mut stream, buf).await? else {
            return Ok(());
        };
        if !SUPPORTED_VERSIONS.contains(&handshake.version) {
            return Err(StoreError::Protocol(format!(
                "unsupported protocol version {}",
                handshake.version
            )));
        }
        framing::write_json(&mut stream, &Handshake {
            version: handshake.version,
        })
        .await?;

        loop {
            let Some(request) = self.read_message::<UploadRequest>(&mut stream, buf).await?
            else {
                return Ok(());
            };
            match request {
                UploadRequest::Sd(req) => self.handle_sd(&mut stream, buf, req).await?,
                UploadRequest::Data(req) => self.handle_data(&mut stream, buf, req).await?,
            }
        }
    }

    async fn handle_sd(
        &self,
        stream: &mut TcpStream,
        buf: &mut bytes::BytesMut,
        req: SdBlobRequest,
    ) -> StoreResult<()> {
        if req.sd_blob_size == 0 || req.sd_blob_size as usize > MAX_BLOB_SIZE {
            return Err(StoreError::Protocol(format!(
                "invalid sd blob size {}",
                req.sd_blob_size
            )));
        }

        if self.is_blocked(&req.sd_blob_hash).await? {
            depot_metrics::record_error("blocked");
            let response = SdBlobResponse {
                send_sd_blob: false,
                needed_blobs: None,
                error: Some(ERR_BLOB_BLOCKED.to_string()),
            };
            return framing::write_json(stream, &response).await;
        }

        if self.store.has(&req.sd_blob_hash).await? {
            // Already have the descriptor; report which data blobs are
            // still missing so the client can skip ahead.
            let needed = match self.store.get(&req.sd_blob_hash).await {
                Ok(bytes) => match SdBlob::from_bytes(&bytes) {
                    Ok(sd) => self.needed_blobs(&sd).await,
                    Err(e) => {
                        tracing::warn!(hash = %req.sd_blob_hash, error = %e,
                            "stored sd blob failed to decode");
                        Vec::new()
                    }
                },
                Err(e) => {
                    tracing::warn!(hash = %req.sd_blob_hash, error = %e,
                        "stored sd blob unavailable for needed-blob check");
                    Vec::new()
                }
            };
            let response = SdBlobResponse {
                send_sd_blob: false,
                needed_blobs: Some(needed),
                error: None,
            };
            return framing::write_json(stream, &response).await;
        }

        framing::write_json(stream, &SdBlobResponse {
            send_sd_blob: true,
            needed_blobs: None,
            error: None,
        })
        .await?;

        let body = self.read_body(stream, buf, req.sd_blob_size as usize).await?;
        // A hash mismatch is connection-fatal; buffered bytes are discarded
        // with the connection.
        depot_core::verify_named(&req.sd_blob_hash, &body)?;
        let sd = SdBlob::from_bytes(&body)
            .map_err(|e| StoreError::Protocol(format!("undecodable sd blob: {e}")))?;

        self.store.put_sd(&req.sd_blob_hash, body).await?;
        depot_metrics::SD_BLOB_UPLOAD_COUNT.inc();
        depot_metrics::RECEIVED_BYTES.inc_by(req.sd_blob_size);

        let needed = self.needed_blobs(&sd).await;
        framing::write_json(stream, &SdBlobReceipt {
            received_sd_blob: true,
            needed_blobs: needed,
        })
        .await
    }

    async fn handle_data(
        &self,
        stream: &mut TcpStream,
        buf: &mut bytes::BytesMut,
        req: DataBlobRequest,
    ) -> StoreResult<()> {
        if req.blob_size == 0 || req.blob_size as usize > MAX_BLOB_SIZE {
            return Err(StoreError::Protocol(format!(
                "invalid blob size {}",
                req.blob_size
            )));
        }

        if self.is_blocked(&req.blob_hash).await? {
            depot_metrics::record_error("blocked");
            let response = DataBlobResponse {
                send_blob: false,
                error: Some(ERR_BLOB_BLOCKED.to_string()),
            };
            return framing::write_json(stream, &response).await;
        }

        if self.store.has(&req.blob_hash).await? {
            let response = DataBlobResponse {
                send_blob: false,
                error: None,
            };
            return framing::write_json(stream, &response).await;
        }

        framing::write_json(stream, &DataBlobResponse {
            send_blob: true,
            error: None,
        })
        .await?;

        let body = self.read_body(stream, buf, req.blob_size as usize).await?;
        depot_core::verify_named(&req.blob_hash, &body)?;

        self.store.put(&req.blob_hash, body).await?;
        depot_metrics::BLOB_UPLOAD_COUNT.inc();
        depot_metrics::RECEIVED_BYTES.inc_by(req.blob_size);

        framing::write_json(stream, &DataBlobReceipt {
            received_blob: true,
        })
        .await
    }
}
