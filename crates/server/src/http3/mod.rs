//! HTTP/3 peer protocol: the TCP peer semantics mapped onto
//! `GET /has/<hash>` and `GET /get/<hash>` over QUIC.

pub mod client;
pub mod store;
mod tls;

pub use client::Http3Client;
pub use store::Http3Store;

use bytes::Bytes;
use depot_store::BlobStore;
use http::{Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Default HTTP/3 peer port.
pub const DEFAULT_PORT: u16 = 5568;

/// HTTP/3 peer server serving the same composed store as the TCP server.
pub struct Http3Server {
    store: Arc<dyn BlobStore>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// How long `shutdown` waits for in-flight handlers.
    pub grace: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    endpoint: Mutex<Option<quinn::Endpoint>>,
    local_addr: Mutex<Option<SocketAddr>>,
    started: AtomicBool,
}

impl Http3Server {
    /// Create an HTTP/3 peer server over the given store.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            timeout: crate::peer::DEFAULT_TIMEOUT,
            grace: Duration::from_secs(10),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            endpoint: Mutex::new(None),
            local_addr: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Bind `addr` (UDP) and accept connections in the background.
    pub async fn start(&self, addr: &str) -> anyhow::Result<()> {
        if self.shutdown.is_cancelled() {
            anyhow::bail!("http3 peer server is shut down");
        }
        if self.started.swap(true, Ordering::SeqCst) {
            anyhow::bail!("http3 peer server already started");
        }

        let server_config = tls::server_config()?;
        let endpoint = quinn::Endpoint::server(server_config, addr.parse()?)?;
        let local_addr = endpoint.local_addr()?;
        *self.local_addr.lock().expect("local_addr lock poisoned") = Some(local_addr);
        tracing::info!(addr = %local_addr, "http3 peer server listening");

        let store = self.store.clone();
        let timeout = self.timeout;
        let token = self.shutdown.clone();
        let tracker = self.tracker.clone();
        let accept_endpoint = endpoint.clone();
        *self.endpoint.lock().expect("endpoint lock poisoned") = Some(endpoint);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    incoming = accept_endpoint.accept() => match incoming {
                        Some(incoming) => {
                            let store = store.clone();
                            tracker.spawn(async move {
                                if let Err(e) = handle_connection(incoming, store, timeout).await {
                                    depot_metrics::record_error("transport");
                                    tracing::debug!(error = %e, "http3 connection closed");
                                }
                            });
                        }
                        None => break,
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
        if let Some(endpoint) = self
            .endpoint
            .lock()
            .expect("endpoint lock poisoned")
            .take()
        {
            endpoint.close(0u32.into(), b"shutdown");
        }
        self.tracker.close();
        if tokio::time::timeout(self.grace, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!("http3 server shutdown grace period elapsed with handlers in flight");
        }
        tracing::info!("http3 peer server stopped");
    }
}

async fn handle_connection(
    incoming: quinn::Incoming,
    store: Arc<dyn BlobStore>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let connection = incoming.await?;
    let mut h3_conn =
        h3::server::Connection::new(h3_quinn::Connection::new(connection)).await?;

    loop {
        match h3_conn.accept().await {
            Ok(Some(resolver)) => {
                let store = store.clone();
                tokio::spawn(async move {
                    let result = tokio::time::timeout(
                        timeout,
                        handle_request(resolver, store),
                    )
                    .await;
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            depot_metrics::record_error("transport");
                            tracing::debug!(error = %e, "http3 request failed");
                        }
                        Err(_) => {
                            depot_metrics::record_error("timeout");
                            tracing::debug!("http3 request timed out");
                        }
                    }
                });
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "http3 connection terminated");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_request<T>(
    resolver: h3::server::RequestResolver<T, Bytes>,
    store: Arc<dyn BlobStore>,
) -> Result<(), h3::error::StreamError>
where
    T: h3::quic::Connection<Bytes>,
{
    let (request, mut stream) = resolver.resolve_request().await?;

    // No general routing: the peer protocol has exactly two paths.
    let path = request.uri().path().to_string();
    let (status, body) = if let Some(hash) = path.strip_prefix("/has/") {
        match store.has(hash).await {
            Ok(true) => (StatusCode::OK, None),
            Ok(false) => (StatusCode::NOT_FOUND, None),
            Err(e) => {
                tracing::warn!(hash = %hash, error = %e, "http3 availability check failed");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        }
    } else if let Some(hash) = path.strip_prefix("/get/") {
        match store.get(hash).await {
            Ok(blob) => (StatusCode::OK, Some(blob)),
            Err(e) if e.is_not_found() => (StatusCode::NOT_FOUND, None),
            Err(e) => {
                depot_metrics::record_error(e.kind());
                tracing::warn!(hash = %hash, error = %e, "http3 blob fetch failed");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        }
    } else {
        (StatusCode::NOT_FOUND, None)
    };

    let response = Response::builder()
        .status(status)
        .body(())
        .expect("static response construction");
    stream.send_response(response).await?;
    if let Some(blob) = body {
        let len = blob.len() as u64;
        stream.send_data(blob).await?;
        depot_metrics::SENT_BYTES_UDP.inc_by(len);
    }
    stream.finish().await?;

    Ok(())
}
