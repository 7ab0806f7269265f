//! HTTP server exposing the Prometheus text endpoint.

use axum::Router;
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Serves `GET /metrics` on its own port.
pub struct MetricsServer {
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    started: AtomicBool,
}

impl MetricsServer {
    /// Create a metrics server. Metrics are registered on `start`.
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
            local_addr: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Bind `addr` and serve in the background.
    pub async fn start(&self, addr: &str) -> anyhow::Result<()> {
        if self.shutdown.is_cancelled() {
            anyhow::bail!("metrics server is shut down");
        }
        if self.started.swap(true, Ordering::SeqCst) {
            anyhow::bail!("metrics server already started");
        }

        depot_metrics::register_metrics();

        let router = Router::new().route("/metrics", get(depot_metrics::metrics_handler));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().expect("local_addr lock poisoned") = Some(local_addr);
        tracing::info!(addr = %local_addr, "metrics server listening");

        let token = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned());
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "metrics server failed");
            }
        });
        *self.handle.lock().expect("handle lock poisoned") = Some(handle);

        Ok(())
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("local_addr lock poisoned")
    }

    /// Stop serving and wait for the listener task.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().expect("handle lock poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        tracing::info!("metrics server stopped");
    }
}

impl Default for MetricsServer {
    fn default() -> Self {
        Self::new()
    }
}
