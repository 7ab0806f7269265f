//! HTTP/3 peer protocol client.

use super::tls;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use depot_store::{StoreError, StoreResult};
use http::{Request, StatusCode};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;

fn transport(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Transport(format!("{context}: {e}"))
}

/// A client connected to an HTTP/3 peer.
pub struct Http3Client {
    endpoint: quinn::Endpoint,
    send_request: h3::client::SendRequest<h3_quinn::OpenStreams, Bytes>,
    driver: JoinHandle<()>,
    authority: String,
    timeout: Duration,
}

impl Http3Client {
    /// Connect to a peer at `addr` (`host:port`).
    pub async fn connect(addr: &str, timeout: Duration) -> StoreResult<Self> {
        let remote: SocketAddr = tokio::net::lookup_host(addr)
            .await
            .map_err(|e| transport("address lookup failed", e))?
            .next()
            .ok_or_else(|| StoreError::Transport(format!("no address for {addr}")))?;

        let bind: SocketAddr = if remote.is_ipv6() {
            "[::]:0".parse().expect("static addr")
        } else {
            "0.0.0.0:0".parse().expect("static addr")
        };
        let mut endpoint =
            quinn::Endpoint::client(bind).map_err(|e| transport("endpoint setup failed", e))?;
        endpoint.set_default_client_config(
            tls::client_config().map_err(|e| transport("tls setup failed", e))?,
        );

        // Peers present self-signed certs; the server name is not verified.
        let connecting = endpoint
            .connect(remote, "localhost")
            .map_err(|e| transport("connect failed", e))?;
        let connection = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| StoreError::Transport(format!("connect to {addr} timed out")))?
            .map_err(|e| transport("connection error", e))?;

        let (mut driver, send_request) =
            h3::client::new(h3_quinn::Connection::new(connection))
                .await
                .map_err(|e| transport("h3 handshake failed", e))?;
        let driver = tokio::spawn(async move {
            let _ = std::future::poll_fn(|cx| driver.poll_close(cx)).await;
        });

        Ok(Self {
            endpoint,
            send_request,
            driver,
            authority: addr.to_string(),
            timeout,
        })
    }

    async fn request(&mut self, path: &str) -> StoreResult<(StatusCode, Bytes)> {
        let uri = format!("https://{}{}", self.authority, path);
        let request = Request::get(uri)
            .body(())
            .map_err(|e| StoreError::Protocol(format!("invalid request: {e}")))?;

        let response = tokio::time::timeout(self.timeout, async {
            let mut stream = self
                .send_request
                .send_request(request)
                .await
                .map_err(|e| transport("request failed", e))?;
            stream
                .finish()
                .await
                .map_err(|e| transport("request finish failed", e))?;

            let response = stream
                .recv_response()
                .await
                .map_err(|e| transport("response failed", e))?;
            let status = response.status();

            let mut body = BytesMut::new();
            while let Some(chunk) = stream
                .recv_data()
                .await
                .map_err(|e| transport("body read failed", e))?
            {
                if body.len() + chunk.remaining() > depot_core::MAX_BLOB_SIZE {
                    return Err(StoreError::Protocol("response body too large".to_string()));
                }
                body.put(chunk);
            }

            Ok((status, body.freeze()))
        })
        .await
        .map_err(|_| StoreError::Transport("request timed out".to_string()))??;

        Ok(response)
    }

    /// Ask the peer whether it has a blob.
    pub async fn has_blob(&mut self, hash: &str) -> StoreResult<bool> {
        let (status, _body) = self.request(&format!("/has/{hash}")).await?;
        match status {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(StoreError::Transport(format!(
                "unexpected status {other} from peer"
            ))),
        }
    }

    /// Download a blob from the peer. The body is verified against the
    /// requested hash.
    pub async fn get_blob(&mut self, hash: &str) -> StoreResult<Bytes> {
        let (status, body) = self.request(&format!("/get/{hash}")).await?;
        match status {
            StatusCode::OK => {
                depot_core::verify_named(hash, &body)?;
                Ok(body)
            }
            StatusCode::NOT_FOUND => Err(StoreError::NotFound),
            other => Err(StoreError::Transport(format!(
                "unexpected status {other} from peer"
            ))),
        }
    }

    /// Close the connection.
    pub async fn close(self) {
        drop(self.send_request);
        self.endpoint.close(0u32.into(), b"done");
        self.driver.abort();
    }
}
