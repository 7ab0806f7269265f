//! TCP peer protocol client.

use super::{AvailabilityRequest, AvailabilityResponse, BlobRequest, BlobResponse, ERR_BLOB_NOT_FOUND};
use crate::framing;
use bytes::{Bytes, BytesMut};
use depot_store::{StoreError, StoreResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::net::TcpStream;

/// A client connected to a TCP peer. Requests are issued sequentially on
/// one keep-alive connection.
pub struct PeerClient {
    stream: TcpStream,
    buf: BytesMut,
    timeout: Duration,
}

impl PeerClient {
    /// Connect to a peer at `addr`.
    pub async fn connect(addr: &str, timeout: Duration) -> StoreResult<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| StoreError::Transport(format!("connect to {addr} timed out")))?
            .map_err(|e| StoreError::Transport(format!("connection error: {e}")))?;
        Ok(Self {
            stream,
            buf: BytesMut::new(),
            timeout,
        })
    }

    async fn round_trip<Req, Resp>(&mut self, request: &Req) -> StoreResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        framing::write_json(&mut self.stream, request).await?;
        let response = tokio::time::timeout(
            self.timeout,
            framing::read_json::<_, Resp>(&mut self.stream, &mut self.buf),
        )
        .await
        .map_err(|_| StoreError::Transport("response timed out".to_string()))??;
        response.ok_or_else(|| StoreError::Transport("peer closed the connection".to_string()))
    }

    /// Ask the peer whether it has a blob.
    pub async fn has_blob(&mut self, hash: &str) -> StoreResult<bool> {
        let request = AvailabilityRequest {
            requested_blobs: vec![hash.to_string()],
        };
        let response: AvailabilityResponse = self.round_trip(&request).await?;
        Ok(response.available_blobs.iter().any(|h| h == hash))
    }

    /// Download a blob from the peer. The body is verified against the
    /// requested hash.
    pub async fn get_blob(&mut self, hash: &str) -> StoreResult<Bytes> {
        let request = BlobRequest {
            requested_blob: hash.to_string(),
        };
        let response: BlobResponse = self.round_trip(&request).await?;

        if let Some(error) = response.incoming_blob.error {
            if error == ERR_BLOB_NOT_FOUND {
                return Err(StoreError::NotFound);
            }
            return Err(StoreError::Transport(format!("peer error: {error}")));
        }

        let length = response
            .incoming_blob
            .length
            .ok_or_else(|| StoreError::Protocol("blob response missing length".to_string()))?;
        if length as usize > depot_core::MAX_BLOB_SIZE {
            return Err(StoreError::Protocol(format!(
                "peer declared oversized blob: {length} bytes"
            )));
        }

        let body = tokio::time::timeout(
            self.timeout,
            framing::read_body(&mut self.stream, &mut self.buf, length as usize),
        )
        .await
        .map_err(|_| StoreError::Transport("blob body timed out".to_string()))??;

        depot_core::verify_named(hash, &body)?;
        Ok(body)
    }
}
