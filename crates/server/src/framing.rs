//! Streaming JSON framing shared by the TCP peer and reflector protocols.
//!
//! Messages are not length-prefixed: the peer streams raw JSON and the
//! reader must consume exactly one complete top-level value, leaving any
//! following bytes (a raw blob body) in the buffer.

use bytes::{Buf, Bytes, BytesMut};
use depot_store::{StoreError, StoreResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single JSON message. Blob bodies are read separately
/// and bounded by the declared size.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Read one complete top-level JSON value from `reader`, buffering into
/// `buf`. Bytes past the value stay in `buf` for the caller.
///
/// Returns `Ok(None)` on a clean EOF at a message boundary.
pub async fn read_json<R, T>(reader: &mut R, buf: &mut BytesMut) -> StoreResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    loop {
        if !buf.is_empty() {
            let mut stream = serde_json::Deserializer::from_slice(&buf[..]).into_iter::<T>();
            match stream.next() {
                Some(Ok(value)) => {
                    let consumed = stream.byte_offset();
                    buf.advance(consumed);
                    return Ok(Some(value));
                }
                // An incomplete value; keep reading.
                Some(Err(e)) if e.is_eof() => {}
                Some(Err(e)) => {
                    return Err(StoreError::Protocol(format!("malformed message: {e}")));
                }
                None => {}
            }
            if buf.len() > MAX_MESSAGE_SIZE {
                return Err(StoreError::Protocol(format!(
                    "message exceeds {MAX_MESSAGE_SIZE} bytes"
                )));
            }
        }

        let n = reader.read_buf(buf).await?;
        if n == 0 {
            if buf.iter().all(u8::is_ascii_whitespace) {
                return Ok(None);
            }
            return Err(StoreError::Protocol(
                "connection closed mid-message".to_string(),
            ));
        }
    }
}

/// Read exactly `len` raw body bytes, consuming any bytes already buffered
/// past the preceding JSON message.
pub async fn read_body<R>(reader: &mut R, buf: &mut BytesMut, len: usize) -> StoreResult<Bytes>
where
    R: AsyncRead + Unpin,
{
    while buf.len() < len {
        let n = reader.read_buf(buf).await?;
        if n == 0 {
            return Err(StoreError::Protocol(
                "connection closed mid-body".to_string(),
            ));
        }
    }
    Ok(buf.split_to(len).freeze())
}

/// Serialize one JSON message to the writer.
pub async fn write_json<W, T>(writer: &mut W, message: &T) -> StoreResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = serde_json::to_vec(message)
        .map_err(|e| StoreError::Protocol(format!("failed to encode message: {e}")))?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Msg {
        value: u32,
    }

    #[tokio::test]
    async fn test_reads_value_split_across_reads() {
        let (client, mut server) = tokio::io::duplex(64);
        let (mut read_half, _write_half) = tokio::io::split(client);

        use tokio::io::AsyncWriteExt;
        server.write_all(b"{\"val").await.unwrap();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            server.write_all(b"ue\":7}").await.unwrap();
            server
        });

        let mut buf = BytesMut::new();
        let msg: Option<Msg> = read_json(&mut read_half, &mut buf).await.unwrap();
        assert_eq!(msg, Some(Msg { value: 7 }));
        assert!(buf.is_empty());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_trailing_bytes_stay_buffered() {
        let (client, mut server) = tokio::io::duplex(64);
        let (mut read_half, _write_half) = tokio::io::split(client);

        use tokio::io::AsyncWriteExt;
        server.write_all(b"{\"value\":1}rawbody").await.unwrap();

        let mut buf = BytesMut::new();
        let msg: Option<Msg> = read_json(&mut read_half, &mut buf).await.unwrap();
        assert_eq!(msg, Some(Msg { value: 1 }));

        let body = read_body(&mut read_half, &mut buf, 7).await.unwrap();
        assert_eq!(&body[..], b"rawbody");
    }

    #[tokio::test]
    async fn test_clean_eof_returns_none() {
        let (client, server) = tokio::io::duplex(64);
        let (mut read_half, _write_half) = tokio::io::split(client);
        drop(server);

        let mut buf = BytesMut::new();
        let msg: Option<Msg> = read_json(&mut read_half, &mut buf).await.unwrap();
        assert!(msg.is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_message_is_protocol_error() {
        let (client, mut server) = tokio::io::duplex(64);
        let (mut read_half, _write_half) = tokio::io::split(client);

        use tokio::io::AsyncWriteExt;
        server.write_all(b"{\"value\":").await.unwrap();
        drop(server);

        let mut buf = BytesMut::new();
        let err = read_json::<_, Msg>(&mut read_half, &mut buf)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_malformed_json_is_protocol_error() {
        let (client, mut server) = tokio::io::duplex(64);
        let (mut read_half, _write_half) = tokio::io::split(client);

        use tokio::io::AsyncWriteExt;
        server.write_all(b"not json at all").await.unwrap();

        let mut buf = BytesMut::new();
        let err = read_json::<_, Msg>(&mut read_half, &mut buf)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Protocol(_)));
    }
}
