//! HTTP/3 peer protocol integration tests.

use depot_core::BlobHash;
use depot_server::http3::{Http3Client, Http3Server, Http3Store};
use depot_store::{BlobStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;

async fn start_server(store: Arc<dyn BlobStore>) -> (Http3Server, String) {
    let server = Http3Server::new(store);
    server.start("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap().to_string();
    (server, addr)
}

#[tokio::test]
async fn test_get_and_has_roundtrip() {
    let store = Arc::new(MemoryStore::new());
    let data = bytes::Bytes::from_static(b"http3 payload");
    let hash = BlobHash::compute(&data).to_hex();
    store.put(&hash, data.clone()).await.unwrap();

    let (server, addr) = start_server(store).await;

    let sent_before = depot_metrics::SENT_BYTES_UDP.get();

    let mut client = Http3Client::connect(&addr, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(client.has_blob(&hash).await.unwrap());
    assert_eq!(client.get_blob(&hash).await.unwrap(), data);
    client.close().await;

    assert!(depot_metrics::SENT_BYTES_UDP.get() >= sent_before + data.len() as u64);

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_blob_maps_to_not_found() {
    let (server, addr) = start_server(Arc::new(MemoryStore::new())).await;
    let absent = BlobHash::compute(b"absent").to_hex();

    let mut client = Http3Client::connect(&addr, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(!client.has_blob(&absent).await.unwrap());
    assert!(client.get_blob(&absent).await.unwrap_err().is_not_found());
    client.close().await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_http3_store_fetches_remote_blobs() {
    let store = Arc::new(MemoryStore::new());
    let data = bytes::Bytes::from_static(b"remote http3 blob");
    let hash = BlobHash::compute(&data).to_hex();
    store.put(&hash, data.clone()).await.unwrap();

    let (server, addr) = start_server(store).await;

    let remote = Http3Store::new(&addr, Duration::from_secs(5));
    assert!(remote.has(&hash).await.unwrap());
    assert_eq!(remote.get(&hash).await.unwrap(), data);

    let absent = BlobHash::compute(b"absent").to_hex();
    assert!(!remote.has(&absent).await.unwrap());

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_then_start_is_an_error() {
    let (server, _addr) = start_server(Arc::new(MemoryStore::new())).await;
    server.shutdown().await;
    assert!(server.start("127.0.0.1:0").await.is_err());
}
