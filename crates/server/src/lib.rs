//! Peer protocol servers, reflector receiver, and uploader for depot.
//!
//! This crate provides:
//! - The TCP peer protocol (server, client, remote store)
//! - The HTTP/3 peer protocol (server, client, remote store)
//! - The reflector upload receiver and the parallel uploader
//! - Blocklist refresh and the metrics endpoint
//! - Store composition wiring from configuration

pub mod blocklist;
pub mod bufpool;
pub mod framing;
pub mod http3;
pub mod metrics_server;
pub mod peer;
pub mod reflector;

pub use blocklist::{BlocklistFeed, HttpBlocklistFeed};
pub use http3::{Http3Client, Http3Server, Http3Store};
pub use metrics_server::MetricsServer;
pub use peer::{PeerClient, PeerServer, PeerStore};
pub use reflector::{ReflectorServer, Uploader};

use depot_core::config::{AppConfig, CacheConfig, CacheLimit, UpstreamProtocol};
use depot_index::BlobIndex;
use depot_store::{BlobStore, CachingStore, DbBackedStore, DiskStore, LruBound, LruStore, MemoryStore};
use std::sync::Arc;

/// Build the node's underlying store from configuration: the origin (local
/// disk/memory, or an upstream peer in proxy mode), wrapped by the
/// db-backed store when the index is enabled.
///
/// The blocklist logic requires the db-backed store to be the outermost
/// layer of the underlying store; caching tiers go on top of the returned
/// store via [`wrap_with_cache`].
pub async fn setup_store(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn BlobStore>, Option<Arc<dyn BlobIndex>>)> {
    let origin: Arc<dyn BlobStore> = match &config.upstream {
        Some(upstream) => match upstream.protocol {
            UpstreamProtocol::Tcp => {
                Arc::new(PeerStore::new(&upstream.address, upstream.timeout()))
            }
            UpstreamProtocol::Http3 => {
                Arc::new(Http3Store::new(&upstream.address, upstream.timeout()))
            }
        },
        None => depot_store::from_config(&config.storage),
    };

    if !config.index.enabled {
        return Ok((origin, None));
    }

    let index = depot_index::from_config(&config.index).await?;
    let store: Arc<dyn BlobStore> = Arc::new(DbBackedStore::new(
        origin,
        index.clone(),
        config.index.track_access,
    ));
    Ok((store, Some(index)))
}

fn lru_bound(limit: &CacheLimit) -> anyhow::Result<LruBound> {
    match (limit.max_blobs, limit.max_bytes) {
        (Some(count), None) => Ok(LruBound::Count(count as usize)),
        (None, Some(bytes)) => Ok(LruBound::Bytes(bytes)),
        _ => anyhow::bail!("cache limit must set exactly one of max_blobs or max_bytes"),
    }
}

/// Wrap the underlying store with the configured caching tiers: an
/// LRU-bounded disk tier first, then an LRU-bounded memory tier outermost.
pub fn wrap_with_cache(
    store: Arc<dyn BlobStore>,
    cache: &CacheConfig,
) -> anyhow::Result<Arc<dyn BlobStore>> {
    let mut wrapped = store;

    if let Some(disk) = &cache.disk {
        wrapped = Arc::new(CachingStore::new(
            "reflector",
            wrapped,
            Arc::new(LruStore::new(
                Arc::new(DiskStore::new(&disk.path, disk.prefix_length)),
                lru_bound(&disk.limit)?,
            )),
        ));
    }

    if let Some(memory) = &cache.memory {
        wrapped = Arc::new(CachingStore::new(
            "reflector",
            wrapped,
            Arc::new(LruStore::new(
                Arc::new(MemoryStore::new()),
                lru_bound(&memory.limit)?,
            )),
        ));
    }

    Ok(wrapped)
}
