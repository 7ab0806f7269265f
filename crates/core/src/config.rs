//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host the servers bind to.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Port the TCP peer protocol distributes content from.
    #[serde(default = "default_tcp_peer_port")]
    pub tcp_peer_port: u16,
    /// Port the HTTP/3 peer protocol distributes content from.
    #[serde(default = "default_http3_peer_port")]
    pub http3_peer_port: u16,
    /// Port the reflector receives uploads on.
    #[serde(default = "default_receiver_port")]
    pub receiver_port: u16,
    /// Port the Prometheus metrics endpoint is served on.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Per-request timeout on the upload receive side, in seconds.
    #[serde(default = "default_receiver_timeout_secs")]
    pub receiver_timeout_secs: u64,
    /// Per-request timeout on the peer serving side, in seconds.
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
    /// Grace period for in-flight handlers during shutdown, in seconds.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Disable the upload receiver on this node.
    #[serde(default)]
    pub disable_uploads: bool,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_tcp_peer_port() -> u16 {
    5567
}

fn default_http3_peer_port() -> u16 {
    5568
}

fn default_receiver_port() -> u16 {
    5566
}

fn default_metrics_port() -> u16 {
    2112
}

fn default_receiver_timeout_secs() -> u64 {
    180 // 3 minutes
}

fn default_peer_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            tcp_peer_port: default_tcp_peer_port(),
            http3_peer_port: default_http3_peer_port(),
            receiver_port: default_receiver_port(),
            metrics_port: default_metrics_port(),
            receiver_timeout_secs: default_receiver_timeout_secs(),
            peer_timeout_secs: default_peer_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            disable_uploads: false,
        }
    }
}

impl ServerConfig {
    /// Get the receiver timeout as a Duration.
    pub fn receiver_timeout(&self) -> Duration {
        Duration::from_secs(self.receiver_timeout_secs)
    }

    /// Get the peer timeout as a Duration.
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    /// Get the shutdown grace period as a Duration.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Bind address for the TCP peer server.
    pub fn tcp_peer_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.tcp_peer_port)
    }

    /// Bind address for the HTTP/3 peer server.
    pub fn http3_peer_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.http3_peer_port)
    }

    /// Bind address for the reflector receiver.
    pub fn receiver_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.receiver_port)
    }

    /// Bind address for the metrics endpoint.
    pub fn metrics_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.metrics_port)
    }
}

/// Origin storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local disk storage, sharded by hash prefix.
    Disk {
        /// Root directory for blobs.
        path: PathBuf,
        /// Shard files into subdirectories keyed by the first N hash
        /// characters. 0 disables sharding.
        #[serde(default = "default_prefix_length")]
        prefix_length: usize,
    },
    /// In-process memory storage (testing and small nodes).
    Memory,
}

fn default_prefix_length() -> usize {
    2
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Disk {
            path: PathBuf::from("./data/blobs"),
            prefix_length: default_prefix_length(),
        }
    }
}

/// Blob index database configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Whether the node keeps a blob index (required for uploads and the
    /// blocklist).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// SQLite database file path.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    /// Update `last_accessed` on reads.
    #[serde(default = "default_true")]
    pub track_access: bool,
}

fn default_true() -> bool {
    true
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index.db")
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_index_path(),
            track_access: true,
        }
    }
}

/// Bound for an LRU caching tier. Exactly one of the two limits must be set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheLimit {
    /// Maximum number of cached blobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_blobs: Option<u64>,
    /// Maximum total cached bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,
}

impl CacheLimit {
    /// Validate that exactly one bound is configured.
    pub fn validate(&self) -> Result<(), String> {
        match (self.max_blobs, self.max_bytes) {
            (Some(0), _) | (_, Some(0)) => Err("cache limit must be greater than 0".to_string()),
            (Some(_), None) | (None, Some(_)) => Ok(()),
            (Some(_), Some(_)) => {
                Err("cache limit must set max_blobs or max_bytes, not both".to_string())
            }
            (None, None) => Err("cache limit must set max_blobs or max_bytes".to_string()),
        }
    }
}

/// Disk caching tier configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskCacheConfig {
    /// Directory the cache tier stores blobs in.
    pub path: PathBuf,
    /// Hash-prefix sharding depth for the cache directory.
    #[serde(default = "default_prefix_length")]
    pub prefix_length: usize,
    /// Eviction bound.
    #[serde(flatten)]
    pub limit: CacheLimit,
}

/// Memory caching tier configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    /// Eviction bound.
    #[serde(flatten)]
    pub limit: CacheLimit,
}

/// Cache tier stack configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Optional disk LRU tier between the origin and memory tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskCacheConfig>,
    /// Optional in-memory LRU tier (outermost).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryCacheConfig>,
}

impl CacheConfig {
    /// Validate cache tier bounds.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(disk) = &self.disk {
            disk.limit.validate().map_err(|e| format!("cache.disk: {e}"))?;
        }
        if let Some(memory) = &self.memory {
            memory
                .limit
                .validate()
                .map_err(|e| format!("cache.memory: {e}"))?;
        }
        Ok(())
    }
}

/// Protocol used to reach an upstream node.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamProtocol {
    Tcp,
    Http3,
}

/// Upstream proxy configuration: fetch blobs from another node instead of a
/// local origin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Address of the upstream node, `host:port`.
    pub address: String,
    /// Protocol used to fetch blobs.
    #[serde(default = "default_upstream_protocol")]
    pub protocol: UpstreamProtocol,
    /// Per-call timeout in seconds.
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_upstream_protocol() -> UpstreamProtocol {
    UpstreamProtocol::Http3
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

impl UpstreamConfig {
    /// Get the per-call timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Blocklist refresh configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlocklistConfig {
    /// Enable periodic blocklist refresh from the external feed.
    /// Existing entries are honored even when disabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// URL of the blocklist feed (JSON array of `{hash, reason}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
    /// Seconds between refreshes.
    #[serde(default = "default_blocklist_refresh_secs")]
    pub refresh_interval_secs: u64,
}

fn default_blocklist_refresh_secs() -> u64 {
    3600 // 1 hour
}

impl Default for BlocklistConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            feed_url: None,
            refresh_interval_secs: default_blocklist_refresh_secs(),
        }
    }
}

impl BlocklistConfig {
    /// Get the refresh interval as a Duration.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Origin storage backend.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Blob index database.
    #[serde(default)]
    pub index: IndexConfig,
    /// Caching tiers in front of the origin.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Optional upstream node to proxy blobs from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamConfig>,
    /// Blocklist refresh.
    #[serde(default)]
    pub blocklist: BlocklistConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            index: IndexConfig::default(),
            cache: CacheConfig::default(),
            upstream: None,
            blocklist: BlocklistConfig::default(),
        }
    }
}

impl AppConfig {
    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        self.cache.validate()?;
        if let Some(upstream) = &self.upstream {
            if upstream.address.is_empty() {
                return Err("upstream.address must not be empty".to_string());
            }
            if upstream.timeout_secs == 0 {
                return Err("upstream.timeout_secs must be greater than 0".to_string());
            }
        }
        if self.blocklist.enabled
            && self.blocklist.feed_url.is_some()
            && self.blocklist.refresh_interval_secs == 0
        {
            return Err("blocklist.refresh_interval_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.tcp_peer_port, 5567);
        assert_eq!(config.http3_peer_port, 5568);
        assert_eq!(config.receiver_port, 5566);
        assert_eq!(config.metrics_port, 2112);
        assert_eq!(config.receiver_timeout(), Duration::from_secs(180));
    }

    #[test]
    fn test_cache_limit_requires_exactly_one_bound() {
        let neither = CacheLimit {
            max_blobs: None,
            max_bytes: None,
        };
        assert!(neither.validate().is_err());

        let both = CacheLimit {
            max_blobs: Some(10),
            max_bytes: Some(1024),
        };
        assert!(both.validate().is_err());

        let blobs = CacheLimit {
            max_blobs: Some(10),
            max_bytes: None,
        };
        assert!(blobs.validate().is_ok());

        let zero = CacheLimit {
            max_blobs: Some(0),
            max_bytes: None,
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_app_config_deserialize_minimal() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert!(config.index.enabled);
        assert!(config.blocklist.enabled);
        assert!(config.upstream.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_upstream_protocol_lowercase() {
        let upstream: UpstreamConfig =
            serde_json::from_str(r#"{"address":"other:5568","protocol":"tcp"}"#).unwrap();
        assert_eq!(upstream.protocol, UpstreamProtocol::Tcp);
        assert_eq!(upstream.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_disk_cache_limit_flattened() {
        let disk: DiskCacheConfig =
            serde_json::from_str(r#"{"path":"/tmp/cache","max_blobs":500}"#).unwrap();
        assert_eq!(disk.limit.max_blobs, Some(500));
        assert_eq!(disk.prefix_length, 2);
        disk.limit.validate().unwrap();
    }
}
