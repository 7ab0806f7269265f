//! Prometheus metrics for the depot node.
//!
//! Exposes counters for uploads, peer traffic, cache effectiveness, and
//! per-kind errors.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! It MUST be network-restricted to authorized scraper IPs at the
//! infrastructure level; do not expose it on public networks.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Metric label: the cache tier's store name ("memory", "disk", ...).
pub const LABEL_CACHE_TYPE: &str = "cache_type";
/// Metric label: which composition the cache belongs to.
pub const LABEL_COMPONENT: &str = "component";
/// Metric label: where the bytes came from ("cache" or "origin").
pub const LABEL_SOURCE: &str = "source";
/// Metric label: error kind.
pub const LABEL_ERROR_TYPE: &str = "error_type";

// Upload metrics
pub static BLOB_UPLOAD_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "reflector_blob_upload_count",
        "Total number of data blobs uploaded to this node",
    )
    .expect("metric creation failed")
});

pub static SD_BLOB_UPLOAD_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "reflector_sd_blob_upload_count",
        "Total number of sd blobs uploaded to this node",
    )
    .expect("metric creation failed")
});

pub static RECEIVED_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "reflector_received_bytes",
        "Total blob bytes received by the upload protocol",
    )
    .expect("metric creation failed")
});

// Peer traffic metrics
pub static SENT_BYTES_TCP: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "reflector_sent_bytes_tcp",
        "Total blob bytes served over the TCP peer protocol",
    )
    .expect("metric creation failed")
});

pub static SENT_BYTES_UDP: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "reflector_sent_bytes_udp",
        "Total blob bytes served over the HTTP/3 peer protocol",
    )
    .expect("metric creation failed")
});

// Cache metrics
pub static CACHE_HIT_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("cache_hit_count", "Total cache hits by tier"),
        &[LABEL_CACHE_TYPE, LABEL_COMPONENT],
    )
    .expect("metric creation failed")
});

pub static CACHE_MISS_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("cache_miss_count", "Total cache misses by tier"),
        &[LABEL_CACHE_TYPE, LABEL_COMPONENT],
    )
    .expect("metric creation failed")
});

pub static CACHE_RETRIEVAL_SPEED: LazyLock<GaugeVec> = LazyLock::new(|| {
    GaugeVec::new(
        Opts::new(
            "cache_retrieval_speed",
            "Most recent blob retrieval speed in MiB/s",
        ),
        &[LABEL_CACHE_TYPE, LABEL_COMPONENT, LABEL_SOURCE],
    )
    .expect("metric creation failed")
});

// Error metrics
pub static ERROR_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("reflector_error_count", "Total errors by kind"),
        &[LABEL_ERROR_TYPE],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent: subsequent calls after the first are no-ops, which allows
/// safe use from integration tests.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(BLOB_UPLOAD_COUNT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SD_BLOB_UPLOAD_COUNT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RECEIVED_BYTES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SENT_BYTES_TCP.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SENT_BYTES_UDP.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_HIT_COUNT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_MISS_COUNT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_RETRIEVAL_SPEED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ERROR_COUNT.clone()))
            .expect("metric registration failed");
    });
}

/// Record a cache hit for a tier within a composition.
pub fn record_cache_hit(cache_type: &str, component: &str) {
    CACHE_HIT_COUNT
        .with_label_values(&[cache_type, component])
        .inc();
}

/// Record a cache miss for a tier within a composition.
pub fn record_cache_miss(cache_type: &str, component: &str) {
    CACHE_MISS_COUNT
        .with_label_values(&[cache_type, component])
        .inc();
}

/// Record the retrieval speed of a blob read, in MiB/s.
pub fn record_retrieval_speed(cache_type: &str, component: &str, source: &str, mib_per_sec: f64) {
    CACHE_RETRIEVAL_SPEED
        .with_label_values(&[cache_type, component, source])
        .set(mib_per_sec);
}

/// Record an error by kind.
pub fn record_error(error_type: &str) {
    ERROR_COUNT.with_label_values(&[error_type]).inc();
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        // This would panic if any metric creation failed.
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_counters_increment() {
        register_metrics();
        let before = SENT_BYTES_TCP.get();
        SENT_BYTES_TCP.inc_by(11);
        assert_eq!(SENT_BYTES_TCP.get(), before + 11);

        record_cache_hit("memory", "peer_server");
        record_cache_miss("memory", "peer_server");
        record_error("transport");
    }
}
