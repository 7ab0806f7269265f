//! Periodic blocklist refresh from an external feed.

use async_trait::async_trait;
use depot_index::{BlobIndex, BlockedEntry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Source of blocklist entries. The node merges whatever the feed returns;
/// it never removes entries on its own.
#[async_trait]
pub trait BlocklistFeed: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<Vec<BlockedEntry>>;
}

/// Blocklist feed served as a JSON array of `{hash, reason}` objects.
pub struct HttpBlocklistFeed {
    url: String,
    client: reqwest::Client,
}

impl HttpBlocklistFeed {
    /// Create a feed reader for `url`.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl BlocklistFeed for HttpBlocklistFeed {
    async fn fetch(&self) -> anyhow::Result<Vec<BlockedEntry>> {
        let entries = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<BlockedEntry>>()
            .await?;
        Ok(entries)
    }
}

/// Spawn the background task that merges the feed into the index every
/// `interval`, starting immediately. The task exits when `token` is
/// cancelled.
pub fn spawn_refresher(
    feed: Arc<dyn BlocklistFeed>,
    index: Arc<dyn BlobIndex>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match feed.fetch().await {
                        Ok(entries) => {
                            let count = entries.len();
                            if let Err(e) = index.refresh_blocklist(&entries).await {
                                depot_metrics::record_error("blocklist_merge");
                                tracing::warn!(error = %e, "failed to merge blocklist");
                            } else {
                                tracing::debug!(count, "blocklist refreshed");
                            }
                        }
                        Err(e) => {
                            depot_metrics::record_error("blocklist_fetch");
                            tracing::warn!(error = %e, "failed to fetch blocklist feed");
                        }
                    }
                }
            }
        }
        tracing::debug!("blocklist refresher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_index::SqliteIndex;

    struct StaticFeed(Vec<BlockedEntry>);

    #[async_trait]
    impl BlocklistFeed for StaticFeed {
        async fn fetch(&self) -> anyhow::Result<Vec<BlockedEntry>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_refresher_merges_feed() {
        let temp = tempfile::tempdir().unwrap();
        let index: Arc<dyn BlobIndex> = Arc::new(
            SqliteIndex::new(temp.path().join("index.db")).await.unwrap(),
        );
        let feed = Arc::new(StaticFeed(vec![BlockedEntry {
            hash: "deadbeef".to_string(),
            reason: "feed".to_string(),
        }]));

        let token = CancellationToken::new();
        let handle = spawn_refresher(
            feed,
            index.clone(),
            Duration::from_secs(3600),
            token.clone(),
        );

        // The first tick fires immediately.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if index.is_blocked("deadbeef").await.unwrap() {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "blocklist was not refreshed in time"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        token.cancel();
        handle.await.unwrap();
    }
}
