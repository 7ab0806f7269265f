//! Blob index trait and SQLite implementation.

use crate::error::IndexResult;
use crate::models::{BlobRow, BlockedEntry};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Narrow index capability consumed by the store layer.
///
/// Records which blobs the origin holds, their size and stream-descriptor
/// tag, access times, and the blocklist.
#[async_trait]
pub trait BlobIndex: Send + Sync {
    /// Whether the origin holds this blob.
    async fn has_blob(&self, hash: &str) -> IndexResult<bool>;

    /// Which of the given hashes the origin holds, in a single query.
    ///
    /// Used by the uploader to filter already-present blobs in batches.
    async fn has_blobs(&self, hashes: &[String]) -> IndexResult<HashSet<String>>;

    /// Record a blob as present in the origin. Idempotent; re-adding keeps
    /// the stream-descriptor tag sticky.
    async fn add_blob(&self, hash: &str, size: u64, is_sd: bool) -> IndexResult<()>;

    /// Fetch the index row for a blob.
    async fn get_blob(&self, hash: &str) -> IndexResult<Option<BlobRow>>;

    /// Update the last-accessed time.
    async fn touch_blob(&self, hash: &str, accessed_at: OffsetDateTime) -> IndexResult<()>;

    /// Remove the index row. Removing an absent row is a success.
    async fn delete_blob(&self, hash: &str) -> IndexResult<()>;

    /// Whether the hash is on the blocklist.
    async fn is_blocked(&self, hash: &str) -> IndexResult<bool>;

    /// Add a single blocklist entry.
    async fn block(&self, hash: &str, reason: &str) -> IndexResult<()>;

    /// Merge feed entries into the blocklist. Additive: refresh never
    /// removes entries.
    async fn refresh_blocklist(&self, entries: &[BlockedEntry]) -> IndexResult<()>;

    /// Run database migrations.
    async fn migrate(&self) -> IndexResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> IndexResult<()>;
}

/// SQLite-based blob index.
pub struct SqliteIndex {
    pool: Pool<Sqlite>,
}

impl SqliteIndex {
    /// Open (or create) a SQLite index at the given path.
    pub async fn new(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under server concurrency.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let index = Self { pool };
        index.migrate().await?;
        Ok(index)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl BlobIndex for SqliteIndex {
    async fn has_blob(&self, hash: &str) -> IndexResult<bool> {
        let present: Option<bool> =
            sqlx::query_scalar("SELECT present FROM blobs WHERE hash = ?")
                .bind(hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(present.unwrap_or(false))
    }

    async fn has_blobs(&self, hashes: &[String]) -> IndexResult<HashSet<String>> {
        if hashes.is_empty() {
            return Ok(HashSet::new());
        }

        // SQLite has a limit of ~999 parameters, so batch if needed.
        const BATCH_SIZE: usize = 900;
        let mut result = HashSet::with_capacity(hashes.len());

        for batch in hashes.chunks(BATCH_SIZE) {
            let placeholders: Vec<&str> = batch.iter().map(|_| "?").collect();
            let query = format!(
                "SELECT hash FROM blobs WHERE present = 1 AND hash IN ({})",
                placeholders.join(", ")
            );

            let mut query_builder = sqlx::query_scalar::<_, String>(&query);
            for hash in batch {
                query_builder = query_builder.bind(hash);
            }

            let found = query_builder.fetch_all(&self.pool).await?;
            result.extend(found);
        }

        Ok(result)
    }

    async fn add_blob(&self, hash: &str, size: u64, is_sd: bool) -> IndexResult<()> {
        sqlx::query(
            r#"
            INSERT INTO blobs (hash, is_sd, size_bytes, last_accessed_at, present, created_at)
            VALUES (?, ?, ?, NULL, 1, ?)
            ON CONFLICT(hash) DO UPDATE SET
                is_sd = (blobs.is_sd OR excluded.is_sd),
                size_bytes = excluded.size_bytes,
                present = 1
            "#,
        )
        .bind(hash)
        .bind(is_sd)
        .bind(size as i64)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_blob(&self, hash: &str) -> IndexResult<Option<BlobRow>> {
        let row = sqlx::query_as::<_, BlobRow>("SELECT * FROM blobs WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn touch_blob(&self, hash: &str, accessed_at: OffsetDateTime) -> IndexResult<()> {
        sqlx::query("UPDATE blobs SET last_accessed_at = ? WHERE hash = ?")
            .bind(accessed_at)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_blob(&self, hash: &str) -> IndexResult<()> {
        sqlx::query("DELETE FROM blobs WHERE hash = ?")
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn is_blocked(&self, hash: &str) -> IndexResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM blocked WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn block(&self, hash: &str, reason: &str) -> IndexResult<()> {
        sqlx::query(
            "INSERT INTO blocked (hash, reason, blocked_at) VALUES (?, ?, ?)
             ON CONFLICT(hash) DO NOTHING",
        )
        .bind(hash)
        .bind(reason)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn refresh_blocklist(&self, entries: &[BlockedEntry]) -> IndexResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let now = OffsetDateTime::now_utc();
        for entry in entries {
            sqlx::query(
                "INSERT INTO blocked (hash, reason, blocked_at) VALUES (?, ?, ?)
                 ON CONFLICT(hash) DO NOTHING",
            )
            .bind(&entry.hash)
            .bind(&entry.reason)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn migrate(&self) -> IndexResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                hash TEXT PRIMARY KEY,
                is_sd INTEGER NOT NULL DEFAULT 0,
                size_bytes INTEGER NOT NULL,
                last_accessed_at TEXT,
                present INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blocked (
                hash TEXT PRIMARY KEY,
                reason TEXT NOT NULL DEFAULT '',
                blocked_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_blobs_last_accessed ON blobs(last_accessed_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn health_check(&self) -> IndexResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
