//! Database models mapping to the index schema.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Index record for a blob held by the origin.
#[derive(Debug, Clone, FromRow)]
pub struct BlobRow {
    pub hash: String,
    pub is_sd: bool,
    pub size_bytes: i64,
    /// Updated only on reads when access tracking is enabled.
    pub last_accessed_at: Option<OffsetDateTime>,
    /// `true` implies the origin holds the bytes.
    pub present: bool,
    pub created_at: OffsetDateTime,
}

/// A blocklist entry. Blocked hashes are neither served nor accepted.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct BlockedEntry {
    pub hash: String,
    #[serde(default)]
    pub reason: String,
}
