//! Blob store error types.

use thiserror::Error;

/// Blob store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The blob is not in this store. Recoverable by falling back to a
    /// lower tier.
    #[error("blob not found")]
    NotFound,

    /// The hash is blocklisted. Terminal for the request.
    #[error("blob is blocked")]
    Blocked,

    /// Computed hash differs from the declared name.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// The blob or its name is malformed (bad hex, oversized payload).
    #[error("invalid blob: {0}")]
    InvalidBlob(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network failure reaching a remote tier.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed frame or unexpected message on a peer protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("index error: {0}")]
    Index(#[from] depot_index::IndexError),
}

impl StoreError {
    /// Whether this error means the blob is absent from the store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    /// Short label for error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound => "not_found",
            StoreError::Blocked => "blocked",
            StoreError::HashMismatch { .. } => "hash_mismatch",
            StoreError::InvalidBlob(_) => "invalid_blob",
            StoreError::Io(_) => "io",
            StoreError::Transport(_) => "transport",
            StoreError::Protocol(_) => "protocol",
            StoreError::Index(_) => "index",
        }
    }

    /// Structural copy handed to coalesced single-flight waiters.
    ///
    /// Matchable variants are preserved exactly; carrier errors that do not
    /// implement `Clone` collapse into `Transport`.
    pub fn duplicate(&self) -> StoreError {
        match self {
            StoreError::NotFound => StoreError::NotFound,
            StoreError::Blocked => StoreError::Blocked,
            StoreError::HashMismatch { expected, actual } => StoreError::HashMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            },
            StoreError::InvalidBlob(msg) => StoreError::InvalidBlob(msg.clone()),
            StoreError::Io(e) => StoreError::Transport(e.to_string()),
            StoreError::Transport(msg) => StoreError::Transport(msg.clone()),
            StoreError::Protocol(msg) => StoreError::Protocol(msg.clone()),
            StoreError::Index(e) => StoreError::Transport(e.to_string()),
        }
    }
}

impl From<depot_core::Error> for StoreError {
    fn from(err: depot_core::Error) -> Self {
        match err {
            depot_core::Error::HashMismatch { expected, actual } => {
                StoreError::HashMismatch { expected, actual }
            }
            other => StoreError::InvalidBlob(other.to_string()),
        }
    }
}

/// Result type for blob store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_preserves_matchable_variants() {
        assert!(StoreError::NotFound.duplicate().is_not_found());
        assert!(matches!(StoreError::Blocked.duplicate(), StoreError::Blocked));

        let io = StoreError::Io(std::io::Error::other("boom"));
        assert!(matches!(io.duplicate(), StoreError::Transport(_)));
    }

    #[test]
    fn test_core_error_conversion() {
        let err: StoreError = depot_core::Error::HashMismatch {
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        }
        .into();
        assert!(matches!(err, StoreError::HashMismatch { .. }));

        let err: StoreError = depot_core::Error::InvalidHash("nope".to_string()).into();
        assert!(matches!(err, StoreError::InvalidBlob(_)));
    }
}
