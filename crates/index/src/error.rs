//! Index store error types.

use thiserror::Error;

/// Index store operation errors.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for index operations.
pub type IndexResult<T> = std::result::Result<T, IndexError>;
