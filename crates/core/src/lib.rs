//! Core domain types and shared logic for the depot blob distribution node.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Blob hashes (SHA-384) and verification
//! - Blob and stream-descriptor payloads
//! - Configuration types
//! - Core error types

pub mod blob;
pub mod config;
pub mod error;
pub mod hash;
pub mod sdblob;

pub use blob::{Blob, verify_named};
pub use error::{Error, Result};
pub use hash::{BlobHash, BlobHasher};
pub use sdblob::{BlobInfo, SdBlob, is_sd_payload};

/// Maximum blob size: 2 MiB.
pub const MAX_BLOB_SIZE: usize = 2 * 1024 * 1024;
