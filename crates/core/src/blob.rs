//! Blob types and verification.

use crate::hash::BlobHash;
use bytes::Bytes;
use std::fmt;

/// A blob with its content hash.
#[derive(Clone)]
pub struct Blob {
    /// The blob hash (computed from data).
    pub hash: BlobHash,
    /// The blob data.
    pub data: Bytes,
}

impl Blob {
    /// Create a new blob from data, computing the hash.
    ///
    /// Fails if the data exceeds [`crate::MAX_BLOB_SIZE`].
    pub fn new(data: Bytes) -> crate::Result<Self> {
        if data.len() > crate::MAX_BLOB_SIZE {
            return Err(crate::Error::BlobTooLarge {
                size: data.len(),
                max: crate::MAX_BLOB_SIZE,
            });
        }
        let hash = BlobHash::compute(&data);
        Ok(Self { hash, data })
    }

    /// Verify that the data matches the expected hash.
    pub fn verify(&self, expected: &BlobHash) -> crate::Result<()> {
        if &self.hash != expected {
            return Err(crate::Error::HashMismatch {
                expected: expected.to_hex(),
                actual: self.hash.to_hex(),
            });
        }
        Ok(())
    }

    /// Get the blob size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("hash", &self.hash)
            .field("size", &self.data.len())
            .finish()
    }
}

/// Verify that `data` hashes to the hex hash `name`.
///
/// This is the put-side invariant every persisting store enforces: a store
/// must refuse a put whose computed hash disagrees with the supplied name.
pub fn verify_named(name: &str, data: &[u8]) -> crate::Result<()> {
    if data.len() > crate::MAX_BLOB_SIZE {
        return Err(crate::Error::BlobTooLarge {
            size: data.len(),
            max: crate::MAX_BLOB_SIZE,
        });
    }
    let expected = BlobHash::from_hex(name)?;
    let actual = BlobHash::compute(data);
    if actual != expected {
        return Err(crate::Error::HashMismatch {
            expected: expected.to_hex(),
            actual: actual.to_hex(),
        });
    }
    Ok(())
}
