//! Cryptographic hash types and utilities.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha384};
use std::fmt;

/// Length of a blob hash in raw bytes (SHA-384).
pub const HASH_LEN: usize = 48;

/// Length of a blob hash rendered as lowercase hex.
pub const HASH_HEX_LEN: usize = 96;

/// A SHA-384 blob hash represented as 48 bytes.
///
/// The canonical wire and storage form is 96 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobHash([u8; HASH_LEN]);

impl BlobHash {
    /// Create a new BlobHash from raw bytes.
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Compute the SHA-384 hash of data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha384::new();
        hasher.update(data);
        let result = hasher.finalize();
        Self(result.into())
    }

    /// Create an incremental hasher.
    pub fn hasher() -> BlobHasher {
        BlobHasher(Sha384::new())
    }

    /// Parse from a 96-character lowercase hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != HASH_HEX_LEN {
            return Err(crate::Error::InvalidHash(format!(
                "expected {} hex chars, got {}",
                HASH_HEX_LEN,
                s.len()
            )));
        }
        if s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(crate::Error::InvalidHash(format!(
                "hash must be lowercase hex: {s}"
            )));
        }
        let mut bytes = [0u8; HASH_LEN];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str =
                std::str::from_utf8(chunk).map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for BlobHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlobHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Incremental SHA-384 hasher.
pub struct BlobHasher(Sha384);

impl BlobHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> BlobHash {
        BlobHash(self.0.finalize().into())
    }
}
