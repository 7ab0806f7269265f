//! Stream descriptor (SD) blob model.
//!
//! An SD blob is a blob whose decoded JSON payload enumerates the ordered
//! data blobs of a stream. The list terminates in a sentinel entry that
//! carries no hash; the sentinel is never fetched.

use serde::{Deserialize, Serialize};

/// One entry in an SD blob's ordered blob list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlobInfo {
    /// Position of the blob in the stream (0-indexed).
    pub blob_num: u32,
    /// Hex hash of the data blob. Absent or empty on the sentinel entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_hash: Option<String>,
    /// Initialization vector for the blob's encryption, hex-encoded.
    pub iv: String,
    /// Length of the data blob in bytes. Zero on the sentinel entry.
    #[serde(default)]
    pub length: u64,
}

impl BlobInfo {
    /// Whether this entry is the stream-terminating sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.blob_hash.as_deref().is_none_or(str::is_empty)
    }
}

/// Decoded stream descriptor payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SdBlob {
    /// Ordered data blobs, terminated by a sentinel entry.
    pub blobs: Vec<BlobInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_file_name: Option<String>,
}

impl SdBlob {
    /// Decode an SD blob payload.
    ///
    /// Requires a non-empty blob list whose last entry is the sentinel.
    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        let sd: SdBlob = serde_json::from_slice(data)
            .map_err(|e| crate::Error::SdBlobParse(e.to_string()))?;
        match sd.blobs.last() {
            None => {
                return Err(crate::Error::SdBlobParse(
                    "sd blob has an empty blob list".to_string(),
                ));
            }
            Some(last) if !last.is_sentinel() => {
                return Err(crate::Error::SdBlobParse(
                    "sd blob list does not end with a sentinel entry".to_string(),
                ));
            }
            Some(_) => {}
        }
        Ok(sd)
    }

    /// Encode the SD blob payload.
    pub fn to_bytes(&self) -> crate::Result<bytes::Bytes> {
        let data =
            serde_json::to_vec(self).map_err(|e| crate::Error::SdBlobParse(e.to_string()))?;
        Ok(bytes::Bytes::from(data))
    }

    /// Iterate the hex hashes of the stream's data blobs, skipping the sentinel.
    pub fn data_hashes(&self) -> impl Iterator<Item = &str> {
        self.blobs
            .iter()
            .filter(|info| !info.is_sentinel())
            .filter_map(|info| info.blob_hash.as_deref())
    }
}

/// Whether a blob payload decodes as a stream descriptor.
///
/// Used by the uploader to classify blobs: data blobs are ciphertext and
/// never parse as SD JSON.
pub fn is_sd_payload(data: &[u8]) -> bool {
    SdBlob::from_bytes(data).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::BlobHash;

    fn sample_sd() -> SdBlob {
        SdBlob {
            blobs: vec![
                BlobInfo {
                    blob_num: 0,
                    blob_hash: Some(BlobHash::compute(b"first").to_hex()),
                    iv: "00000000000000000000000000000000".to_string(),
                    length: 1024,
                },
                BlobInfo {
                    blob_num: 1,
                    blob_hash: None,
                    iv: "00000000000000000000000000000001".to_string(),
                    length: 0,
                },
            ],
            stream_name: Some("example".to_string()),
            stream_type: Some("lbryfile".to_string()),
            stream_hash: None,
            key: None,
            suggested_file_name: None,
        }
    }

    #[test]
    fn test_roundtrip() {
        let sd = sample_sd();
        let bytes = sd.to_bytes().unwrap();
        let decoded = SdBlob::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.blobs.len(), 2);
        assert_eq!(
            decoded.data_hashes().collect::<Vec<_>>(),
            sd.data_hashes().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_data_hashes_skip_sentinel() {
        let sd = sample_sd();
        let hashes: Vec<_> = sd.data_hashes().collect();
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0], BlobHash::compute(b"first").to_hex());
    }

    #[test]
    fn test_rejects_missing_sentinel() {
        let mut sd = sample_sd();
        sd.blobs.pop();
        let bytes = sd.to_bytes().unwrap();
        assert!(SdBlob::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_rejects_empty_list() {
        let bytes = br#"{"blobs":[]}"#;
        assert!(SdBlob::from_bytes(bytes).is_err());
    }

    #[test]
    fn test_is_sd_payload() {
        let sd = sample_sd().to_bytes().unwrap();
        assert!(is_sd_payload(&sd));
        assert!(!is_sd_payload(b"\x00\x01\x02 opaque ciphertext"));
        assert!(!is_sd_payload(b"{\"unrelated\":true}"));
    }
}
