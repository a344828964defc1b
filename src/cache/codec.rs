//! Value encoding for the distributed tier.
//!
//! Values are JSON-encoded; payloads at or above the compression threshold
//! are gzip-compressed. The `compressed` flag travels in the metadata
//! sidecar. When the sidecar is missing the gzip magic bytes decide.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use thiserror::Error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),
}

/// An encoded payload ready for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub compressed: bool,
    /// Size of the JSON payload before compression.
    pub original_size: usize,
}

/// Encode `value`, compressing when enabled and the JSON is at least
/// `threshold` bytes.
pub fn encode<T: Serialize + ?Sized>(
    value: &T,
    compression_enabled: bool,
    threshold: usize,
) -> Result<Encoded, CodecError> {
    let json = serde_json::to_vec(value)?;
    let original_size = json.len();

    if !compression_enabled || original_size < threshold {
        return Ok(Encoded {
            bytes: json,
            compressed: false,
            original_size,
        });
    }

    let mut encoder = GzEncoder::new(Vec::with_capacity(original_size / 2), Compression::default());
    encoder.write_all(&json)?;
    let bytes = encoder.finish()?;

    tracing::trace!(
        original_size,
        compressed_size = bytes.len(),
        "Compressed cache payload"
    );

    Ok(Encoded {
        bytes,
        compressed: true,
        original_size,
    })
}

/// Decode a stored payload. `compressed` comes from metadata when present.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], compressed: Option<bool>) -> Result<T, CodecError> {
    let compressed = compressed.unwrap_or_else(|| bytes.starts_with(&GZIP_MAGIC));
    if !compressed {
        return Ok(serde_json::from_slice(bytes)?);
    }

    let mut json = Vec::with_capacity(bytes.len() * 2);
    GzDecoder::new(bytes).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn large_report() -> Value {
        let rows: Vec<Value> = (0..200)
            .map(|i| json!({"process": format!("830.{i:03}/2024"), "status": "active"}))
            .collect();
        json!({ "agency": "ANM", "rows": rows })
    }

    #[test]
    fn test_large_payload_is_compressed() {
        let value = large_report();
        let encoded = encode(&value, true, 1024).unwrap();

        assert!(encoded.compressed);
        assert!(encoded.bytes.starts_with(&GZIP_MAGIC));
        assert!(encoded.bytes.len() < encoded.original_size);

        let decoded: Value = decode(&encoded.bytes, Some(true)).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_small_or_disabled_stays_plain() {
        let small = encode(&json!({"status": "ok"}), true, 1024).unwrap();
        assert!(!small.compressed);
        assert_eq!(small.bytes, br#"{"status":"ok"}"#);

        let disabled = encode(&large_report(), false, 1024).unwrap();
        assert!(!disabled.compressed);
    }

    #[test]
    fn test_decode_detects_gzip_without_metadata() {
        let value = large_report();
        let encoded = encode(&value, true, 16).unwrap();
        let decoded: Value = decode(&encoded.bytes, None).unwrap();
        assert_eq!(decoded, value);

        let plain: Value = decode(br#"[1,2,3]"#, None).unwrap();
        assert_eq!(plain, json!([1, 2, 3]));
    }

    #[test]
    fn test_corrupt_payload_is_an_error() {
        assert!(decode::<Value>(b"\x1f\x8bgarbage", Some(true)).is_err());
        assert!(decode::<Value>(b"{not json", Some(false)).is_err());
    }
}
