//! Gzip compression for the `0x03 COMPRESSED_JSON` frame format.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use loom_core::errors::{WireError, WireErrorKind};

/// Gzip-compress a JSON payload for a `COMPRESSED_JSON` frame.
pub fn compress(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(payload)
        .map_err(|e| WireError::new(WireErrorKind::MalformedFrame, "gzip compression failed").with_source(e))?;
    encoder
        .finish()
        .map_err(|e| WireError::new(WireErrorKind::MalformedFrame, "gzip compression failed").with_source(e))
}

/// Decompress a `COMPRESSED_JSON` frame's payload back to JSON bytes.
pub fn decompress(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut decoder = GzDecoder::new(payload);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| WireError::new(WireErrorKind::MalformedFrame, "gzip decompression failed").with_source(e))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let json = br#"{"type":"event","data":{"hello":"world"}}"#;
        let compressed = compress(json).unwrap();
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, json);
    }

    #[test]
    fn compression_actually_shrinks_repetitive_payloads() {
        let json = serde_json::to_vec(&vec!["repeat me"; 200]).unwrap();
        let compressed = compress(&json).unwrap();
        assert!(compressed.len() < json.len());
    }

    #[test]
    fn garbage_bytes_fail_to_decompress() {
        let err = decompress(&[1, 2, 3, 4]).unwrap_err();
        assert_eq!(err.code, "MALFORMED_FRAME");
    }
}
