//! The `0x02 BINARY_UPLOAD` payload format (spec §6): `[16-byte upload
//! UUID][8-byte big-endian offset][chunk bytes]`.

use loom_core::errors::{WireError, WireErrorKind};

const HEADER_LEN: usize = 16 + 8;

/// One parsed upload chunk frame.
pub struct UploadChunkFrame<'a> {
    /// The upload this chunk belongs to, as raw UUID bytes.
    pub upload_id: [u8; 16],
    /// Byte offset of `bytes` within the file being uploaded.
    pub offset: u64,
    /// The chunk's payload bytes.
    pub bytes: &'a [u8],
}

/// Parse a `0x02` frame payload (the bytes after the format byte) into its
/// upload id, offset, and chunk bytes.
pub fn parse_chunk(payload: &[u8]) -> Result<UploadChunkFrame<'_>, WireError> {
    if payload.len() < HEADER_LEN {
        return Err(WireError::new(WireErrorKind::MalformedFrame, "upload chunk shorter than its header"));
    }
    let mut upload_id = [0u8; 16];
    upload_id.copy_from_slice(&payload[0..16]);
    let offset = u64::from_be_bytes(payload[16..24].try_into().expect("slice is exactly 8 bytes"));
    Ok(UploadChunkFrame { upload_id, offset, bytes: &payload[HEADER_LEN..] })
}

/// Build a `0x02` frame payload from an upload id, offset, and chunk bytes.
#[must_use]
pub fn encode_chunk(upload_id: [u8; 16], offset: u64, bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + bytes.len());
    out.extend_from_slice(&upload_id);
    out.extend_from_slice(&offset.to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_chunk_header_and_bytes() {
        let upload_id = [7u8; 16];
        let payload = encode_chunk(upload_id, 524_288, b"chunk bytes");
        let parsed = parse_chunk(&payload).unwrap();
        assert_eq!(parsed.upload_id, upload_id);
        assert_eq!(parsed.offset, 524_288);
        assert_eq!(parsed.bytes, b"chunk bytes");
    }

    #[test]
    fn empty_chunk_bytes_are_allowed() {
        let payload = encode_chunk([0u8; 16], 0, &[]);
        let parsed = parse_chunk(&payload).unwrap();
        assert!(parsed.bytes.is_empty());
    }

    #[test]
    fn payload_shorter_than_header_is_malformed() {
        let err = parse_chunk(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.code, "MALFORMED_FRAME");
    }
}
