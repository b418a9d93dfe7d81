//! The outermost framing layer: `[format_byte][payload]` (spec §4.9).
//!
//! A text WebSocket frame is always UTF-8 JSON and never goes through this
//! module. A binary frame always starts with one of the three format bytes
//! below; everything after it is the payload in that format.

use loom_core::errors::{WireError, WireErrorKind};

/// `0x01`: payload is a UTF-8 JSON document.
pub const FORMAT_JSON: u8 = 0x01;
/// `0x02`: payload is a raw upload chunk envelope (see [`crate::upload`]).
pub const FORMAT_BINARY_UPLOAD: u8 = 0x02;
/// `0x03`: payload is gzip-compressed UTF-8 JSON.
pub const FORMAT_COMPRESSED_JSON: u8 = 0x03;

/// Which of the three binary-frame formats a payload is encoded as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    /// Plain JSON.
    Json,
    /// Raw upload chunk bytes.
    BinaryUpload,
    /// Gzip-compressed JSON.
    CompressedJson,
}

impl FrameFormat {
    /// The wire byte for this format.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Json => FORMAT_JSON,
            Self::BinaryUpload => FORMAT_BINARY_UPLOAD,
            Self::CompressedJson => FORMAT_COMPRESSED_JSON,
        }
    }

    /// Parse a format byte, or `None` if it names no known format.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            FORMAT_JSON => Some(Self::Json),
            FORMAT_BINARY_UPLOAD => Some(Self::BinaryUpload),
            FORMAT_COMPRESSED_JSON => Some(Self::CompressedJson),
            _ => None,
        }
    }

    /// The client-declared format name used in `client_capabilities.formats`.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::BinaryUpload => "binary_upload",
            Self::CompressedJson => "compressed_json",
        }
    }
}

/// Prepend the format byte to a payload, producing a binary frame.
#[must_use]
pub fn encode_frame(format: FrameFormat, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(format.to_byte());
    out.extend_from_slice(payload);
    out
}

/// Split a binary frame into its format and payload slice.
pub fn decode_frame(bytes: &[u8]) -> Result<(FrameFormat, &[u8]), WireError> {
    let (&first, rest) = bytes
        .split_first()
        .ok_or_else(|| WireError::new(WireErrorKind::MalformedFrame, "empty binary frame"))?;
    let format = FrameFormat::from_byte(first)
        .ok_or_else(|| WireError::new(WireErrorKind::UnknownFormat, format!("unrecognized format byte {first:#04x}")))?;
    Ok((format, rest))
}

/// Minimum possible length of an encrypted envelope: version byte + 24-byte
/// nonce + the 16-byte Poly1305 tag of an empty plaintext.
pub const MIN_ENVELOPE_LEN: usize = 1 + 24 + 16;

/// Spec §4.9's disambiguation rule: a connection that is authenticated and
/// has received a long-enough binary frame whose second byte is not a JSON
/// opener is an encrypted envelope rather than Phase-0 framed JSON.
#[must_use]
pub fn looks_like_encrypted_envelope(authenticated: bool, bytes: &[u8]) -> bool {
    authenticated && bytes.len() >= MIN_ENVELOPE_LEN && bytes.get(1).is_some_and(|&b| b != b'{' && b != b'[')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_format_byte() {
        for format in [FrameFormat::Json, FrameFormat::BinaryUpload, FrameFormat::CompressedJson] {
            assert_eq!(FrameFormat::from_byte(format.to_byte()), Some(format));
        }
    }

    #[test]
    fn unknown_format_byte_is_none() {
        assert_eq!(FrameFormat::from_byte(0xff), None);
    }

    #[test]
    fn encode_then_decode_preserves_payload() {
        let frame = encode_frame(FrameFormat::Json, b"{\"a\":1}");
        let (format, payload) = decode_frame(&frame).unwrap();
        assert_eq!(format, FrameFormat::Json);
        assert_eq!(payload, b"{\"a\":1}");
    }

    #[test]
    fn decode_empty_frame_is_malformed() {
        let err = decode_frame(&[]).unwrap_err();
        assert_eq!(err.code, "MALFORMED_FRAME");
    }

    #[test]
    fn decode_unknown_byte_is_unknown_format() {
        let err = decode_frame(&[0xaa, 1, 2, 3]).unwrap_err();
        assert_eq!(err.code, "UNKNOWN_FORMAT");
    }

    #[test]
    fn json_frame_never_looks_like_an_envelope() {
        let frame = encode_frame(FrameFormat::Json, b"{\"a\":1}");
        assert!(!looks_like_encrypted_envelope(true, &frame));
    }

    #[test]
    fn unauthenticated_connections_never_see_envelopes() {
        let mut bytes = vec![0x01u8];
        bytes.extend(std::iter::repeat(0x42).take(64));
        assert!(!looks_like_encrypted_envelope(false, &bytes));
    }

    #[test]
    fn short_frame_is_not_an_envelope() {
        assert!(!looks_like_encrypted_envelope(true, &[0x01, 0x42]));
    }

    #[test]
    fn long_frame_with_random_second_byte_looks_like_an_envelope() {
        let mut bytes = vec![0x01u8];
        bytes.extend(std::iter::repeat(0x42).take(64));
        assert!(looks_like_encrypted_envelope(true, &bytes));
    }
}
