//! The typed message set carried inside a frame, once decrypted/decompressed
//! (spec §4.9, §6). Tagged the same way [`loom_runtime::ProcessEvent`] is:
//! `#[serde(tag = "type")]` with the variant's fields inline, generalized
//! from the `type`/`payload` split the pack's clauderon `Request`/`Response`
//! enums use.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use loom_core::errors::{WireError, WireErrorKind};

/// The SRP-6a handshake and session-resume messages (spec §4.9).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMessage {
    /// Client → server: opens a fresh handshake.
    SrpHello {
        /// The account/user identity being authenticated.
        identity: String,
    },
    /// Server → client: the user's salt and public ephemeral `B`, both
    /// base64-encoded.
    SrpChallenge {
        /// Base64-encoded salt.
        salt: String,
        /// Base64-encoded server public ephemeral value.
        b_pub: String,
    },
    /// Client → server: the client's public ephemeral `A` and proof `M1`.
    SrpProof {
        /// Base64-encoded client public ephemeral value.
        a_pub: String,
        /// Base64-encoded client proof.
        m1: String,
    },
    /// Server → client: handshake succeeded. `M2` lets the client verify
    /// the server in turn.
    SrpVerify {
        /// Base64-encoded server proof.
        m2: String,
        /// A resumable session id for future reconnects, if issued.
        session_id: Option<String>,
    },
    /// Server → client: the handshake failed at any step.
    SrpError {
        /// Machine-readable failure code.
        code: String,
    },
    /// Client → server: resume a previous session without a full handshake.
    SrpSessionResume {
        /// The session id from an earlier `srp_verify`.
        session_id: String,
        /// The identity that owns `session_id`.
        identity: String,
        /// Proof binding this reconnect to the original session key.
        proof: String,
    },
    /// Server → client: the resume succeeded; no full handshake needed.
    SrpSessionResumed {
        /// Echoes the resumed session id.
        session_id: String,
    },
    /// Server → client: the resume failed; the client must run a full
    /// handshake instead.
    SrpSessionInvalid {
        /// Why the resume was rejected.
        reason: String,
    },
}

/// Base64-encode raw SRP bytes for a wire field.
#[must_use]
pub fn encode_b64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a base64 wire field back to raw SRP bytes.
pub fn decode_b64(field: &str) -> Result<Vec<u8>, WireError> {
    BASE64
        .decode(field)
        .map_err(|e| WireError::new(WireErrorKind::MalformedFrame, "malformed base64 field").with_source(e))
}

impl AuthMessage {
    /// Build the `srp_challenge` reply from [`crate::srp_auth::SrpHandshake::hello`]'s raw output.
    #[must_use]
    pub fn challenge(salt: &[u8], b_pub: &[u8]) -> Self {
        Self::SrpChallenge { salt: encode_b64(salt), b_pub: encode_b64(b_pub) }
    }

    /// Build the `srp_verify` reply from [`crate::srp_auth::SrpHandshake::verify_proof`]'s raw output.
    #[must_use]
    pub fn verify(m2: &[u8], session_id: Option<String>) -> Self {
        Self::SrpVerify { m2: encode_b64(m2), session_id }
    }
}

/// The application-level message set exchanged once a connection is
/// authenticated (spec §4.9, §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(clippy::large_enum_variant)]
pub enum RelayMessage {
    /// An HTTP-style call carried over the relay; see spec §6's path table.
    Request {
        /// Correlates with the eventual `response`.
        id: String,
        /// HTTP-style verb (`GET`, `POST`, `PUT`, ...).
        method: String,
        /// One of the paths in spec §6's table.
        path: String,
        /// Optional request headers.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HashMap<String, String>>,
        /// Optional JSON body.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
    /// The reply to a `request`.
    Response {
        /// Echoes the request's `id`.
        id: String,
        /// HTTP-style status code.
        status: u16,
        /// Optional response headers.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HashMap<String, String>>,
        /// JSON body.
        body: Value,
    },
    /// Open a live subscription to a channel (spec §6: `session`, `activity`).
    Subscribe {
        /// Client-chosen id for this subscription.
        subscription_id: String,
        /// Channel name.
        channel: String,
        /// Required for the `session` channel.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Close a previously opened subscription.
    Unsubscribe {
        /// The subscription to close.
        subscription_id: String,
    },
    /// A live event delivered on a subscription.
    Event {
        /// Which subscription this belongs to.
        subscription_id: String,
        /// Strictly increasing, contiguous from 0, per subscription.
        event_id: u64,
        /// One of spec §6's subscribe-channel event type names.
        event_type: String,
        /// The event payload.
        data: Value,
    },
    /// Begin a chunked upload.
    UploadStart {
        /// Client-chosen id for this upload.
        upload_id: String,
        /// Project the file is attached to.
        project_id: String,
        /// Session the file is attached to.
        session_id: String,
        /// Original filename.
        filename: String,
        /// Declared total size in bytes.
        size: u64,
        /// MIME type of the file.
        mime_type: String,
    },
    /// Metadata accompanying a binary `0x02` chunk frame (the chunk bytes
    /// themselves never travel as JSON; see [`crate::frame`]).
    UploadChunk {
        /// Which upload this chunk belongs to.
        upload_id: String,
        /// Byte offset of this chunk within the file.
        offset: u64,
    },
    /// Client signals no more chunks are coming.
    UploadEnd {
        /// Which upload finished sending chunks.
        upload_id: String,
    },
    /// Server → client: cumulative bytes received so far.
    UploadProgress {
        /// Which upload this reports on.
        upload_id: String,
        /// Total bytes received so far.
        bytes_received: u64,
    },
    /// Server → client: the upload is complete and staged.
    UploadComplete {
        /// Which upload completed.
        upload_id: String,
        /// A reference to the staged file (path or id).
        file_ref: String,
    },
    /// Server → client: the upload failed.
    UploadError {
        /// Which upload failed.
        upload_id: String,
        /// Machine-readable failure code.
        code: String,
        /// Human-readable description.
        message: String,
    },
    /// Client → server, immediately after connecting: which binary frame
    /// formats this client can decode, so the server picks the most compact
    /// reply format the client declared.
    ClientCapabilities {
        /// Format names from [`crate::frame::FrameFormat::name`].
        formats: Vec<String>,
    },
}
