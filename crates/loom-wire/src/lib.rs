//! Wire-relay framing, SRP-6a authentication, and the encrypted envelope
//! (spec §4.9, §6).
//!
//! [`frame`] handles the outermost `[format_byte][payload]` split and the
//! disambiguation rule between framed JSON and an encrypted envelope;
//! [`envelope`] is the XChaCha20-Poly1305 envelope itself; [`compression`]
//! gzips the `COMPRESSED_JSON` format; [`srp_auth`] drives the SRP-6a
//! handshake and session-resume short path; [`message`] is the typed
//! message set carried once a frame is decoded; [`upload`] parses the
//! `BINARY_UPLOAD` chunk format.

#![warn(missing_docs)]

pub mod compression;
pub mod envelope;
pub mod frame;
pub mod message;
pub mod srp_auth;
pub mod upload;

pub use envelope::SessionKey;
pub use frame::{FrameFormat, FORMAT_BINARY_UPLOAD, FORMAT_COMPRESSED_JSON, FORMAT_JSON};
pub use message::{decode_b64, encode_b64, AuthMessage, RelayMessage};
pub use srp_auth::{CredentialStore, Credentials, ResumableSessionStore, SrpHandshake};
pub use upload::UploadChunkFrame;
