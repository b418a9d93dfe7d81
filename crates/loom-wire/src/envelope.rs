//! The encrypted envelope carried as a `0x02`-ambiguous binary frame once a
//! connection is authenticated (spec §4.9): `[version=0x01][24-byte
//! nonce][ciphertext]`, XChaCha20-Poly1305 over the session key derived from
//! the SRP-6a handshake in [`crate::srp_auth`].

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;

use loom_core::errors::{WireError, WireErrorKind};

/// The symmetric key derived from a completed SRP handshake.
pub type SessionKey = [u8; 32];

/// The only envelope format this relay understands.
pub const ENVELOPE_VERSION: u8 = 0x01;
/// XChaCha20-Poly1305 uses a 24-byte extended nonce.
pub const NONCE_LEN: usize = 24;

/// Encrypt `plaintext` (itself a `[format_byte][payload]` frame) under
/// `key`, producing a complete envelope ready to send as a binary frame.
#[must_use]
pub fn encrypt(key: &SessionKey, plaintext: &[u8]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .expect("encryption of a valid nonce/key pair does not fail");

    let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
    out.push(ENVELOPE_VERSION);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypt a complete envelope under `key`, returning the inner
/// `[format_byte][payload]` frame.
pub fn decrypt(key: &SessionKey, envelope: &[u8]) -> Result<Vec<u8>, WireError> {
    if envelope.len() < 1 + NONCE_LEN {
        return Err(WireError::new(WireErrorKind::MalformedFrame, "envelope shorter than header"));
    }
    let version = envelope[0];
    if version != ENVELOPE_VERSION {
        return Err(WireError::new(WireErrorKind::UnknownVersion, format!("unrecognized envelope version {version:#04x}")));
    }
    let nonce = XNonce::from_slice(&envelope[1..1 + NONCE_LEN]);
    let ciphertext = &envelope[1 + NONCE_LEN..];

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| WireError::new(WireErrorKind::DecryptFailed, "envelope failed to authenticate"))
}
