//! SRP-6a handshake driver (spec §4.9): `srp_hello → srp_challenge →
//! srp_proof → srp_verify`, plus the abbreviated `srp_session_resume` path
//! for reconnects. Built on the `srp` crate (RustCrypto) over its 2048-bit
//! named group and SHA-256 (see `DESIGN.md`).

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use srp::groups::G_2048;
use srp::server::SrpServer;

use loom_core::errors::{WireError, WireErrorKind};

use crate::envelope::SessionKey;

/// A looked-up user's SRP credentials: a random salt and the verifier
/// computed once at signup time from `(identity, password, salt)`. Owning
/// and persisting these belongs to whatever settings/credential store the
/// server wires in; this module only consumes them.
pub struct Credentials {
    /// Per-user random salt.
    pub salt: Vec<u8>,
    /// The SRP verifier `v`, derived from the user's password at signup.
    pub verifier: Vec<u8>,
}

/// Looks up a user's [`Credentials`] by identity.
pub trait CredentialStore: Send + Sync {
    /// Return this identity's stored salt and verifier, or `None` if no
    /// such identity is registered.
    fn lookup(&self, identity: &str) -> Option<Credentials>;
}

/// Length of the server's private ephemeral `b`, in bytes.
const PRIVATE_EPHEMERAL_LEN: usize = 64;

/// One connection's progress through the handshake.
enum Phase {
    /// No `srp_hello` received yet.
    Idle,
    /// Challenge issued; waiting on `srp_proof`.
    AwaitingProof {
        identity: String,
        b: Vec<u8>,
        credentials: Credentials,
    },
    /// Proof verified; session key established.
    Authenticated { identity: String, session_key: SessionKey },
}

/// Drives one connection's SRP-6a handshake from `srp_hello` through
/// `srp_verify`, or the abbreviated `srp_session_resume` path.
pub struct SrpHandshake {
    phase: Phase,
}

impl SrpHandshake {
    /// A fresh, unauthenticated handshake.
    #[must_use]
    pub fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    /// Whether [`Self::session_key`] would return a key.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self.phase, Phase::Authenticated { .. })
    }

    /// The derived session key, once authenticated.
    #[must_use]
    pub fn session_key(&self) -> Option<&SessionKey> {
        match &self.phase {
            Phase::Authenticated { session_key, .. } => Some(session_key),
            _ => None,
        }
    }

    /// The authenticated identity, once authenticated.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        match &self.phase {
            Phase::Authenticated { identity, .. } => Some(identity),
            _ => None,
        }
    }

    /// `srp_hello{identity}` → `srp_challenge{salt, B}`.
    pub fn hello(&mut self, identity: &str, store: &dyn CredentialStore) -> Result<(Vec<u8>, Vec<u8>), WireError> {
        let credentials = store
            .lookup(identity)
            .ok_or_else(|| WireError::new(WireErrorKind::InvalidIdentity, format!("unknown identity `{identity}`")))?;

        let mut b = vec![0u8; PRIVATE_EPHEMERAL_LEN];
        OsRng.fill_bytes(&mut b);

        let server = SrpServer::<Sha256>::new(&G_2048);
        let b_pub = server.compute_public_ephemeral(&b, &credentials.verifier);

        let salt = credentials.salt.clone();
        self.phase = Phase::AwaitingProof { identity: identity.to_owned(), b, credentials };
        Ok((salt, b_pub))
    }

    /// `srp_proof{A, M1}` → `srp_verify{M2}` (or `srp_error`).
    pub fn verify_proof(&mut self, a_pub: &[u8], m1: &[u8]) -> Result<Vec<u8>, WireError> {
        let Phase::AwaitingProof { identity, b, credentials } = &self.phase else {
            return Err(WireError::new(WireErrorKind::InvalidProof, "no challenge is in progress"));
        };

        let server = SrpServer::<Sha256>::new(&G_2048);
        let verifier = server
            .process_reply(b, &credentials.verifier, a_pub)
            .map_err(|_| WireError::new(WireErrorKind::InvalidProof, "key agreement failed"))?;
        verifier
            .verify_client(m1)
            .map_err(|_| WireError::new(WireErrorKind::InvalidProof, "client proof did not verify"))?;

        let session_key = derive_session_key(verifier.key());
        let m2 = verifier.proof().to_vec();
        self.phase = Phase::Authenticated { identity: identity.clone(), session_key };
        Ok(m2)
    }
}

impl Default for SrpHandshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Looks up a previously issued resumable session by id, for the
/// `srp_session_resume` short path.
pub trait ResumableSessionStore: Send + Sync {
    /// Return the identity and session key bound to `session_id`, if it is
    /// still live.
    fn lookup(&self, session_id: &str) -> Option<(String, SessionKey)>;
}

/// `srp_session_resume{sessionId, identity, proof}` → the session key, if
/// `proof` binds correctly to the session established at `session_id`.
///
/// `proof` is a keyed hash of `(session_id, identity)` under the original
/// session key — it does not repeat the SRP exchange, it only demonstrates
/// possession of the key that exchange already produced.
pub fn resume(session_id: &str, identity: &str, proof: &[u8], store: &dyn ResumableSessionStore) -> Result<SessionKey, WireError> {
    let (bound_identity, session_key) = store
        .lookup(session_id)
        .ok_or_else(|| WireError::new(WireErrorKind::SessionExpired, "no such resumable session"))?;
    if bound_identity != identity {
        return Err(WireError::new(WireErrorKind::InvalidIdentity, "identity does not own this session"));
    }
    let expected = resume_proof(&session_key, session_id, identity);
    if expected != proof {
        return Err(WireError::new(WireErrorKind::InvalidProof, "resume proof did not match"));
    }
    Ok(session_key)
}

/// Compute the proof a client sends in `srp_session_resume`.
#[must_use]
pub fn resume_proof(session_key: &SessionKey, session_id: &str, identity: &str) -> Vec<u8> {
    use sha2::Digest;
    let mut hasher = Sha256::new();
    hasher.update(session_key);
    hasher.update(session_id.as_bytes());
    hasher.update(identity.as_bytes());
    hasher.finalize().to_vec()
}

/// SRP's `K = H(S)` is already a fixed-width digest under SHA-256; re-hash
/// it once more so the session key is never the bare shared secret `S`.
fn derive_session_key(shared_key: &[u8]) -> SessionKey {
    use sha2::Digest;
    let mut hasher = Sha256::new();
    hasher.update(b"loom-wire-session-key");
    hasher.update(shared_key);
    let digest = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use srp::client::SrpClient;

    struct FixedStore {
        identity: &'static str,
        salt: Vec<u8>,
        verifier: Vec<u8>,
    }

    impl CredentialStore for FixedStore {
        fn lookup(&self, identity: &str) -> Option<Credentials> {
            if identity == self.identity {
                Some(Credentials { salt: self.salt.clone(), verifier: self.verifier.clone() })
            } else {
                None
            }
        }
    }

    fn make_store(identity: &'static str, password: &[u8]) -> FixedStore {
        let client = SrpClient::<Sha256>::new(&G_2048);
        let salt = b"fixed-test-salt-0123456".to_vec();
        let verifier = client.compute_verifier(identity.as_bytes(), password, &salt);
        FixedStore { identity, salt, verifier }
    }

    #[test]
    fn full_handshake_agrees_on_same_session_key() {
        let store = make_store("alice", b"hunter2");
        let client = SrpClient::<Sha256>::new(&G_2048);

        let mut a = vec![0u8; 64];
        OsRng.fill_bytes(&mut a);
        let a_pub = client.compute_public_ephemeral(&a);

        let mut server = SrpHandshake::new();
        let (salt, b_pub) = server.hello("alice", &store).unwrap();

        let client_verifier = client.process_reply(&a, "alice".as_bytes(), b"hunter2", &salt, &b_pub).unwrap();
        let m1 = client_verifier.proof();

        let m2 = server.verify_proof(&a_pub, m1).unwrap();
        assert!(client_verifier.verify_server(&m2).is_ok());

        assert!(server.is_authenticated());
        assert_eq!(server.identity(), Some("alice"));
    }

    #[test]
    fn unknown_identity_is_rejected() {
        let store = make_store("alice", b"hunter2");
        let mut server = SrpHandshake::new();
        let err = server.hello("mallory", &store).unwrap_err();
        assert_eq!(err.code, "INVALID_IDENTITY");
    }

    #[test]
    fn wrong_password_fails_client_proof() {
        let store = make_store("alice", b"hunter2");
        let client = SrpClient::<Sha256>::new(&G_2048);

        let mut a = vec![0u8; 64];
        OsRng.fill_bytes(&mut a);
        let a_pub = client.compute_public_ephemeral(&a);

        let mut server = SrpHandshake::new();
        let (salt, b_pub) = server.hello("alice", &store).unwrap();

        let client_verifier = client.process_reply(&a, "alice".as_bytes(), b"wrong-password", &salt, &b_pub).unwrap();
        let m1 = client_verifier.proof();

        let err = server.verify_proof(&a_pub, m1).unwrap_err();
        assert_eq!(err.code, "INVALID_PROOF");
    }

    #[test]
    fn proof_before_hello_is_rejected() {
        let mut server = SrpHandshake::new();
        let err = server.verify_proof(&[1, 2, 3], &[4, 5, 6]).unwrap_err();
        assert_eq!(err.code, "INVALID_PROOF");
    }

    struct FixedSessionStore {
        session_id: &'static str,
        identity: &'static str,
        key: SessionKey,
    }

    impl ResumableSessionStore for FixedSessionStore {
        fn lookup(&self, session_id: &str) -> Option<(String, SessionKey)> {
            if session_id == self.session_id {
                Some((self.identity.to_owned(), self.key))
            } else {
                None
            }
        }
    }

    #[test]
    fn resume_with_correct_proof_succeeds() {
        let key = [9u8; 32];
        let store = FixedSessionStore { session_id: "sess-1", identity: "alice", key };
        let proof = resume_proof(&key, "sess-1", "alice");
        assert_eq!(resume("sess-1", "alice", &proof, &store).unwrap(), key);
    }

    #[test]
    fn resume_with_wrong_identity_is_rejected() {
        let key = [9u8; 32];
        let store = FixedSessionStore { session_id: "sess-1", identity: "alice", key };
        let proof = resume_proof(&key, "sess-1", "alice");
        let err = resume("sess-1", "mallory", &proof, &store).unwrap_err();
        assert_eq!(err.code, "INVALID_IDENTITY");
    }

    #[test]
    fn resume_with_wrong_proof_is_rejected() {
        let key = [9u8; 32];
        let store = FixedSessionStore { session_id: "sess-1", identity: "alice", key };
        let err = resume("sess-1", "alice", b"bogus proof bytes", &store).unwrap_err();
        assert_eq!(err.code, "INVALID_PROOF");
    }

    #[test]
    fn resume_of_unknown_session_is_expired() {
        let store = FixedSessionStore { session_id: "sess-1", identity: "alice", key: [0u8; 32] };
        let err = resume("sess-unknown", "alice", b"anything", &store).unwrap_err();
        assert_eq!(err.code, "SESSION_EXPIRED");
    }
}
