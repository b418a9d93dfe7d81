//! File-backed SRP credential and resumable-session stores (spec §4.9).
//!
//! Verifier provisioning itself is out of scope (spec.md's own Out of
//! scope list: "authentication password hashing uses the standard SRP-6a
//! group") — this module only *reads* whatever `identity -> {salt,
//! verifier}` rows already exist at `AuthSettings::srp_verifier_store_path`,
//! the same read-only-registry idiom `loom-rpc::context`'s traits use for
//! persistence the server supplies but doesn't generate.
//!
//! Resumable sessions (spec §7 "S4 Resumable auth") are registered in
//! memory when a full handshake completes and looked up by
//! `srp_session_resume`; they don't survive a server restart, since nothing
//! in spec §7 requires that.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use loom_wire::{Credentials, CredentialStore, ResumableSessionStore, SessionKey};

#[derive(Clone, Serialize, Deserialize)]
struct StoredCredentials {
    salt: String,
    verifier: String,
}

#[derive(Default, Serialize, Deserialize)]
struct VerifierFile {
    #[serde(default)]
    identities: std::collections::HashMap<String, StoredCredentials>,
}

/// Reads SRP verifier rows from a JSON file, loaded once at startup.
pub struct FileCredentialStore {
    rows: std::collections::HashMap<String, Credentials>,
}

impl FileCredentialStore {
    /// Load from `path`. A missing file yields an empty store (every
    /// `srp_hello` then fails with `INVALID_IDENTITY`, which is the correct
    /// behavior for a freshly provisioned, not-yet-enrolled server).
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file: VerifierFile = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(std::io::Error::other)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(?path, "no SRP verifier file found, all identities will be rejected");
                VerifierFile::default()
            }
            Err(e) => return Err(e),
        };

        let mut rows = std::collections::HashMap::new();
        for (identity, stored) in file.identities {
            let Ok(salt) = loom_wire::decode_b64(&stored.salt) else { continue };
            let Ok(verifier) = loom_wire::decode_b64(&stored.verifier) else { continue };
            rows.insert(identity, Credentials { salt, verifier });
        }
        Ok(Self { rows })
    }
}

impl CredentialStore for FileCredentialStore {
    fn lookup(&self, identity: &str) -> Option<Credentials> {
        self.rows.get(identity).cloned()
    }
}

/// In-memory registry of resumable sessions, populated after every
/// completed full handshake.
#[derive(Default)]
pub struct InMemoryResumableSessions {
    sessions: DashMap<String, (String, SessionKey)>,
}

impl InMemoryResumableSessions {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session as resumable after a full handshake verifies.
    pub fn register(&self, session_id: String, identity: String, session_key: SessionKey) {
        self.sessions.insert(session_id, (identity, session_key));
    }

    /// Drop a resumable session (the connection closed without the client
    /// intending to reconnect, or the entry was consumed by a resume).
    pub fn forget(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}

impl ResumableSessionStore for InMemoryResumableSessions {
    fn lookup(&self, session_id: &str) -> Option<(String, SessionKey)> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }
}

/// Default location for the SRP verifier file when `AuthSettings` doesn't
/// override it.
#[must_use]
pub fn default_verifier_path(configured: &str) -> PathBuf {
    PathBuf::from(shellexpand_home(configured))
}

fn shellexpand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_owned());
        format!("{home}/{rest}")
    } else {
        path.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_empty_store() {
        let store = FileCredentialStore::load("/nonexistent/path/verifiers.json").unwrap();
        assert!(store.lookup("anyone").is_none());
    }

    #[test]
    fn loads_rows_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verifiers.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "identities": {
                    "alice": { "salt": loom_wire::encode_b64(b"salt"), "verifier": loom_wire::encode_b64(b"verifier") }
                }
            })
            .to_string(),
        )
        .unwrap();

        let store = FileCredentialStore::load(&path).unwrap();
        let creds = store.lookup("alice").unwrap();
        assert_eq!(creds.salt, b"salt");
        assert_eq!(creds.verifier, b"verifier");
    }

    #[test]
    fn resumable_session_round_trips() {
        let store = InMemoryResumableSessions::new();
        let key: SessionKey = [7u8; 32];
        store.register("sess1".into(), "alice".into(), key);
        let (identity, found) = store.lookup("sess1").unwrap();
        assert_eq!(identity, "alice");
        assert_eq!(found, key);
    }

    #[test]
    fn forget_removes_entry() {
        let store = InMemoryResumableSessions::new();
        store.register("sess1".into(), "alice".into(), [1u8; 32]);
        store.forget("sess1");
        assert!(store.lookup("sess1").is_none());
    }

    #[test]
    fn expands_leading_tilde() {
        std::env::set_var("HOME", "/home/demo");
        assert_eq!(default_verifier_path("~/.loom/credentials.json"), PathBuf::from("/home/demo/.loom/credentials.json"));
    }
}
