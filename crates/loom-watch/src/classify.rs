//! Path classification (spec §4.2 "Classifies every filesystem event by
//! path prefix").

use std::path::Path;

/// What kind of on-disk thing a changed path refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PathKind {
    /// A top-level session transcript (`{sessionId}.jsonl`).
    Session,
    /// A subagent transcript spawned by a Task tool.
    AgentSession,
    /// The settings file.
    Settings,
    /// Stored SRP verifiers / credential material.
    Credentials,
    /// Anything else under the watched root.
    Other,
}

/// Root directories a [`PathKind`] is recognized under. Built once by
/// `init` and handed to the classifier so path prefixes stay configurable
/// rather than hardcoded (different deployments may lay out `~/.loom`
/// differently).
#[derive(Clone, Debug)]
pub struct ClassifyRoots {
    /// Directory holding top-level session transcripts.
    pub sessions_dir: std::path::PathBuf,
    /// Directory holding subagent transcripts.
    pub agent_sessions_dir: std::path::PathBuf,
    /// Path to the settings file.
    pub settings_path: std::path::PathBuf,
    /// Directory holding SRP verifier / credential material.
    pub credentials_dir: std::path::PathBuf,
}

impl ClassifyRoots {
    /// Classify `path` by whichever configured root it falls under, in
    /// precedence order (settings file, then credentials, then agent
    /// sessions, then sessions, then other). Agent sessions are checked
    /// before plain sessions so a nested layout (agent sessions living
    /// under `sessions_dir/agents/`) classifies correctly.
    #[must_use]
    pub fn classify(&self, path: &Path) -> PathKind {
        if path == self.settings_path {
            return PathKind::Settings;
        }
        if path.starts_with(&self.credentials_dir) {
            return PathKind::Credentials;
        }
        if path.starts_with(&self.agent_sessions_dir) {
            return PathKind::AgentSession;
        }
        if path.starts_with(&self.sessions_dir) {
            return PathKind::Session;
        }
        PathKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots() -> ClassifyRoots {
        ClassifyRoots {
            sessions_dir: "/root/.loom/sessions".into(),
            agent_sessions_dir: "/root/.loom/sessions/agents".into(),
            settings_path: "/root/.loom/settings.json".into(),
            credentials_dir: "/root/.loom/credentials".into(),
        }
    }

    #[test]
    fn classifies_settings_file_exactly() {
        assert_eq!(roots().classify(std::path::Path::new("/root/.loom/settings.json")), PathKind::Settings);
    }

    #[test]
    fn classifies_credentials_by_prefix() {
        let path = std::path::Path::new("/root/.loom/credentials/verifier-1.json");
        assert_eq!(roots().classify(path), PathKind::Credentials);
    }

    #[test]
    fn classifies_agent_sessions_before_plain_sessions() {
        let path = std::path::Path::new("/root/.loom/sessions/agents/a1.jsonl");
        assert_eq!(roots().classify(path), PathKind::AgentSession);
    }

    #[test]
    fn classifies_plain_session() {
        let path = std::path::Path::new("/root/.loom/sessions/s1.jsonl");
        assert_eq!(roots().classify(path), PathKind::Session);
    }

    #[test]
    fn classifies_unknown_path_as_other() {
        let path = std::path::Path::new("/tmp/whatever.txt");
        assert_eq!(roots().classify(path), PathKind::Other);
    }
}
