//! Dependency-injection context passed to every path handler.
//!
//! Mirrors `loom_wire::srp_auth`'s `CredentialStore`/`ResumableSessionStore`
//! pattern: persistence (project directory, per-session metadata, the
//! `GET /sessions` index) is a storage concern the server wires in, not
//! something this crate owns. The Supervisor and SessionReader, by
//! contrast, are concrete — they're already generic over their own
//! deployment details.

use std::sync::Arc;

use loom_core::ids::{ProjectId, SessionId};
use loom_core::project::Project;
use loom_runtime::Supervisor;
use loom_transcript::SessionReader;

use crate::types::{SessionListFilter, SessionMetadata, SessionSummary};

/// Looks up and registers scanned project directories (spec §4.3
/// ProjectScanner; not built as its own crate here — the server supplies a
/// concrete directory over whatever scan cadence it chooses).
pub trait ProjectDirectory: Send + Sync {
    /// All known projects.
    fn list(&self) -> Vec<Project>;
    /// A single project by id.
    fn get(&self, project_id: &ProjectId) -> Option<Project>;
    /// Register a new project rooted at `absolute_path`.
    fn add(&self, absolute_path: &str) -> Project;
}

/// Per-session title/starred/archived KV (spec §6 persistence layout:
/// `metadataDir/`).
pub trait MetadataStore: Send + Sync {
    /// Current metadata for a session, or the default (untitled, not
    /// starred, not archived) if none was ever written.
    fn get(&self, session_id: &SessionId) -> SessionMetadata;
    /// Overwrite a session's metadata.
    fn put(&self, session_id: &SessionId, metadata: SessionMetadata);
}

/// The `GET /sessions` / `GET /inbox` summary index (spec §6 persistence
/// layout: `indexDir/`).
pub trait SessionIndex: Send + Sync {
    /// Filtered, paginated session summaries for `GET /sessions`.
    fn list(&self, filter: &SessionListFilter) -> Vec<SessionSummary>;
    /// Every summary, unfiltered — `GET /inbox` buckets these itself.
    fn all(&self) -> Vec<SessionSummary>;
}

/// Shared context every path handler receives.
pub struct RpcContext {
    /// The Process registry.
    pub supervisor: Arc<Supervisor>,
    /// Stateless transcript reader.
    pub reader: SessionReader,
    /// Project lookup/registration.
    pub projects: Arc<dyn ProjectDirectory>,
    /// Per-session metadata KV.
    pub metadata: Arc<dyn MetadataStore>,
    /// The summary index backing listings.
    pub index: Arc<dyn SessionIndex>,
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::sync::Arc;

    use dashmap::DashMap;
    use loom_runtime::{SpawnBuilder, SupervisorConfig};

    use super::*;

    pub struct InMemoryProjects {
        projects: DashMap<ProjectId, Project>,
    }

    impl InMemoryProjects {
        pub fn new() -> Self {
            Self { projects: DashMap::new() }
        }

        pub fn seed(&self, project: Project) {
            let _ = self.projects.insert(project.id.clone(), project);
        }
    }

    impl ProjectDirectory for InMemoryProjects {
        fn list(&self) -> Vec<Project> {
            self.projects.iter().map(|e| e.value().clone()).collect()
        }

        fn get(&self, project_id: &ProjectId) -> Option<Project> {
            self.projects.get(project_id).map(|e| e.value().clone())
        }

        fn add(&self, absolute_path: &str) -> Project {
            let project = Project {
                id: ProjectId::new(),
                absolute_path: absolute_path.to_owned(),
                name: Project::name_from_path(absolute_path),
                session_dir_path: format!("{absolute_path}/.loom/sessions"),
            };
            self.seed(project.clone());
            project
        }
    }

    pub struct InMemoryMetadata {
        entries: DashMap<SessionId, SessionMetadata>,
    }

    impl InMemoryMetadata {
        pub fn new() -> Self {
            Self { entries: DashMap::new() }
        }
    }

    impl MetadataStore for InMemoryMetadata {
        fn get(&self, session_id: &SessionId) -> SessionMetadata {
            self.entries.get(session_id).map(|e| e.value().clone()).unwrap_or_default()
        }

        fn put(&self, session_id: &SessionId, metadata: SessionMetadata) {
            let _ = self.entries.insert(session_id.clone(), metadata);
        }
    }

    pub struct InMemoryIndex {
        rows: DashMap<SessionId, SessionSummary>,
    }

    impl InMemoryIndex {
        pub fn new() -> Self {
            Self { rows: DashMap::new() }
        }

        pub fn seed(&self, summary: SessionSummary) {
            let _ = self.rows.insert(summary.session_id.clone(), summary);
        }
    }

    impl SessionIndex for InMemoryIndex {
        fn list(&self, filter: &SessionListFilter) -> Vec<SessionSummary> {
            self.all()
                .into_iter()
                .filter(|row| filter.include_archived || !row.archived)
                .filter(|row| !filter.starred || row.starred)
                .filter(|row| filter.project.as_ref().is_none_or(|p| *p == row.project_id))
                .collect()
        }

        fn all(&self) -> Vec<SessionSummary> {
            self.rows.iter().map(|e| e.value().clone()).collect()
        }
    }

    pub fn make_test_context() -> RpcContext {
        make_test_context_with_sessions(Vec::new())
    }

    /// Same as [`make_test_context`], pre-seeding the session index —
    /// handlers that only read the index (listing, inbox) don't need a
    /// live Supervisor-owned session to test their filtering logic.
    pub fn make_test_context_with_sessions(seed: Vec<SessionSummary>) -> RpcContext {
        let builder: SpawnBuilder = Arc::new(|_ctx| loom_runtime::SpawnSpec {
            program: "cat".into(),
            args: Vec::new(),
            cwd: std::env::temp_dir(),
        });
        let index = InMemoryIndex::new();
        for summary in seed {
            index.seed(summary);
        }
        RpcContext {
            supervisor: Arc::new(Supervisor::new(SupervisorConfig::default(), builder)),
            reader: SessionReader::new(),
            projects: Arc::new(InMemoryProjects::new()),
            metadata: Arc::new(InMemoryMetadata::new()),
            index: Arc::new(index),
        }
    }
}
