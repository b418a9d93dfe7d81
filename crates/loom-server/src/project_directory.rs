//! File-backed `ProjectDirectory` / `MetadataStore` / `SessionIndex`.
//!
//! `loom-rpc::context` deliberately leaves these as traits the server wires
//! in (mirroring `loom_wire::srp_auth`'s `CredentialStore` split): a
//! `DashMap` registry with a JSON snapshot on disk, split into three small
//! flat-file registries instead of one.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use loom_core::ids::{ProjectId, SessionId};
use loom_core::project::Project;
use loom_rpc::context::{MetadataStore, ProjectDirectory, SessionIndex};
use loom_rpc::types::{SessionListFilter, SessionMetadata, SessionSummary};

/// Derive a project's id from its canonicalized absolute path.
///
/// URL-safe base64, no padding — stable across restarts, not meant to be
/// decoded back (spec §4.3 only requires it be deterministic).
#[must_use]
pub fn derive_project_id(absolute_path: &str) -> ProjectId {
    ProjectId::from_string(URL_SAFE_NO_PAD.encode(absolute_path.as_bytes()))
}

/// Expand a leading `~/` against `$HOME`.
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_owned());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// Scans a root directory for project subdirectories and registers new
/// ones on demand, per spec §4.3.
pub struct FileProjectDirectory {
    root: PathBuf,
    projects: DashMap<ProjectId, Project>,
}

impl FileProjectDirectory {
    /// Scan `root`'s immediate subdirectories at startup.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let projects = DashMap::new();
        match std::fs::read_dir(&root) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_dir() {
                        if let Some(project) = build_project(&path) {
                            projects.insert(project.id.clone(), project);
                        }
                    }
                }
            }
            Err(e) => warn!(root = %root.display(), error = %e, "project root not readable at startup"),
        }
        Self { root, projects }
    }
}

fn build_project(absolute_path: &Path) -> Option<Project> {
    let canonical = absolute_path.canonicalize().ok()?;
    let absolute_path = canonical.to_string_lossy().into_owned();
    Some(Project {
        id: derive_project_id(&absolute_path),
        name: Project::name_from_path(&absolute_path),
        session_dir_path: format!("{absolute_path}/.loom/sessions"),
        absolute_path,
    })
}

impl ProjectDirectory for FileProjectDirectory {
    fn list(&self) -> Vec<Project> {
        self.projects.iter().map(|e| e.value().clone()).collect()
    }

    fn get(&self, project_id: &ProjectId) -> Option<Project> {
        self.projects.get(project_id).map(|e| e.value().clone())
    }

    fn add(&self, absolute_path: &str) -> Project {
        let normalized = expand_home(absolute_path.trim_end_matches('/'));
        let project = build_project(&normalized).unwrap_or_else(|| {
            let absolute_path = normalized.to_string_lossy().into_owned();
            Project {
                id: derive_project_id(&absolute_path),
                name: Project::name_from_path(&absolute_path),
                session_dir_path: format!("{absolute_path}/.loom/sessions"),
                absolute_path,
            }
        });
        self.projects.insert(project.id.clone(), project.clone());
        project
    }
}

impl FileProjectDirectory {
    /// The scanned root, exposed for diagnostics.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Per-session metadata, persisted as one JSON file per session under a
/// configured directory (spec §6 `metadataDir/`).
pub struct FileMetadataStore {
    dir: PathBuf,
    cache: DashMap<SessionId, SessionMetadata>,
}

impl FileMetadataStore {
    /// Use `dir` for persistence, creating it if missing.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, cache: DashMap::new() })
    }

    fn path_for(&self, session_id: &SessionId) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

impl MetadataStore for FileMetadataStore {
    fn get(&self, session_id: &SessionId) -> SessionMetadata {
        if let Some(cached) = self.cache.get(session_id) {
            return cached.value().clone();
        }
        let loaded = std::fs::read_to_string(self.path_for(session_id))
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default();
        self.cache.insert(session_id.clone(), loaded.clone());
        loaded
    }

    fn put(&self, session_id: &SessionId, metadata: SessionMetadata) {
        if let Ok(contents) = serde_json::to_string(&metadata) {
            if let Err(e) = std::fs::write(self.path_for(session_id), contents) {
                warn!(%session_id, error = %e, "failed to persist session metadata");
            }
        }
        self.cache.insert(session_id.clone(), metadata);
    }
}

/// The `GET /sessions` / `GET /inbox` summary index, persisted as one JSON
/// snapshot file (spec §6 `indexDir/`). Writes are coalesced through a
/// mutex since the whole table is rewritten atomically; reads hit the
/// in-memory table.
pub struct FileSessionIndex {
    path: PathBuf,
    rows: DashMap<SessionId, SessionSummary>,
    write_lock: Mutex<()>,
}

impl FileSessionIndex {
    /// Load `path`'s snapshot (or start empty if absent).
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("sessions.json");
        let rows = DashMap::new();
        if let Ok(contents) = std::fs::read_to_string(&path) {
            if let Ok(entries) = serde_json::from_str::<Vec<SessionSummary>>(&contents) {
                for row in entries {
                    rows.insert(row.session_id.clone(), row);
                }
            }
        }
        Ok(Self { path, rows, write_lock: Mutex::new(()) })
    }

    /// Insert or replace a session's summary row.
    pub fn upsert(&self, summary: SessionSummary) {
        self.rows.insert(summary.session_id.clone(), summary);
        self.flush();
    }

    /// Drop a session from the index (e.g. once fully archived-and-purged).
    pub fn remove(&self, session_id: &SessionId) {
        self.rows.remove(session_id);
        self.flush();
    }

    fn flush(&self) {
        let _guard = self.write_lock.lock();
        let snapshot: Vec<SessionSummary> = self.rows.iter().map(|e| e.value().clone()).collect();
        match serde_json::to_string(&snapshot) {
            Ok(contents) => {
                if let Err(e) = std::fs::write(&self.path, contents) {
                    warn!(path = %self.path.display(), error = %e, "failed to persist session index");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize session index"),
        }
    }
}

impl SessionIndex for FileSessionIndex {
    fn list(&self, filter: &SessionListFilter) -> Vec<SessionSummary> {
        let mut rows: Vec<SessionSummary> = self
            .all()
            .into_iter()
            .filter(|row| filter.include_archived || !row.archived)
            .filter(|row| !filter.starred || row.starred)
            .filter(|row| filter.project.as_ref().is_none_or(|p| *p == row.project_id))
            .filter(|row| {
                filter.q.as_ref().is_none_or(|q| {
                    row.title.as_deref().unwrap_or_default().to_lowercase().contains(&q.to_lowercase())
                })
            })
            .filter(|row| filter.after.as_ref().is_none_or(|after| row.last_message_at.as_deref() > Some(after.as_str())))
            .collect();
        rows.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        rows
    }

    fn all(&self) -> Vec<SessionSummary> {
        self.rows.iter().map(|e| e.value().clone()).collect()
    }
}

/// Bundles the three file-backed stores behind one constructor, keyed by
/// `PathSettings`.
pub struct FileStores {
    /// Project directory.
    pub projects: FileProjectDirectory,
    /// Per-session metadata.
    pub metadata: FileMetadataStore,
    /// Session summary index.
    pub index: FileSessionIndex,
}

impl FileStores {
    /// Build all three stores from `loom-settings::PathSettings`.
    pub fn new(paths: &loom_settings::PathSettings) -> std::io::Result<Self> {
        Ok(Self {
            projects: FileProjectDirectory::new(expand_home(&paths.projects_root)),
            metadata: FileMetadataStore::new(expand_home(&paths.metadata_dir))?,
            index: FileSessionIndex::new(expand_home(&paths.index_dir))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_project_id_is_deterministic() {
        let a = derive_project_id("/home/user/demo");
        let b = derive_project_id("/home/user/demo");
        assert_eq!(a, b);
    }

    #[test]
    fn expand_home_rewrites_tilde() {
        std::env::set_var("HOME", "/home/demo");
        assert_eq!(expand_home("~/.loom/sessions"), PathBuf::from("/home/demo/.loom/sessions"));
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn add_project_registers_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        let projects = FileProjectDirectory::new(dir.path());
        let project = projects.add(dir.path().to_str().unwrap());
        assert_eq!(projects.list().len(), 1);
        assert_eq!(projects.get(&project.id).unwrap().id, project.id);
    }

    #[test]
    fn scans_existing_subdirectories_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("proj-a")).unwrap();
        std::fs::create_dir(dir.path().join("proj-b")).unwrap();
        let projects = FileProjectDirectory::new(dir.path());
        assert_eq!(projects.list().len(), 2);
    }

    #[test]
    fn metadata_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMetadataStore::new(dir.path()).unwrap();
        let session_id = SessionId::new();
        assert_eq!(store.get(&session_id), SessionMetadata::default());

        let metadata = SessionMetadata { title: Some("hello".into()), starred: true, archived: false };
        store.put(&session_id, metadata.clone());
        assert_eq!(store.get(&session_id), metadata);

        let reloaded = FileMetadataStore::new(dir.path()).unwrap();
        assert_eq!(reloaded.get(&session_id), metadata);
    }

    #[test]
    fn index_persists_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let index = FileSessionIndex::new(dir.path()).unwrap();
        let project_id = ProjectId::new();
        let starred = SessionSummary {
            session_id: SessionId::new(),
            project_id: project_id.clone(),
            title: Some("starred one".into()),
            starred: true,
            archived: false,
            active: false,
            last_message_at: Some("2026-01-01T00:00:00Z".into()),
        };
        let plain = SessionSummary {
            session_id: SessionId::new(),
            project_id,
            title: Some("plain one".into()),
            starred: false,
            archived: false,
            active: false,
            last_message_at: Some("2026-01-02T00:00:00Z".into()),
        };
        index.upsert(starred.clone());
        index.upsert(plain);

        let filter = SessionListFilter { starred: true, ..Default::default() };
        let rows = index.list(&filter);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].session_id, starred.session_id);

        let reloaded = FileSessionIndex::new(dir.path()).unwrap();
        assert_eq!(reloaded.all().len(), 2);
    }

    #[test]
    fn remove_drops_from_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = FileSessionIndex::new(dir.path()).unwrap();
        let summary = SessionSummary {
            session_id: SessionId::new(),
            project_id: ProjectId::new(),
            title: None,
            starred: false,
            archived: false,
            active: false,
            last_message_at: None,
        };
        index.upsert(summary.clone());
        index.remove(&summary.session_id);
        assert!(index.all().is_empty());
    }
}
