//! Project domain type (spec §3).

use serde::{Deserialize, Serialize};

use crate::ids::ProjectId;

/// A scanned project directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Stable, URL-safe id derived from `absolute_path`.
    pub id: ProjectId,
    /// Canonicalized absolute path to the project directory.
    pub absolute_path: String,
    /// Display name (the final path component).
    pub name: String,
    /// Directory holding this project's session transcripts.
    pub session_dir_path: String,
}

impl Project {
    /// Derive the display name from an absolute path's final component.
    #[must_use]
    pub fn name_from_path(absolute_path: &str) -> String {
        std::path::Path::new(absolute_path)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| absolute_path.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_from_path_uses_final_component() {
        assert_eq!(Project::name_from_path("/home/user/my-app"), "my-app");
    }

    #[test]
    fn name_from_path_trailing_slash_free() {
        assert_eq!(Project::name_from_path("/home/user/my-app/"), "my-app");
    }

    #[test]
    fn name_from_path_root_falls_back() {
        assert_eq!(Project::name_from_path("/"), "/");
    }

    #[test]
    fn project_serde_roundtrip() {
        let p = Project {
            id: ProjectId::from("p1"),
            absolute_path: "/tmp/demo".into(),
            name: "demo".into(),
            session_dir_path: "/tmp/demo/.sessions".into(),
        };
        let json = serde_json::to_string(&p).unwrap();
        let back: Project = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
