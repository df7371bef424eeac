//! Bundle materialization.
//!
//! Turns a validated [`ProjectRequest`] into a directory tree on disk.
//! Batch semantics are best-effort with itemized reporting: a per-file
//! failure (sanitizer rejection, write error) lands in the summary and
//! the remaining files still go out. Only a root that cannot be
//! created or validated aborts the whole operation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::sanitize;
use crate::scaffold::{ProjectScaffold, ScaffoldRequest};

/// Filename for the optional project description at the project root.
pub const DESCRIPTION_FILENAME: &str = "DESCRIPTION.md";

/// Per-file rejection reason for disk failures (sanitizer reasons come
/// from [`sanitize::PathError::reason`]).
const IO_FAILURE_REASON: &str = "IOFailure";

#[derive(Debug, Error)]
pub enum MaterializeError {
    /// Empty or relative project path, or an existing non-directory.
    #[error("project path is not a usable directory")]
    TargetNotDirectory,

    /// The root itself could not be created.
    #[error("failed to prepare project root: {0}")]
    Io(#[from] std::io::Error),
}

/// One project-creation request as received over the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectRequest {
    /// Absolute target directory, trusted (caller-controlled machine).
    pub project_path: String,
    pub project_name: String,
    /// Relative path → content. Keys are adversarial input.
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    pub files_written: Vec<String>,
    pub files_rejected: Vec<RejectedFile>,
    pub root: String,
}

/// Materialize one bundle under its project root.
pub fn materialize(
    request: &ProjectRequest,
    scaffold: &dyn ProjectScaffold,
) -> Result<ProjectSummary, MaterializeError> {
    let root = validate_root(&request.project_path)?;
    fs::create_dir_all(&root)?;

    let mut files_written = Vec::new();
    let mut files_rejected = Vec::new();

    for (name, resolution) in sanitize::resolve_bundle(&request.files, &root) {
        match resolution {
            Ok(target) => match write_file(&target, &request.files[name]) {
                Ok(()) => files_written.push(name.to_string()),
                Err(e) => {
                    warn!("Failed to write {}: {}", name, e);
                    files_rejected.push(RejectedFile {
                        path: name.to_string(),
                        reason: IO_FAILURE_REASON.to_string(),
                    });
                }
            },
            Err(e) => {
                files_rejected.push(RejectedFile {
                    path: name.to_string(),
                    reason: e.reason().to_string(),
                });
            }
        }
    }

    if let Some(ref description) = request.description
        && let Err(e) = fs::write(root.join(DESCRIPTION_FILENAME), description)
    {
        warn!("Failed to write project description: {}", e);
    }

    // Metadata, backup, and history are conventions layered on top of
    // the writes — a failure there does not undo files already on disk.
    if let Err(e) = scaffold.apply(&ScaffoldRequest {
        root: &root,
        project_name: &request.project_name,
        description: request.description.as_deref(),
        files_written: &files_written,
        bundle: &request.files,
    }) {
        warn!("Scaffold step failed for {}: {}", request.project_name, e);
    }

    info!(
        "Materialized {}: {} written, {} rejected",
        request.project_name,
        files_written.len(),
        files_rejected.len()
    );

    Ok(ProjectSummary {
        files_written,
        files_rejected,
        root: root.display().to_string(),
    })
}

/// Check the project root is an absolute path naming a directory (or
/// nothing yet).
fn validate_root(project_path: &str) -> Result<PathBuf, MaterializeError> {
    let trimmed = project_path.trim();
    if trimmed.is_empty() {
        return Err(MaterializeError::TargetNotDirectory);
    }

    let expanded = shellexpand::tilde(trimmed);
    let root = PathBuf::from(expanded.as_ref());
    if !root.is_absolute() {
        return Err(MaterializeError::TargetNotDirectory);
    }

    if root.exists() && !root.is_dir() {
        return Err(MaterializeError::TargetNotDirectory);
    }

    Ok(root)
}

fn write_file(target: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(target, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaffold::ArchiveScaffold;
    use tempfile::TempDir;

    fn test_scaffold(tmp: &TempDir) -> ArchiveScaffold {
        ArchiveScaffold::with_dirs(
            tmp.path().join("archive/backups"),
            tmp.path().join("archive/project_history.jsonl"),
        )
    }

    fn request(root: &Path, files: &[(&str, &str)]) -> ProjectRequest {
        ProjectRequest {
            project_path: root.display().to_string(),
            project_name: "demo".to_string(),
            files: files
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            description: None,
        }
    }

    #[test]
    fn writes_bundle_and_rejects_escapes() {
        let tmp = TempDir::new().unwrap();
        let scaffold = test_scaffold(&tmp);
        let root = tmp.path().join("proj");

        let req = request(&root, &[("a.py", "x=1"), ("../escape.py", "y=2")]);
        let summary = materialize(&req, &scaffold).unwrap();

        assert_eq!(summary.files_written, vec!["a.py"]);
        assert_eq!(summary.files_rejected.len(), 1);
        assert_eq!(summary.files_rejected[0].path, "../escape.py");
        assert_eq!(summary.files_rejected[0].reason, "Traversal");

        assert_eq!(fs::read_to_string(root.join("a.py")).unwrap(), "x=1");
        assert!(!tmp.path().join("escape.py").exists());
    }

    #[test]
    fn creates_intermediate_directories() {
        let tmp = TempDir::new().unwrap();
        let scaffold = test_scaffold(&tmp);
        let root = tmp.path().join("proj");

        let req = request(&root, &[("src/deep/nested/mod.py", "pass")]);
        let summary = materialize(&req, &scaffold).unwrap();

        assert_eq!(summary.files_written, vec!["src/deep/nested/mod.py"]);
        assert_eq!(
            fs::read_to_string(root.join("src/deep/nested/mod.py")).unwrap(),
            "pass"
        );
    }

    #[test]
    fn same_request_twice_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let scaffold = test_scaffold(&tmp);
        let root = tmp.path().join("proj");

        let req = request(&root, &[("a.py", "v2"), ("b.py", "w")]);
        materialize(&req, &scaffold).unwrap();
        let summary = materialize(&req, &scaffold).unwrap();

        assert_eq!(summary.files_written, vec!["a.py", "b.py"]);
        assert_eq!(fs::read_to_string(root.join("a.py")).unwrap(), "v2");

        // Overwritten, not duplicated
        let names: Vec<_> = fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|n| n.ends_with(".py"))
            .collect();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn duplicate_targets_leave_exactly_one_file() {
        let tmp = TempDir::new().unwrap();
        let scaffold = test_scaffold(&tmp);
        let root = tmp.path().join("proj");

        let req = request(&root, &[("x/y.py", "one"), ("x//y.py", "two")]);
        let summary = materialize(&req, &scaffold).unwrap();

        assert_eq!(summary.files_written.len(), 1);
        assert_eq!(summary.files_rejected.len(), 1);
        assert_eq!(summary.files_rejected[0].reason, "DuplicateTarget");
        assert!(root.join("x/y.py").is_file());
    }

    #[test]
    fn existing_file_at_root_fails_whole_request() {
        let tmp = TempDir::new().unwrap();
        let scaffold = test_scaffold(&tmp);
        let root = tmp.path().join("not_a_dir");
        fs::write(&root, "occupied").unwrap();

        let req = request(&root, &[("a.py", "x=1")]);
        let err = materialize(&req, &scaffold).unwrap_err();
        assert!(matches!(err, MaterializeError::TargetNotDirectory));
    }

    #[test]
    fn empty_and_relative_roots_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let scaffold = test_scaffold(&tmp);

        let mut req = request(tmp.path(), &[("a.py", "x=1")]);
        req.project_path = "  ".to_string();
        assert!(matches!(
            materialize(&req, &scaffold).unwrap_err(),
            MaterializeError::TargetNotDirectory
        ));

        req.project_path = "relative/proj".to_string();
        assert!(matches!(
            materialize(&req, &scaffold).unwrap_err(),
            MaterializeError::TargetNotDirectory
        ));
    }

    #[test]
    fn description_lands_next_to_the_files() {
        let tmp = TempDir::new().unwrap();
        let scaffold = test_scaffold(&tmp);
        let root = tmp.path().join("proj");

        let mut req = request(&root, &[("a.py", "x=1")]);
        req.description = Some("does things".to_string());
        materialize(&req, &scaffold).unwrap();

        assert_eq!(
            fs::read_to_string(root.join(DESCRIPTION_FILENAME)).unwrap(),
            "does things"
        );

        // No description, no file
        let root2 = tmp.path().join("proj2");
        let req2 = request(&root2, &[("a.py", "x=1")]);
        materialize(&req2, &scaffold).unwrap();
        assert!(!root2.join(DESCRIPTION_FILENAME).exists());
    }

    #[test]
    fn scaffold_records_the_materialization() {
        let tmp = TempDir::new().unwrap();
        let scaffold = test_scaffold(&tmp);
        let root = tmp.path().join("proj");

        let req = request(&root, &[("a.py", "x=1")]);
        materialize(&req, &scaffold).unwrap();

        let recent = scaffold.recent_projects(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].project_name, "demo");
        assert!(root.join(".codeportal/project.json").exists());
    }
}
