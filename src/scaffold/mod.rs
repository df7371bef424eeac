//! Project structure conventions.
//!
//! The materializer delegates metadata, backup, and history placement
//! to a [`ProjectScaffold`] implementation. The default
//! [`ArchiveScaffold`] keeps a per-project metadata file inside the
//! project, a backup copy of each submitted bundle under the archive
//! directory, and an append-only JSONL project history (one object per
//! line) that backs the recent-projects listing.

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::paths::Paths;

/// Directory inside the project root holding CodePortal metadata.
pub const METADATA_DIR: &str = ".codeportal";

/// Metadata filename inside [`METADATA_DIR`].
pub const METADATA_FILENAME: &str = "project.json";

/// Everything a scaffold needs to know about one materialized project.
pub struct ScaffoldRequest<'a> {
    pub root: &'a Path,
    pub project_name: &'a str,
    pub description: Option<&'a str>,
    /// Relative paths actually written, as supplied by the caller.
    pub files_written: &'a [String],
    /// The full bundle as submitted (backup source).
    pub bundle: &'a BTreeMap<String, String>,
}

/// Structural/documentation conventions applied after a bundle lands.
pub trait ProjectScaffold: Send + Sync {
    /// Record metadata, back up the bundle, and log the project.
    fn apply(&self, request: &ScaffoldRequest<'_>) -> Result<()>;

    /// Most recent projects, newest first.
    fn recent_projects(&self, limit: usize) -> Result<Vec<HistoryEntry>>;
}

/// Metadata written to `<root>/.codeportal/project.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// ISO 8601 timestamp of the last materialization.
    pub updated_at: String,
    pub files: Vec<String>,
}

/// One line of the project history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub uid: String,
    pub project_name: String,
    pub root: String,
    pub files: Vec<String>,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Default scaffold backed by the archive directory.
#[derive(Clone)]
pub struct ArchiveScaffold {
    backups_dir: PathBuf,
    history_file: PathBuf,
}

impl ArchiveScaffold {
    pub fn new(paths: &Paths) -> Self {
        Self {
            backups_dir: paths.backups_dir(),
            history_file: paths.history_file(),
        }
    }

    /// Construct against explicit directories (for testing).
    pub fn with_dirs(backups_dir: PathBuf, history_file: PathBuf) -> Self {
        Self {
            backups_dir,
            history_file,
        }
    }

    fn write_metadata(&self, request: &ScaffoldRequest<'_>) -> Result<()> {
        let dir = request.root.join(METADATA_DIR);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let metadata = ProjectMetadata {
            name: request.project_name.to_string(),
            description: request.description.map(str::to_string),
            updated_at: Local::now().to_rfc3339(),
            files: request.files_written.to_vec(),
        };

        let path = dir.join(METADATA_FILENAME);
        fs::write(&path, serde_json::to_string_pretty(&metadata)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }

    /// Back up the submitted bundle as a single JSON document keyed by uid.
    fn write_backup(&self, uid: &str, bundle: &BTreeMap<String, String>) -> Result<()> {
        fs::create_dir_all(&self.backups_dir)
            .with_context(|| format!("Failed to create {}", self.backups_dir.display()))?;

        let path = self.backups_dir.join(format!("{}.json", uid));
        fs::write(&path, serde_json::to_string_pretty(bundle)?)
            .with_context(|| format!("Failed to write backup {}", path.display()))?;

        Ok(())
    }

    fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        if let Some(parent) = self.history_file.parent() {
            fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(entry)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_file)
            .with_context(|| format!("Failed to open {}", self.history_file.display()))?;
        writeln!(file, "{}", line)?;

        Ok(())
    }
}

impl ProjectScaffold for ArchiveScaffold {
    fn apply(&self, request: &ScaffoldRequest<'_>) -> Result<()> {
        let uid = uuid::Uuid::new_v4().to_string();

        self.write_metadata(request)?;
        self.write_backup(&uid, request.bundle)?;
        self.append_history(&HistoryEntry {
            uid: uid.clone(),
            project_name: request.project_name.to_string(),
            root: request.root.display().to_string(),
            files: request.files_written.to_vec(),
            date: Local::now().to_rfc3339(),
            description: request.description.map(str::to_string),
        })?;

        debug!("Archived project {} as {}", request.project_name, uid);
        Ok(())
    }

    fn recent_projects(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        if !self.history_file.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.history_file)
            .with_context(|| format!("Failed to read {}", self.history_file.display()))?;

        // Corrupted lines are skipped rather than poisoning the listing
        let mut entries: Vec<HistoryEntry> = content
            .lines()
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        entries.reverse(); // newest first
        entries.truncate(limit);
        Ok(entries)
    }
}
