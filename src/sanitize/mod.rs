//! Bundle path sanitization.
//!
//! Every filename in a bundle is adversarial input. Sanitization is
//! purely lexical — `.` and `..` segments are resolved without touching
//! the filesystem — and the resolved path is confined to the project
//! root by construction. A path that would escape the root is rejected,
//! never clamped.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PathError {
    /// Absolute path, or `..` segments resolving above the project root.
    #[error("path escapes the project root")]
    Traversal,

    /// Empty name, null byte, or a path that resolves to no file at all.
    #[error("path is not a valid file name")]
    InvalidName,

    /// A second bundle key normalized to an already-claimed target.
    #[error("path collides with another bundle entry")]
    DuplicateTarget,
}

impl PathError {
    /// Wire-level reason string, stable across releases.
    pub fn reason(&self) -> &'static str {
        match self {
            PathError::Traversal => "Traversal",
            PathError::InvalidName => "InvalidName",
            PathError::DuplicateTarget => "DuplicateTarget",
        }
    }
}

/// Resolve one client-supplied relative path under `project_root`.
///
/// On success the returned path always has `project_root` as a prefix.
pub fn sanitize(relative_path: &str, project_root: &Path) -> Result<PathBuf, PathError> {
    if relative_path.is_empty() || relative_path.contains('\0') {
        return Err(PathError::InvalidName);
    }

    let candidate = Path::new(relative_path);
    if candidate.is_absolute() {
        return Err(PathError::Traversal);
    }

    // Lexical resolution: `.` drops, `..` pops, underflow is an escape.
    let mut resolved: Vec<&std::ffi::OsStr> = Vec::new();
    for component in candidate.components() {
        match component {
            Component::Normal(segment) => resolved.push(segment),
            Component::CurDir => {}
            Component::ParentDir => {
                if resolved.pop().is_none() {
                    return Err(PathError::Traversal);
                }
            }
            // RootDir/Prefix only occur in absolute paths, handled above,
            // but Windows prefixes can slip through is_absolute on Unix.
            Component::RootDir | Component::Prefix(_) => return Err(PathError::Traversal),
        }
    }

    if resolved.is_empty() {
        // "." and "a/.." name the root itself, not a file in it
        return Err(PathError::InvalidName);
    }

    let mut target = project_root.to_path_buf();
    for segment in resolved {
        target.push(segment);
    }

    debug_assert!(target.starts_with(project_root));
    Ok(target)
}

/// Resolve a whole bundle, detecting colliding targets.
///
/// Entries are processed in sorted key order; the first key claiming a
/// resolved target wins and any later key normalizing to the same
/// target is rejected with `DuplicateTarget`. Returns one result per
/// input key, in the same sorted order.
pub fn resolve_bundle<'a>(
    files: &'a BTreeMap<String, String>,
    project_root: &Path,
) -> Vec<(&'a str, Result<PathBuf, PathError>)> {
    let mut claimed: HashSet<PathBuf> = HashSet::new();
    let mut results = Vec::with_capacity(files.len());

    for name in files.keys() {
        let result = match sanitize(name, project_root) {
            Ok(target) => {
                if claimed.insert(target.clone()) {
                    Ok(target)
                } else {
                    Err(PathError::DuplicateTarget)
                }
            }
            Err(e) => Err(e),
        };
        results.push((name.as_str(), result));
    }

    results
}
