//! XDG Base Directory Specification compliant path resolution.
//!
//! Every directory is resolved through a three-level fallback:
//! 1. CodePortal-specific env var (CODEPORTAL_CONFIG_DIR, etc.)
//! 2. XDG env var (XDG_CONFIG_HOME, etc.) via `etcetera`
//! 3. Platform default (~/.config, etc.)
//!
//! All paths are absolute. Relative paths from env vars are ignored per XDG spec.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Resolved directory paths for the entire application.
///
/// Created once at startup, threaded through Config.
/// All paths are absolute.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Config directory: config.json lives here
    pub config_dir: PathBuf,

    /// Data directory root: contains the project archive and api_keys.json
    pub data_dir: PathBuf,

    /// State directory: logs
    pub state_dir: PathBuf,
}

impl Paths {
    /// Resolve all paths using real environment variables.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with_env(|key| std::env::var(key))
    }

    /// Resolve paths with a custom env var lookup (for testing).
    pub fn resolve_with_env<F>(env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        use etcetera::BaseStrategy;

        let strategy = etcetera::choose_base_strategy()
            .map_err(|e| anyhow::anyhow!("Failed to determine base directories: {}", e))?;

        let config_dir = env_or(&env_fn, "CODEPORTAL_CONFIG_DIR", || {
            strategy.config_dir().join("codeportal")
        });

        let data_dir = env_or(&env_fn, "CODEPORTAL_DATA_DIR", || {
            strategy.data_dir().join("codeportal")
        });

        let state_dir = env_or(&env_fn, "CODEPORTAL_STATE_DIR", || {
            // state_dir() returns data_dir() as fallback on platforms without XDG_STATE_HOME.
            let base_state = strategy.state_dir().unwrap_or_else(|| strategy.data_dir());
            base_state.join("codeportal")
        });

        Ok(Self {
            config_dir,
            data_dir,
            state_dir,
        })
    }

    // ── Convenience accessors for specific files ──

    /// Config file: config_dir/config.json
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    /// Provider key store: data_dir/api_keys.json
    pub fn keys_file(&self) -> PathBuf {
        self.data_dir.join("api_keys.json")
    }

    /// Project archive root: data_dir/archive
    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive")
    }

    /// Bundle backups: data_dir/archive/backups
    pub fn backups_dir(&self) -> PathBuf {
        self.archive_dir().join("backups")
    }

    /// Project history log: data_dir/archive/project_history.jsonl
    pub fn history_file(&self) -> PathBuf {
        self.archive_dir().join("project_history.jsonl")
    }

    /// Logs directory
    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    /// Create all directories with appropriate permissions.
    pub fn ensure_dirs(&self) -> Result<()> {
        let dirs = [
            self.config_dir.clone(),
            self.data_dir.clone(),
            self.state_dir.clone(),
            self.archive_dir(),
            self.backups_dir(),
        ];

        for dir in &dirs {
            create_dir_with_mode(dir)?;
        }

        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::resolve().unwrap_or_else(|_| {
            // Emergency fallback — should never happen in practice
            let home = etcetera::home_dir().unwrap_or_else(|_| PathBuf::from("."));
            Self {
                config_dir: home.join(".config").join("codeportal"),
                data_dir: home.join(".local").join("share").join("codeportal"),
                state_dir: home.join(".local").join("state").join("codeportal"),
            }
        })
    }
}

/// Resolve an env var with fallback. Ignores empty and relative paths per XDG spec.
fn env_or<F>(env_fn: &F, var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    env_fn(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .filter(|p| p.is_absolute()) // XDG spec: ignore relative paths
        .unwrap_or_else(default)
}

/// Create a directory with mode 0700 per XDG spec.
fn create_dir_with_mode(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Helper: build an env_fn from a HashMap
    fn make_env(
        map: HashMap<&str, &str>,
    ) -> impl Fn(&str) -> std::result::Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key)
                .map(|v| v.to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn default_paths_are_xdg_compliant() {
        let env: HashMap<&str, &str> = HashMap::new();
        let paths = Paths::resolve_with_env(make_env(env)).unwrap();

        assert!(
            paths.config_dir.ends_with("codeportal"),
            "config_dir: {:?}",
            paths.config_dir
        );
        assert!(
            paths.data_dir.ends_with("codeportal"),
            "data_dir: {:?}",
            paths.data_dir
        );
        assert!(
            paths.state_dir.ends_with("codeportal"),
            "state_dir: {:?}",
            paths.state_dir
        );
    }

    #[test]
    fn codeportal_env_vars_override_xdg() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("CODEPORTAL_CONFIG_DIR", "/custom/config");
        env.insert("CODEPORTAL_DATA_DIR", "/custom/data");
        env.insert("CODEPORTAL_STATE_DIR", "/custom/state");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert_eq!(paths.config_dir, PathBuf::from("/custom/config"));
        assert_eq!(paths.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(paths.state_dir, PathBuf::from("/custom/state"));
    }

    #[test]
    fn relative_paths_are_ignored() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("CODEPORTAL_CONFIG_DIR", "relative/path");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        // Should fall back to XDG default, not use relative path
        assert!(paths.config_dir.is_absolute());
        assert_ne!(paths.config_dir, PathBuf::from("relative/path"));
    }

    #[test]
    fn empty_env_vars_ignored() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("CODEPORTAL_DATA_DIR", "");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert!(paths.data_dir.is_absolute());
        assert!(paths.data_dir.ends_with("codeportal"));
    }

    #[test]
    fn convenience_accessors() {
        let env: HashMap<&str, &str> = HashMap::new();
        let paths = Paths::resolve_with_env(make_env(env)).unwrap();

        assert!(paths.config_file().ends_with("config.json"));
        assert!(paths.keys_file().ends_with("api_keys.json"));
        assert!(paths.archive_dir().ends_with("archive"));
        assert!(paths.backups_dir().ends_with("archive/backups"));
        assert!(
            paths
                .history_file()
                .ends_with("archive/project_history.jsonl")
        );
        assert!(paths.logs_dir().ends_with("logs"));
    }
}
