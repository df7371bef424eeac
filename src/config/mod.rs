//! Service configuration.
//!
//! Persisted as a single JSON document at `<config_dir>/config.json`.
//! The schema is fixed and fully enumerated: unknown fields fail the
//! load instead of being silently ignored. Configuration is read once
//! at process start and is immutable for the process lifetime —
//! editing the file requires a restart to take effect.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::paths::Paths;

pub const BYTES_PER_MB: u64 = 1_048_576;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    /// Expose the service beyond loopback. Requires api_key and allowed_ips.
    #[serde(default)]
    pub public_mode: bool,

    /// Bearer key required in public mode. Supports ${VAR} expansion.
    #[serde(default)]
    pub api_key: String,

    /// Source addresses admitted in public mode.
    #[serde(default)]
    pub allowed_ips: BTreeSet<String>,

    /// Request payload cap in megabytes.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Minutes of inactivity before the process shuts itself down.
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u64,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: OpenAIConfig,

    #[serde(default)]
    pub google: GoogleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAIConfig {
    #[serde(default = "default_openai_model")]
    pub model: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GoogleConfig {
    #[serde(default = "default_google_model")]
    pub model: String,

    #[serde(default = "default_google_base_url")]
    pub base_url: String,
}

// Default value functions
fn default_max_file_size_mb() -> u64 {
    50
}
fn default_idle_timeout_minutes() -> u64 {
    15
}
fn default_port() -> u16 {
    8001
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_openai_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_google_model() -> String {
    "gemini-pro".to_string()
}
fn default_google_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: Paths::default(),
            public_mode: false,
            api_key: String::new(),
            allowed_ips: BTreeSet::new(),
            max_file_size_mb: default_max_file_size_mb(),
            idle_timeout_minutes: default_idle_timeout_minutes(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            model: default_openai_model(),
            base_url: default_openai_base_url(),
        }
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            model: default_google_model(),
            base_url: default_google_base_url(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;
        Self::load_from(paths)
    }

    /// Load from an already-resolved path set (for testing).
    pub fn load_from(paths: Paths) -> Result<Self> {
        let path = paths.config_file();

        if !path.exists() {
            // Create default config file on first run
            let config = Config {
                paths,
                ..Config::default()
            };
            config.save()?;
            eprintln!(
                "Created default config at {}",
                config.paths.config_file().display()
            );
            return Ok(config);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        config.paths = paths;

        // Expand environment variables in the API key
        config.api_key = expand_env(&config.api_key);

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = self.paths.config_file();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    /// Payload cap in bytes.
    pub fn max_payload_bytes(&self) -> u64 {
        self.max_file_size_mb * BYTES_PER_MB
    }

    /// Idle timeout as a duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_minutes * 60)
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["public_mode"] => Ok(self.public_mode.to_string()),
            ["api_key"] => Ok(self.api_key.clone()),
            ["allowed_ips"] => Ok(self
                .allowed_ips
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(",")),
            ["max_file_size_mb"] => Ok(self.max_file_size_mb.to_string()),
            ["idle_timeout_minutes"] => Ok(self.idle_timeout_minutes.to_string()),
            ["server", "port"] => Ok(self.server.port.to_string()),
            ["server", "bind"] => Ok(self.server.bind.clone()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["providers", "openai", "model"] => Ok(self.providers.openai.model.clone()),
            ["providers", "google", "model"] => Ok(self.providers.google.model.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["public_mode"] => self.public_mode = value.parse()?,
            ["api_key"] => self.api_key = value.to_string(),
            ["allowed_ips"] => {
                self.allowed_ips = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }
            ["max_file_size_mb"] => self.max_file_size_mb = value.parse()?,
            ["idle_timeout_minutes"] => self.idle_timeout_minutes = value.parse()?,
            ["server", "port"] => self.server.port = value.parse()?,
            ["server", "bind"] => self.server.bind = value.to_string(),
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["providers", "openai", "model"] => self.providers.openai.model = value.to_string(),
            ["providers", "google", "model"] => self.providers.google.model = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }
}

fn expand_env(s: &str) -> String {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else if let Some(var_name) = s.strip_prefix('$') {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_paths(dir: &std::path::Path) -> Paths {
        Paths {
            config_dir: dir.join("config"),
            data_dir: dir.join("data"),
            state_dir: dir.join("state"),
        }
    }

    #[test]
    fn defaults_are_local_only() {
        let config = Config::default();
        assert!(!config.public_mode);
        assert!(config.api_key.is_empty());
        assert!(config.allowed_ips.is_empty());
        assert_eq!(config.max_file_size_mb, 50);
        assert_eq!(config.idle_timeout_minutes, 15);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 8001);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_str::<Config>(r#"{"public_mode": false, "telnet": true}"#);
        assert!(result.is_err());

        let result =
            serde_json::from_str::<Config>(r#"{"server": {"port": 8001, "socket": "/tmp/x"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_fields_get_defaults() {
        let config: Config = serde_json::from_str(r#"{"public_mode": true}"#).unwrap();
        assert!(config.public_mode);
        assert_eq!(config.max_file_size_mb, 50);
        assert_eq!(config.providers.openai.model, "gpt-3.5-turbo");
        assert_eq!(config.providers.google.model, "gemini-pro");
    }

    #[test]
    fn first_load_writes_default_file_and_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = test_paths(tmp.path());
        paths.ensure_dirs().unwrap();

        let config = Config::load_from(paths.clone()).unwrap();
        assert!(paths.config_file().exists());
        assert!(!config.public_mode);

        // Edit on disk, reload
        let mut edited: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(paths.config_file()).unwrap()).unwrap();
        edited["max_file_size_mb"] = serde_json::json!(5);
        fs::write(paths.config_file(), edited.to_string()).unwrap();

        let reloaded = Config::load_from(paths).unwrap();
        assert_eq!(reloaded.max_file_size_mb, 5);
        assert_eq!(reloaded.max_payload_bytes(), 5 * BYTES_PER_MB);
    }

    #[test]
    fn get_and_set_round_trip() {
        let mut config = Config::default();
        config.set_value("allowed_ips", "10.0.0.5, 10.0.0.6").unwrap();
        assert_eq!(config.get_value("allowed_ips").unwrap(), "10.0.0.5,10.0.0.6");

        config.set_value("idle_timeout_minutes", "30").unwrap();
        assert_eq!(config.idle_timeout(), Duration::from_secs(30 * 60));

        assert!(config.set_value("nope", "1").is_err());
        assert!(config.get_value("nope").is_err());
    }

    #[test]
    fn api_key_env_expansion() {
        // Only the ${VAR} form that misses falls through unchanged
        assert_eq!(expand_env("plain-key"), "plain-key");
        assert_eq!(
            expand_env("${CODEPORTAL_TEST_KEY_THAT_IS_NOT_SET}"),
            "${CODEPORTAL_TEST_KEY_THAT_IS_NOT_SET}"
        );
    }
}
