//! Provider credential store.
//!
//! API keys live in their own JSON document (`api_keys.json` in the
//! data directory), separate from the service configuration: the
//! config is immutable for the process lifetime, while keys may be
//! added or rotated at runtime through `/ai/keys`. Key material is
//! never reported back out — listings only say whether a provider is
//! configured.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use super::Provider;
use crate::paths::Paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderKey {
    #[serde(default)]
    pub api_key: String,
}

/// Handle to the on-disk key store. Cheap to clone.
#[derive(Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new(paths: &Paths) -> Self {
        Self {
            path: paths.keys_file(),
        }
    }

    /// Construct against an explicit file (for testing).
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Write an empty-keyed store on first run so users have a file to
    /// fill in. No-op when the file already exists.
    pub fn init_if_missing(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }

        let mut keys = BTreeMap::new();
        for provider in [Provider::OpenAI, Provider::Google] {
            keys.insert(provider.as_str().to_string(), ProviderKey::default());
        }
        self.save(&keys)
    }

    fn load(&self) -> Result<BTreeMap<String, ProviderKey>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read key store: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid key store: {}", self.path.display()))
    }

    fn save(&self, keys: &BTreeMap<String, ProviderKey>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(keys)?;
        fs::write(&self.path, &content)
            .with_context(|| format!("Failed to write key store: {}", self.path.display()))?;

        // Key material is secret: owner-only on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Stored key for a provider. Empty strings count as absent.
    pub fn get(&self, provider: Provider) -> Result<Option<String>> {
        let keys = self.load()?;
        Ok(keys
            .get(provider.as_str())
            .map(|k| k.api_key.clone())
            .filter(|k| !k.is_empty()))
    }

    /// Set or replace the key for a provider.
    pub fn update(&self, provider: Provider, api_key: &str) -> Result<()> {
        let mut keys = self.load()?;
        keys.entry(provider.as_str().to_string())
            .or_default()
            .api_key = api_key.to_string();
        self.save(&keys)
    }

    /// Configured-or-not flag per provider, without the key material.
    pub fn statuses(&self) -> Result<BTreeMap<String, bool>> {
        let keys = self.load()?;
        let mut statuses = BTreeMap::new();
        for provider in [Provider::OpenAI, Provider::Google] {
            let configured = keys
                .get(provider.as_str())
                .is_some_and(|k| !k.api_key.is_empty());
            statuses.insert(provider.as_str().to_string(), configured);
        }
        Ok(statuses)
    }
}
