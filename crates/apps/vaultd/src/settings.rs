//! Daemon configuration
//!
//! Loaded from `vaultd.json` in the Mailvault config directory, then
//! overridden by `VAULTD_*` environment variables.

use anyhow::{Context, Result};
use mail::{AesGcmEncryptor, SyncOptions};
use serde::Deserialize;
use std::path::PathBuf;

/// Config filename in the Mailvault config directory
const CONFIG_FILE: &str = "vaultd.json";

/// Default database filename, placed next to the config file
const DATABASE_FILE: &str = "mailvault.db";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Socket address to listen on
    pub bind_addr: String,
    /// SQLite database path; defaults to the config directory
    pub database_path: Option<PathBuf>,
    /// Base64-encoded 32-byte AES key for stored message fields
    pub encryption_key: Option<String>,
    /// Pipeline tunables
    pub sync: SyncOptions,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            database_path: None,
            encryption_key: None,
            sync: SyncOptions::default(),
        }
    }
}

impl DaemonConfig {
    /// Load the config file (if any) and apply environment overrides
    pub fn load() -> Result<Self> {
        let config = config::load_json_opt::<Self>(CONFIG_FILE)?.unwrap_or_default();
        Ok(config.with_env(|key| std::env::var(key).ok()))
    }

    /// Apply `VAULTD_*` overrides read through `lookup`
    fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(addr) = lookup("VAULTD_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(path) = lookup("VAULTD_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(key) = lookup("VAULTD_ENCRYPTION_KEY") {
            self.encryption_key = Some(key);
        }
        self
    }

    /// Resolve the database location
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => config::config_path(DATABASE_FILE).context("Could not determine config directory"),
        }
    }

    /// Build the field encryptor from the configured key
    pub fn encryptor(&self) -> Result<AesGcmEncryptor> {
        let key = self.encryption_key.as_deref().context(
            "No encryption key configured; set VAULTD_ENCRYPTION_KEY or \"encryption_key\" in vaultd.json",
        )?;
        AesGcmEncryptor::from_base64_key(key).context("Invalid encryption key")
    }
}
