//! Config directory shared by the mail library and the vaultd daemon
//!
//! Holds `vaultd.json`, `google-credentials.json` and, unless configured
//! otherwise, the SQLite database. The directory is the platform config
//! dir joined with `mailvault`, or `$MAILVAULT_CONFIG_DIR` when set, which
//! lets a daemon deployment keep its state outside the user's home.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "mailvault";

/// Overrides the platform location when set to a non-empty path
pub const CONFIG_DIR_ENV: &str = "MAILVAULT_CONFIG_DIR";

/// Create the config directory; the daemon calls this before loading anything
pub fn init() -> Result<PathBuf> {
    ensure_config_dir()
}

pub fn config_dir() -> Option<PathBuf> {
    resolve_dir(std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from))
}

fn resolve_dir(override_dir: Option<PathBuf>) -> Option<PathBuf> {
    match override_dir {
        Some(dir) if !dir.as_os_str().is_empty() => Some(dir),
        _ => dirs::config_dir().map(|p| p.join(APP_DIR)),
    }
}

/// `None` only when the platform has no config dir and no override is set
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Parse a required JSON file from the config directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Parse a JSON file at `path`, naming the file in any error
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse an optional JSON file; a missing file is `Ok(None)`, a broken one
/// is still an error
pub fn load_json_opt<T: DeserializeOwned>(filename: &str) -> Result<Option<T>> {
    match config_path(filename) {
        Some(path) if path.exists() => load_json_file(&path).map(Some),
        _ => Ok(None),
    }
}

pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}
