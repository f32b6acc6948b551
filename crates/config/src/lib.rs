//! Configuration loading for mailsync services
//!
//! All services read their settings from one config directory. By default
//! that is ~/.config/mailsync/; setting MAILSYNC_CONFIG_DIR relocates it,
//! which containerized and systemd deployments rely on.
//!
//! Call [`init`] at startup to bootstrap the directory.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::PathBuf;

/// Environment variable that relocates the config directory
pub const CONFIG_DIR_ENV: &str = "MAILSYNC_CONFIG_DIR";

/// Initialize the mailsync config directory, creating it if needed.
/// Call this once at application startup.
pub fn init() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}

/// The mailsync config directory: $MAILSYNC_CONFIG_DIR when set, else
/// ~/.config/mailsync/
pub fn config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|p| p.join("mailsync")),
    }
}

/// The path a config file would have within the config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Whether a config file exists in the config directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

/// Load and parse a JSON config file from the config directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_under_default_dir() {
        // The env override is unset in the test environment
        let path = config_path("sync.json");
        assert!(path.is_some());
        assert!(path.unwrap().ends_with("mailsync/sync.json"));
    }

    #[test]
    fn test_missing_file_does_not_exist() {
        assert!(!config_exists("definitely-not-there.json"));
    }
}
