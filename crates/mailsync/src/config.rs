//! Engine tuning knobs
//!
//! Loaded from (in order of priority):
//! 1. JSON file (~/.config/mailsync/sync.json)
//! 2. Environment variable overrides (MAILSYNC_*)
//! 3. Built-in defaults

use log::warn;
use serde::{Deserialize, Serialize};

/// Config filename in the mailsync config directory
const CONFIG_FILE: &str = "sync.json";

/// Tuning knobs for the sync and embedding loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between full sync-loop passes
    pub sync_interval_secs: u64,
    /// Seconds between backlog-loop ticks
    pub backlog_interval_secs: u64,
    /// Target emails ingested per sync run, and the backlog run budget
    pub max_emails_per_batch: usize,
    /// Page size for backlog listing (smaller than recent-first pages)
    pub backlog_page_size: usize,
    /// Pages a single backlog run may walk
    pub backlog_max_pages_per_run: usize,
    /// Entries embedded per pipeline batch
    pub embedding_batch_size: usize,
    /// Change-log pages walked per incremental run
    pub incremental_max_pages: usize,
    /// Restrict syncing to one provider label (e.g. "INBOX")
    pub label_filter: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 300,
            backlog_interval_secs: 180,
            max_emails_per_batch: 100,
            backlog_page_size: 20,
            backlog_max_pages_per_run: 2,
            embedding_batch_size: 32,
            incremental_max_pages: 5,
            label_filter: None,
        }
    }
}

impl SyncConfig {
    /// Load config from file and environment, falling back to defaults
    pub fn load() -> Self {
        let mut config = if config::config_exists(CONFIG_FILE) {
            match config::load_json(CONFIG_FILE) {
                Ok(config) => config,
                Err(e) => {
                    warn!("ignoring unreadable {CONFIG_FILE}: {e:#}");
                    Self::default()
                }
            }
        } else {
            Self::default()
        };
        config.apply_env();
        config
    }

    /// Apply MAILSYNC_* environment overrides
    fn apply_env(&mut self) {
        env_override("MAILSYNC_SYNC_INTERVAL_SECS", &mut self.sync_interval_secs);
        env_override(
            "MAILSYNC_BACKLOG_INTERVAL_SECS",
            &mut self.backlog_interval_secs,
        );
        env_override(
            "MAILSYNC_MAX_EMAILS_PER_BATCH",
            &mut self.max_emails_per_batch,
        );
        env_override("MAILSYNC_BACKLOG_PAGE_SIZE", &mut self.backlog_page_size);
        env_override(
            "MAILSYNC_BACKLOG_MAX_PAGES_PER_RUN",
            &mut self.backlog_max_pages_per_run,
        );
        env_override(
            "MAILSYNC_EMBEDDING_BATCH_SIZE",
            &mut self.embedding_batch_size,
        );
        env_override(
            "MAILSYNC_INCREMENTAL_MAX_PAGES",
            &mut self.incremental_max_pages,
        );
        if let Ok(label) = std::env::var("MAILSYNC_LABEL_FILTER") {
            self.label_filter = if label.is_empty() { None } else { Some(label) };
        }
    }
}

fn env_override<T: std::str::FromStr>(name: &str, slot: &mut T) {
    if let Ok(value) = std::env::var(name) {
        match value.parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!("ignoring unparseable {name}={value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_knobs() {
        let config = SyncConfig::default();
        assert_eq!(config.sync_interval_secs, 300);
        assert_eq!(config.backlog_interval_secs, 180);
        assert_eq!(config.backlog_page_size, 20);
        assert_eq!(config.backlog_max_pages_per_run, 2);
        assert!(config.label_filter.is_none());
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"max_emails_per_batch": 250}"#).unwrap();
        assert_eq!(config.max_emails_per_batch, 250);
        assert_eq!(config.backlog_page_size, 20);
    }
}
