//! mailsyncd - headless mailbox sync daemon
//!
//! Loads credentials and tuning from ~/.config/mailsync/, wires the engine
//! together (SQLite store, HTTP provider, embedding service), and runs the
//! sync and backlog loops until the process is stopped.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Deserialize;

use mailsync::{
    EmbeddingPipeline, HttpEmbedder, HttpSessionFactory, InMemoryVectorStore, Orchestrator,
    SqliteStore, StaticTokenSource, SyncConfig, UserId,
};

/// Daemon config filename in the mailsync config directory
const DAEMON_CONFIG_FILE: &str = "mailsyncd.json";

/// Database filename in the mailsync config directory
const DATABASE_FILE: &str = "mail.db";

/// Accounts and service endpoints for one daemon instance
#[derive(Debug, Deserialize)]
struct DaemonConfig {
    /// Provider API base URL
    #[serde(default = "default_base_url")]
    provider_base_url: String,
    /// Embedding service base URL
    embedding_endpoint: String,
    /// Embedding model identifier
    #[serde(default = "default_embedding_model")]
    embedding_model: String,
    /// Users to sync, with their provisioned access tokens
    users: Vec<UserEntry>,
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    id: String,
    access_token: String,
}

fn default_base_url() -> String {
    mailsync::DEFAULT_BASE_URL.to_string()
}

fn default_embedding_model() -> String {
    "paraphrase-multilingual-MiniLM-L12-v2".to_string()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config_dir = config::init().context("Failed to initialize config directory")?;

    let daemon_config: DaemonConfig = config::load_json(DAEMON_CONFIG_FILE).with_context(|| {
        format!(
            "Failed to load daemon config; place accounts at {}",
            config_dir.join(DAEMON_CONFIG_FILE).display()
        )
    })?;
    if daemon_config.users.is_empty() {
        warn!("no users configured; the loops will idle");
    }

    let sync_config = SyncConfig::load();
    info!(
        "starting mailsyncd: {} users, sync every {}s, backlog every {}s",
        daemon_config.users.len(),
        sync_config.sync_interval_secs,
        sync_config.backlog_interval_secs
    );

    let store = Arc::new(
        SqliteStore::new(config_dir.join(DATABASE_FILE)).context("Failed to open mail database")?,
    );

    let tokens: HashMap<String, String> = daemon_config
        .users
        .iter()
        .map(|u| (u.id.clone(), u.access_token.clone()))
        .collect();
    let sessions = Arc::new(HttpSessionFactory::new(
        daemon_config.provider_base_url.clone(),
        Box::new(StaticTokenSource::new(tokens)),
    ));

    let embedder = Arc::new(HttpEmbedder::new(
        daemon_config.embedding_endpoint.clone(),
        daemon_config.embedding_model.clone(),
    ));
    let pipeline = EmbeddingPipeline::new(embedder, sync_config.embedding_batch_size);

    // Vectors are rebuilt lazily from the canonical store on first query,
    // so an in-process index survives restarts well enough for a daemon.
    let vectors = Arc::new(InMemoryVectorStore::new());

    let orchestrator = Arc::new(Orchestrator::new(
        sessions,
        store.clone(),
        store,
        vectors,
        pipeline,
        sync_config,
    ));
    for user in &daemon_config.users {
        orchestrator.register_user(UserId::new(&user.id));
    }

    let (sync_loop, backlog_loop) = orchestrator.spawn();
    info!("mailsyncd started");

    sync_loop.join().ok();
    backlog_loop.join().ok();
    Ok(())
}
