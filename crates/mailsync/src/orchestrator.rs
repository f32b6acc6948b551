//! Periodic sync orchestration
//!
//! Two independent loops, each iterating known users sequentially:
//! - the sync loop runs incremental-then-recent sync per user, persists
//!   checkpoint/backlog state, then drives one embedding batch
//! - the backlog loop gives each user with a pending cursor one small
//!   backlog run
//!
//! All state lives on this context object; failures are isolated per user
//! and never abort a loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::embed::EmbeddingPipeline;
use crate::models::{SyncStateUpdate, UserId};
use crate::provider::{ProviderError, SessionFactory};
use crate::store::{RecordStore, SyncStateStore};
use crate::sync::{
    SyncStats, max_checkpoint, process_backlog, smart_recent_first, sync_from_history,
};
use crate::vector::VectorStore;

/// Best-effort result of one user's sync pass. Partial syncs still report
/// `synced: true` with whatever counts were achieved; only auth and
/// whole-pass failures report false.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub user_id: UserId,
    pub synced: bool,
    pub record_count: usize,
    pub stats: SyncStats,
    pub error: Option<String>,
}

impl SyncReport {
    fn failure(user_id: UserId, error: impl Into<String>) -> Self {
        Self {
            user_id,
            synced: false,
            record_count: 0,
            stats: SyncStats::default(),
            error: Some(error.into()),
        }
    }
}

/// Owns the engine's collaborators and drives the periodic loops
pub struct Orchestrator {
    sessions: Arc<dyn SessionFactory>,
    records: Arc<dyn RecordStore>,
    states: Arc<dyn SyncStateStore>,
    vectors: Arc<dyn VectorStore>,
    pipeline: EmbeddingPipeline,
    config: SyncConfig,
    users: RwLock<Vec<UserId>>,
    shutdown: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        records: Arc<dyn RecordStore>,
        states: Arc<dyn SyncStateStore>,
        vectors: Arc<dyn VectorStore>,
        pipeline: EmbeddingPipeline,
        config: SyncConfig,
    ) -> Self {
        Self {
            sessions,
            records,
            states,
            vectors,
            pipeline,
            config,
            users: RwLock::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Add a user to the set both loops iterate
    pub fn register_user(&self, user: UserId) {
        let mut users = self.users.write().unwrap();
        if !users.contains(&user) {
            users.push(user);
        }
    }

    pub fn users(&self) -> Vec<UserId> {
        self.users.read().unwrap().clone()
    }

    /// Ask both loops to stop before their next sleep
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// One user's full sync pass: incremental (when a checkpoint exists),
    /// then recent-first, one state upsert, then an embedding batch.
    ///
    /// This is also the on-demand "sync now" entry point for callers
    /// outside the loops; it shares the loops' in-process serialization.
    pub fn sync_user(&self, user: &UserId) -> SyncReport {
        debug!("sync pass for {user}");

        let session = match self.sessions.session(user) {
            Ok(session) => session,
            Err(e) => {
                warn!("cannot open session for {user}: {e}");
                return SyncReport::failure(user.clone(), e.to_string());
            }
        };

        let state = match self.states.get(user) {
            Ok(state) => state,
            Err(e) => {
                warn!("cannot read sync state for {user}: {e:#}");
                None
            }
        };
        let label_filter = self.config.label_filter.as_deref();

        let mut stats = SyncStats::default();
        let mut latest: Option<String> = None;

        // Incremental first, so the change log is drained before the
        // newest-first window moves
        if let Some(checkpoint) = state.as_ref().and_then(|s| s.checkpoint.clone()) {
            match sync_from_history(
                session.as_ref(),
                self.records.as_ref(),
                user,
                &checkpoint,
                label_filter,
                self.config.incremental_max_pages,
            ) {
                Ok(outcome) => {
                    stats.merge(&outcome.stats);
                    latest = Some(outcome.checkpoint);
                }
                Err(ProviderError::CheckpointExpired) => {
                    info!("checkpoint expired for {user}; relying on recent-first sync");
                }
                Err(e) if e.is_auth() => {
                    return SyncReport::failure(user.clone(), e.to_string());
                }
                Err(e) => {
                    warn!("incremental sync failed for {user}: {e}");
                }
            }
        }

        // Always run recent-first: it ingests new mail and detects backlog
        let recent = match smart_recent_first(
            session.as_ref(),
            self.records.as_ref(),
            user,
            label_filter,
            self.config.max_emails_per_batch,
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("recent-first sync failed for {user}: {e}");
                return SyncReport::failure(user.clone(), e.to_string());
            }
        };
        stats.merge(&recent.stats);
        latest = max_checkpoint(latest, recent.checkpoint.clone());

        // Single state write per pass
        let mut update = SyncStateUpdate {
            last_synced_at: Some(Utc::now()),
            ..Default::default()
        };
        if let Some(checkpoint) = latest {
            update.checkpoint = Some(checkpoint);
        }
        let backlog_pending = state.as_ref().is_some_and(|s| s.has_backlog());
        match &recent.backlog_cursor {
            Some(cursor) => {
                update.backlog_cursor = Some(Some(cursor.clone()));
            }
            None if !backlog_pending => {
                // Nothing beyond this run's window and no backlog pending
                update.full_sync_completed = Some(true);
            }
            None => {
                // An older cursor is still being worked through; leave it
            }
        }
        if let Err(e) = self.states.upsert(user, update) {
            warn!("failed to persist sync state for {user}: {e:#}");
        }

        // Feed the semantic index with whatever this pass ingested
        match self
            .pipeline
            .process_batch(user, self.records.as_ref(), self.vectors.as_ref())
        {
            Ok(embedded) if embedded > 0 => debug!("embedded {embedded} entries for {user}"),
            Ok(_) => {}
            Err(e) => warn!("embedding batch failed for {user}: {e:#}"),
        }

        let record_count = self.records.count_records(user).unwrap_or_else(|e| {
            warn!("cannot count records for {user}: {e:#}");
            0
        });

        SyncReport {
            user_id: user.clone(),
            synced: true,
            record_count,
            stats,
            error: None,
        }
    }

    /// Sync every registered user sequentially. One user's failure never
    /// touches the next user's pass.
    pub fn sync_all_users(&self) {
        let users = self.users();
        let mut succeeded = 0usize;
        let mut failed = 0usize;

        for user in &users {
            let report = self.sync_user(user);
            if report.synced {
                succeeded += 1;
                info!(
                    "synced {user}: {} records total, {} new this pass",
                    report.record_count, report.stats.stored
                );
            } else {
                failed += 1;
                warn!(
                    "sync failed for {user}: {}",
                    report.error.as_deref().unwrap_or("unknown error")
                );
            }
        }

        info!("sync pass over {} users: {succeeded} ok, {failed} failed", users.len());
    }

    /// Give each user with a pending cursor one backlog run
    pub fn process_backlog_tick(&self) {
        let users = match self.states.users_with_backlog() {
            Ok(users) => users,
            Err(e) => {
                error!("cannot list users with backlog: {e:#}");
                return;
            }
        };
        if users.is_empty() {
            debug!("no users with pending backlog");
            return;
        }

        for user in users {
            let session = match self.sessions.session(&user) {
                Ok(session) => session,
                Err(e) => {
                    warn!("cannot open session for {user}: {e}");
                    continue;
                }
            };
            match process_backlog(
                session.as_ref(),
                self.records.as_ref(),
                self.states.as_ref(),
                &user,
                self.config.backlog_page_size,
                self.config.backlog_max_pages_per_run,
                self.config.max_emails_per_batch,
            ) {
                Ok(outcome) => {
                    if outcome.stats.stored > 0 {
                        info!(
                            "backlog run for {user}: {} stored, remaining={}",
                            outcome.stats.stored, outcome.backlog_remaining
                        );
                    }
                }
                Err(e) => warn!("backlog run failed for {user}: {e:#}"),
            }
        }
    }

    /// The sync loop body: runs until shutdown is requested
    pub fn run_sync_loop(&self) {
        info!(
            "sync loop started, interval {}s",
            self.config.sync_interval_secs
        );
        let mut run = 0u64;
        while !self.is_shutdown() {
            run += 1;
            let started = Instant::now();
            self.sync_all_users();
            debug!(
                "sync run #{run} finished in {:.2}s",
                started.elapsed().as_secs_f64()
            );
            self.sleep(self.config.sync_interval_secs);
        }
        info!("sync loop stopped after {run} runs");
    }

    /// The backlog loop body: runs until shutdown is requested
    pub fn run_backlog_loop(&self) {
        info!(
            "backlog loop started, interval {}s",
            self.config.backlog_interval_secs
        );
        let mut run = 0u64;
        while !self.is_shutdown() {
            run += 1;
            let started = Instant::now();
            self.process_backlog_tick();
            debug!(
                "backlog run #{run} finished in {:.2}s",
                started.elapsed().as_secs_f64()
            );
            self.sleep(self.config.backlog_interval_secs);
        }
        info!("backlog loop stopped after {run} runs");
    }

    /// Spawn both loops on background threads
    pub fn spawn(self: &Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let sync = {
            let this = Arc::clone(self);
            std::thread::spawn(move || this.run_sync_loop())
        };
        let backlog = {
            let this = Arc::clone(self);
            std::thread::spawn(move || this.run_backlog_loop())
        };
        (sync, backlog)
    }

    /// Sleep in one-second slices so shutdown is honored promptly
    fn sleep(&self, secs: u64) {
        for _ in 0..secs {
            if self.is_shutdown() {
                return;
            }
            std::thread::sleep(Duration::from_secs(1));
        }
    }
}
