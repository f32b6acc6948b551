//! Sync engine: the cursor-driven operations that mirror a mailbox
//!
//! Three operations share one ingest path (fetch, parse, label-merge,
//! upsert), all idempotent so any of them can be safely retried:
//! - incremental: applies the provider change log since a checkpoint
//! - recent-first: bounded newest-first backfill with existence dedup
//! - backlog: resumes older backfill in small cooperative batches

mod backlog;
mod incremental;
mod recent;

pub use backlog::{BacklogOutcome, process_backlog};
pub use incremental::{IncrementalOutcome, sync_from_history};
pub use recent::{RecentSyncOutcome, smart_recent_first};

use std::collections::HashSet;

use log::warn;

use crate::models::{MessageId, UserId};
use crate::parser;
use crate::provider::{MailProvider, ProviderError};
use crate::store::RecordStore;

/// Statistics from a sync operation
#[derive(Debug, Default, Clone)]
pub struct SyncStats {
    /// Message ids listed from the provider
    pub listed: usize,
    /// Messages fetched, parsed, and stored
    pub stored: usize,
    /// Messages skipped because they already existed locally
    pub skipped: usize,
    /// Per-message failures (fetch or store)
    pub errors: usize,
    /// Pages walked
    pub pages: usize,
    /// Duration of the operation
    pub duration_ms: u64,
}

impl SyncStats {
    /// Fold another operation's counters into this one
    pub fn merge(&mut self, other: &SyncStats) {
        self.listed += other.listed;
        self.stored += other.stored;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.pages += other.pages;
        self.duration_ms += other.duration_ms;
    }
}

/// Pick the newer of two checkpoints.
///
/// Checkpoints are opaque but ordered. Both sides parsing as integers get
/// a numeric comparison (Gmail-style history ids); anything else falls
/// back to lexicographic, so monotonicity holds for either token style.
pub fn max_checkpoint(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if checkpoint_newer(&b, &a) { b } else { a }),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Whether checkpoint `a` is strictly newer than `b`
pub fn checkpoint_newer(a: &str, b: &str) -> bool {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a > b,
        _ => a > b,
    }
}

/// Fetch one message, normalize it, merge labels against the stored copy,
/// and upsert the index entry and record.
///
/// Returns the message's checkpoint-at-ingest for max tracking. Store
/// failures are logged and swallowed (the pass is still reported as
/// attempted with understated counts); provider failures propagate for the
/// caller to classify.
pub(crate) fn ingest_message(
    provider: &dyn MailProvider,
    records: &dyn RecordStore,
    user: &UserId,
    id: &MessageId,
    local_labels: &HashSet<String>,
) -> Result<Option<String>, ProviderError> {
    let raw = provider.get_message(id)?;
    let mut parsed = parser::parse_message(user, &raw);

    // Additive merge so locally managed labels survive the resync
    match records.get_record(user, id) {
        Ok(Some(existing)) => {
            let merged = parser::merge_labels(&parsed.record.labels, &existing.labels, local_labels);
            parsed.record.labels = merged.clone();
            parsed.entry.labels = merged;
        }
        Ok(None) => {}
        Err(e) => warn!("label merge lookup failed for {user}/{id}: {e:#}"),
    }

    let checkpoint = parsed.record.checkpoint.clone();

    if let Err(e) = records.upsert_index_entry(parsed.entry) {
        warn!("failed to index message {user}/{id}: {e:#}");
    }
    if let Err(e) = records.upsert_record(parsed.record) {
        warn!("failed to store message {user}/{id}: {e:#}");
    }

    Ok(checkpoint)
}

/// Load the user's locally managed label ids, degrading to an empty set
/// on store failure.
pub(crate) fn local_label_ids(records: &dyn RecordStore, user: &UserId) -> HashSet<String> {
    match records.local_label_ids(user) {
        Ok(ids) => ids,
        Err(e) => {
            warn!("failed to load label catalog for {user}: {e:#}");
            HashSet::new()
        }
    }
}
