//! Cooperative backlog processing
//!
//! Resumes the older-mail backfill from the saved cursor in small batches,
//! so a background tick never runs long. The cursor is read once and
//! advanced at the end of the run; the orchestrator guarantees one run per
//! user at a time within the process.

use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, warn};

use super::{SyncStats, ingest_message, local_label_ids};
use crate::models::{MessageId, SyncStateUpdate, UserId};
use crate::provider::{MailProvider, ProviderError};
use crate::store::{RecordStore, SyncStateStore};

/// Result of one backlog run
#[derive(Debug, Clone, Default)]
pub struct BacklogOutcome {
    pub stats: SyncStats,
    /// Whether a cursor remains after this run
    pub backlog_remaining: bool,
}

/// Process up to `max_pages` of backlog for one user.
///
/// No-op when the user has no saved cursor. Pages use the (deliberately
/// small) `page_size` and the same existence-dedup ingest path as
/// recent-first sync. The run yields early once `max_batch` messages have
/// been ingested, persisting the next token; when the final page is
/// consumed the cursor is cleared and the mailbox is marked fully synced.
pub fn process_backlog(
    provider: &dyn MailProvider,
    records: &dyn RecordStore,
    states: &dyn SyncStateStore,
    user: &UserId,
    page_size: usize,
    max_pages: usize,
    max_batch: usize,
) -> Result<BacklogOutcome> {
    let start = Instant::now();
    let mut outcome = BacklogOutcome::default();

    let Some(state) = states.get(user)? else {
        debug!("no sync state for {user}, nothing to process");
        return Ok(outcome);
    };
    let Some(cursor) = state.backlog_cursor else {
        debug!("no backlog cursor for {user}, nothing to process");
        return Ok(outcome);
    };

    info!("backlog run for {user}: max_pages={max_pages}, page_size={page_size}");

    let local_labels = local_label_ids(records, user);
    let mut page_token = Some(cursor);

    while outcome.stats.pages < max_pages {
        let Some(token) = page_token.clone() else {
            break;
        };

        let page = match provider.list_message_ids(None, Some(&token), page_size) {
            Ok(page) => page,
            Err(e) => {
                // Keep the cursor where it was; retried next tick
                error!("backlog listing failed for {user}: {e}");
                outcome.stats.errors += 1;
                break;
            }
        };

        let refs = page.refs();
        if refs.is_empty() {
            info!("backlog exhausted for {user}");
            page_token = None;
            break;
        }
        outcome.stats.listed += refs.len();

        let ids: Vec<MessageId> = refs.iter().map(|r| MessageId::new(&r.id)).collect();
        let existing = match records.existing_ids(user, &ids) {
            Ok(existing) => existing,
            Err(e) => {
                warn!("existence check failed for {user}: {e:#}");
                Default::default()
            }
        };
        outcome.stats.skipped += existing.len();

        for id in ids.iter().filter(|id| !existing.contains(id)) {
            match ingest_message(provider, records, user, id, &local_labels) {
                Ok(_) => outcome.stats.stored += 1,
                Err(e @ ProviderError::Auth(_)) => return Err(e.into()),
                Err(e) => {
                    outcome.stats.errors += 1;
                    warn!("skipping backlog message {user}/{id}: {e}");
                }
            }
        }

        page_token = page.next_page_token;
        outcome.stats.pages += 1;

        // Cooperative yield once the global batch budget is spent
        if outcome.stats.stored >= max_batch {
            info!("backlog budget reached for {user} ({max_batch}); yielding");
            break;
        }
    }

    // Advance or clear the cursor in one state write
    let mut update = SyncStateUpdate {
        backlog_last_processed_at: Some(Utc::now()),
        ..Default::default()
    };
    match &page_token {
        Some(token) => {
            debug!("backlog cursor advanced for {user}");
            update.backlog_cursor = Some(Some(token.clone()));
            outcome.backlog_remaining = true;
        }
        None => {
            info!("backlog complete for {user}");
            update.backlog_cursor = Some(None);
            update.full_sync_completed = Some(true);
        }
    }
    states.upsert(user, update)?;

    outcome.stats.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "backlog run for {user} done: {} stored, {} skipped, {} errors, {} pages",
        outcome.stats.stored, outcome.stats.skipped, outcome.stats.errors, outcome.stats.pages
    );

    Ok(outcome)
}
