//! Bounded newest-first backfill with existence dedup

use std::time::Instant;

use log::{debug, error, info, warn};

use super::{SyncStats, ingest_message, local_label_ids, max_checkpoint};
use crate::models::{MessageId, UserId};
use crate::provider::{MailProvider, ProviderError};
use crate::store::RecordStore;

/// Provider page size ceiling for recent-first listing
const LIST_PAGE_SIZE: usize = 100;

/// Result of a recent-first sync run
#[derive(Debug, Clone, Default)]
pub struct RecentSyncOutcome {
    /// Newest checkpoint observed across ingested messages, if any
    pub checkpoint: Option<String>,
    /// Next-page token left over when the run stopped; becomes the
    /// persisted backlog cursor
    pub backlog_cursor: Option<String>,
    pub stats: SyncStats,
}

/// Sync newest messages first, up to `max_count` ingested this run.
///
/// Each listed page is batch-checked against the local store so only
/// missing messages are fetched and parsed; repeated runs over an
/// unchanged mailbox do no redundant fetch work. If pages remain when the
/// run stops, the next-page token is returned as the backlog cursor, the
/// sole trigger for backlog processing.
///
/// A listing failure stops the loop early without propagating; a
/// per-message failure is counted and skipped. Only auth failures abort.
pub fn smart_recent_first(
    provider: &dyn MailProvider,
    records: &dyn RecordStore,
    user: &UserId,
    label_filter: Option<&str>,
    max_count: usize,
) -> Result<RecentSyncOutcome, ProviderError> {
    let start = Instant::now();
    let mut outcome = RecentSyncOutcome::default();
    let local_labels = local_label_ids(records, user);

    // At least 5 pages so a backlog is detected even for small targets
    let max_pages = (max_count.div_ceil(LIST_PAGE_SIZE) + 1).clamp(5, 50);

    info!("recent-first sync for {user}: max_count={max_count}, max_pages={max_pages}");

    let mut page_token: Option<String> = None;
    let mut synced = 0usize;

    while outcome.stats.pages < max_pages && synced < max_count {
        let page_size = LIST_PAGE_SIZE.min(max_count - synced);
        let page = match provider.list_message_ids(label_filter, page_token.as_deref(), page_size)
        {
            Ok(page) => page,
            Err(e @ ProviderError::Auth(_)) => return Err(e),
            Err(e) => {
                error!(
                    "listing failed for {user} on page {}: {e}",
                    outcome.stats.pages + 1
                );
                break;
            }
        };

        let refs = page.refs();
        if refs.is_empty() {
            debug!("no more messages for {user} on page {}", outcome.stats.pages + 1);
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

        debug!(
            "page {} for {user}: {} listed, {} exist, {} to sync",
            outcome.stats.pages + 1,
            ids.len(),
            existing.len(),
            ids.len() - existing.len()
        );

        for id in ids.iter().filter(|id| !existing.contains(id)) {
            if synced >= max_count {
                break;
            }
            match ingest_message(provider, records, user, id, &local_labels) {
                Ok(checkpoint) => {
                    synced += 1;
                    outcome.stats.stored += 1;
                    outcome.checkpoint = max_checkpoint(outcome.checkpoint.take(), checkpoint);
                }
                Err(e @ ProviderError::Auth(_)) => return Err(e),
                Err(e) => {
                    outcome.stats.errors += 1;
                    warn!("skipping message {user}/{id}: {e}");
                }
            }
        }

        page_token = page.next_page_token;
        outcome.stats.pages += 1;

        if page_token.is_none() {
            break;
        }
    }

    // Pages beyond this run's bounds become the backlog
    if let Some(token) = page_token {
        info!("backlog detected for {user}; saving cursor");
        outcome.backlog_cursor = Some(token);
    }

    outcome.stats.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "recent-first sync for {user} done: {} stored, {} skipped, {} errors, {} pages",
        outcome.stats.stored, outcome.stats.skipped, outcome.stats.errors, outcome.stats.pages
    );

    Ok(outcome)
}
