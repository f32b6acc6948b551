//! Incremental sync from the provider change log

use std::collections::HashSet;
use std::time::Instant;

use log::{debug, info, warn};

use super::{SyncStats, ingest_message, local_label_ids, max_checkpoint};
use crate::models::{MessageId, UserId};
use crate::provider::{MailProvider, ProviderError};
use crate::store::RecordStore;

/// Result of an incremental sync run
#[derive(Debug, Clone)]
pub struct IncrementalOutcome {
    /// Newest checkpoint observed; the start checkpoint when no events
    /// occurred. Never older than the input.
    pub checkpoint: String,
    pub stats: SyncStats,
}

/// Apply the provider change log since `start_checkpoint`.
///
/// Pages through the change log collecting distinct changed message ids
/// across all event kinds, so a message referenced by several events is
/// fetched once per run. Stops after `max_pages` or when the log is
/// exhausted.
///
/// An expired checkpoint surfaces as `ProviderError::CheckpointExpired`;
/// the caller treats it as "no incremental data" and falls back to
/// recent-first sync. Transient failures soft-stop the page loop.
/// Per-message failures are logged and skipped.
pub fn sync_from_history(
    provider: &dyn MailProvider,
    records: &dyn RecordStore,
    user: &UserId,
    start_checkpoint: &str,
    label_filter: Option<&str>,
    max_pages: usize,
) -> Result<IncrementalOutcome, ProviderError> {
    let start = Instant::now();
    let mut stats = SyncStats::default();
    let mut latest = start_checkpoint.to_string();
    let mut processed: HashSet<MessageId> = HashSet::new();
    let local_labels = local_label_ids(records, user);

    let mut page_token: Option<String> = None;
    while stats.pages < max_pages {
        let page = match provider.list_changes(start_checkpoint, label_filter, page_token.as_deref())
        {
            Ok(page) => page,
            Err(e @ (ProviderError::CheckpointExpired | ProviderError::Auth(_))) => {
                return Err(e);
            }
            Err(e) if stats.pages == 0 => {
                // Nothing applied yet; let the caller decide
                return Err(e);
            }
            Err(e) => {
                warn!("change listing failed for {user} after {} pages: {e}", stats.pages);
                break;
            }
        };
        stats.pages += 1;

        for record in page.records.iter().flatten() {
            latest = max_checkpoint(Some(latest), record.id.clone())
                .unwrap_or_else(|| start_checkpoint.to_string());

            for id in record.message_ids() {
                let id = MessageId::new(id);
                if !processed.insert(id.clone()) {
                    continue;
                }
                stats.listed += 1;

                match ingest_message(provider, records, user, &id, &local_labels) {
                    Ok(checkpoint) => {
                        stats.stored += 1;
                        latest = max_checkpoint(Some(latest), checkpoint)
                            .unwrap_or_else(|| start_checkpoint.to_string());
                    }
                    Err(e @ ProviderError::Auth(_)) => return Err(e),
                    Err(e) => {
                        stats.errors += 1;
                        warn!("skipping changed message {user}/{id}: {e}");
                    }
                }
            }
        }

        latest = max_checkpoint(Some(latest), page.checkpoint.clone())
            .unwrap_or_else(|| start_checkpoint.to_string());

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    if stats.stored > 0 {
        info!(
            "incremental sync for {user}: {} stored, {} errors, checkpoint {} -> {}",
            stats.stored, stats.errors, start_checkpoint, latest
        );
    } else {
        debug!("incremental sync for {user}: no new events since {start_checkpoint}");
    }

    Ok(IncrementalOutcome {
        checkpoint: latest,
        stats,
    })
}
