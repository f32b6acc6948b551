//! Storage trait definitions

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{
    CanonicalRecord, Label, MessageId, SearchIndexEntry, SyncState, SyncStateUpdate, UserId,
};

/// Persistence for per-user sync state.
///
/// Exactly one record per user; `upsert` has merge semantics (only the
/// fields carried by the update are written). There is no delete: an
/// administrative reset writes cleared fields instead.
pub trait SyncStateStore: Send + Sync {
    /// Get the state for a user, if one exists
    fn get(&self, user: &UserId) -> Result<Option<SyncState>>;

    /// Merge the update into the user's state, creating the record on
    /// first write. Returns the state after the merge.
    fn upsert(&self, user: &UserId, update: SyncStateUpdate) -> Result<SyncState>;

    /// List users that currently have a pending backlog cursor
    fn users_with_backlog(&self) -> Result<Vec<UserId>>;

    /// Administrative reset: clear checkpoint and backlog fields so the
    /// next pass performs a fresh full sync. No-op for unknown users.
    fn reset(&self, user: &UserId) -> Result<()>;
}

/// Persistence for canonical records, their search index projections, and
/// the per-user label catalog.
///
/// Records and index entries are keyed (user_id, message_id) and
/// upsert-only; the engine never deletes them.
pub trait RecordStore: Send + Sync {
    /// Insert or update a canonical record. An update preserves the
    /// original `created_at` and stamps `updated_at`.
    fn upsert_record(&self, record: CanonicalRecord) -> Result<()>;

    /// Insert or update a search index entry
    fn upsert_index_entry(&self, entry: SearchIndexEntry) -> Result<()>;

    /// Get one record
    fn get_record(&self, user: &UserId, id: &MessageId) -> Result<Option<CanonicalRecord>>;

    /// Get one index entry
    fn get_index_entry(&self, user: &UserId, id: &MessageId)
    -> Result<Option<SearchIndexEntry>>;

    /// Batch existence check: which of `ids` already exist for this user
    /// (in the record store or the index)
    fn existing_ids(&self, user: &UserId, ids: &[MessageId]) -> Result<HashSet<MessageId>>;

    /// Total records stored for a user
    fn count_records(&self, user: &UserId) -> Result<usize>;

    /// Query records by optional label and time range, sorted descending
    /// by receipt time
    fn query_records(
        &self,
        user: &UserId,
        label: Option<&str>,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        limit: usize,
    ) -> Result<Vec<CanonicalRecord>>;

    /// Index entries not yet embedded, most recent first
    fn list_unembedded(&self, user: &UserId, limit: usize) -> Result<Vec<SearchIndexEntry>>;

    /// Flip the embedded flag for a batch of entries
    fn mark_embedded(&self, user: &UserId, ids: &[MessageId]) -> Result<()>;

    /// All index entries for a user (used by the lazy semantic rebuild)
    fn list_index_entries(&self, user: &UserId) -> Result<Vec<SearchIndexEntry>>;

    /// Insert or update a label in the user's catalog
    fn upsert_label(&self, user: &UserId, label: Label) -> Result<()>;

    /// The user's label catalog
    fn list_labels(&self, user: &UserId) -> Result<Vec<Label>>;

    /// Ids of the user's locally managed labels (drives the label merge)
    fn local_label_ids(&self, user: &UserId) -> Result<HashSet<String>>;
}
