//! In-memory storage implementation
//!
//! Used for testing and as a stub backend. HashMaps behind RwLocks,
//! mirroring the persistent schema. Existence checks are counted so tests
//! can verify dedup behavior.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::{RecordStore, SyncStateStore};
use crate::models::{
    CanonicalRecord, Label, MessageId, SearchIndexEntry, SyncState, SyncStateUpdate, UserId,
};

type Key = (String, String);

fn key(user: &UserId, id: &MessageId) -> Key {
    (user.as_str().to_string(), id.as_str().to_string())
}

/// In-memory implementation of RecordStore and SyncStateStore
pub struct InMemoryStore {
    records: RwLock<HashMap<Key, CanonicalRecord>>,
    index: RwLock<HashMap<Key, SearchIndexEntry>>,
    labels: RwLock<HashMap<String, Vec<Label>>>,
    sync_states: RwLock<HashMap<String, SyncState>>,
    existence_checks: AtomicUsize,
    record_upserts: AtomicUsize,
}

impl InMemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            labels: RwLock::new(HashMap::new()),
            sync_states: RwLock::new(HashMap::new()),
            existence_checks: AtomicUsize::new(0),
            record_upserts: AtomicUsize::new(0),
        }
    }

    /// Number of existence-check calls served (test instrumentation)
    pub fn existence_checks(&self) -> usize {
        self.existence_checks.load(Ordering::SeqCst)
    }

    /// Number of record upserts performed (test instrumentation)
    pub fn record_upserts(&self) -> usize {
        self.record_upserts.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for InMemoryStore {
    fn upsert_record(&self, mut record: CanonicalRecord) -> Result<()> {
        self.record_upserts.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.write().unwrap();
        let k = key(&record.user_id, &record.message_id);
        if let Some(existing) = records.get(&k) {
            record.created_at = existing.created_at;
        }
        record.updated_at = Utc::now();
        records.insert(k, record);
        Ok(())
    }

    fn upsert_index_entry(&self, entry: SearchIndexEntry) -> Result<()> {
        let mut index = self.index.write().unwrap();
        index.insert(key(&entry.user_id, &entry.message_id), entry);
        Ok(())
    }

    fn get_record(&self, user: &UserId, id: &MessageId) -> Result<Option<CanonicalRecord>> {
        Ok(self.records.read().unwrap().get(&key(user, id)).cloned())
    }

    fn get_index_entry(
        &self,
        user: &UserId,
        id: &MessageId,
    ) -> Result<Option<SearchIndexEntry>> {
        Ok(self.index.read().unwrap().get(&key(user, id)).cloned())
    }

    fn existing_ids(&self, user: &UserId, ids: &[MessageId]) -> Result<HashSet<MessageId>> {
        self.existence_checks.fetch_add(1, Ordering::SeqCst);
        let records = self.records.read().unwrap();
        let index = self.index.read().unwrap();

        Ok(ids
            .iter()
            .filter(|id| {
                let k = key(user, id);
                records.contains_key(&k) || index.contains_key(&k)
            })
            .cloned()
            .collect())
    }

    fn count_records(&self, user: &UserId) -> Result<usize> {
        Ok(self
            .records
            .read()
            .unwrap()
            .keys()
            .filter(|(u, _)| u == user.as_str())
            .count())
    }

    fn query_records(
        &self,
        user: &UserId,
        label: Option<&str>,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        limit: usize,
    ) -> Result<Vec<CanonicalRecord>> {
        let records = self.records.read().unwrap();
        let mut matched: Vec<CanonicalRecord> = records
            .values()
            .filter(|r| r.user_id == *user)
            .filter(|r| match label {
                Some(label) => r.labels.iter().any(|l| l == label),
                None => true,
            })
            .filter(|r| match range {
                Some((start, end)) => r.received_at >= start && r.received_at <= end,
                None => true,
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        matched.truncate(limit);
        Ok(matched)
    }

    fn list_unembedded(&self, user: &UserId, limit: usize) -> Result<Vec<SearchIndexEntry>> {
        let index = self.index.read().unwrap();
        let mut entries: Vec<SearchIndexEntry> = index
            .values()
            .filter(|e| e.user_id == *user && !e.embedded)
            .cloned()
            .collect();

        entries.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        entries.truncate(limit);
        Ok(entries)
    }

    fn mark_embedded(&self, user: &UserId, ids: &[MessageId]) -> Result<()> {
        let mut index = self.index.write().unwrap();
        for id in ids {
            if let Some(entry) = index.get_mut(&key(user, id)) {
                entry.embedded = true;
            }
        }
        Ok(())
    }

    fn list_index_entries(&self, user: &UserId) -> Result<Vec<SearchIndexEntry>> {
        let index = self.index.read().unwrap();
        let mut entries: Vec<SearchIndexEntry> = index
            .values()
            .filter(|e| e.user_id == *user)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(entries)
    }

    fn upsert_label(&self, user: &UserId, label: Label) -> Result<()> {
        let mut labels = self.labels.write().unwrap();
        let catalog = labels.entry(user.as_str().to_string()).or_default();
        match catalog.iter_mut().find(|l| l.id == label.id) {
            Some(existing) => *existing = label,
            None => catalog.push(label),
        }
        Ok(())
    }

    fn list_labels(&self, user: &UserId) -> Result<Vec<Label>> {
        Ok(self
            .labels
            .read()
            .unwrap()
            .get(user.as_str())
            .cloned()
            .unwrap_or_default())
    }

    fn local_label_ids(&self, user: &UserId) -> Result<HashSet<String>> {
        Ok(self
            .labels
            .read()
            .unwrap()
            .get(user.as_str())
            .map(|catalog| {
                catalog
                    .iter()
                    .filter(|l| l.is_local())
                    .map(|l| l.id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl SyncStateStore for InMemoryStore {
    fn get(&self, user: &UserId) -> Result<Option<SyncState>> {
        Ok(self
            .sync_states
            .read()
            .unwrap()
            .get(user.as_str())
            .cloned())
    }

    fn upsert(&self, user: &UserId, update: SyncStateUpdate) -> Result<SyncState> {
        let mut states = self.sync_states.write().unwrap();
        let state = states
            .entry(user.as_str().to_string())
            .or_insert_with(|| SyncState::new(user.clone()));
        update.apply(state);
        Ok(state.clone())
    }

    fn users_with_backlog(&self) -> Result<Vec<UserId>> {
        Ok(self
            .sync_states
            .read()
            .unwrap()
            .values()
            .filter(|s| s.has_backlog())
            .map(|s| s.user_id.clone())
            .collect())
    }

    fn reset(&self, user: &UserId) -> Result<()> {
        let mut states = self.sync_states.write().unwrap();
        if let Some(state) = states.get_mut(user.as_str()) {
            state.reset();
        }
        Ok(())
    }
}
