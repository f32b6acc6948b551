//! Batch embedding pipeline
//!
//! Pulls unembedded index entries newest-first, embeds them as one batch,
//! upserts the vectors, and only then flips the `embedded` flag. A failed
//! upsert leaves the batch eligible for retry, and retries are idempotent
//! (same key replaces).

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use log::{debug, info};

use super::{Embedder, build_embedding_text};
use crate::models::{MessageId, SearchIndexEntry, UserId};
use crate::store::RecordStore;
use crate::vector::{VectorRecord, VectorStore};

/// Drives embedding for records whose index entries are not yet embedded
#[derive(Clone)]
pub struct EmbeddingPipeline {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl EmbeddingPipeline {
    /// Create a pipeline. Batch size is clamped to the service-friendly
    /// 16..=50 window.
    pub fn new(embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.clamp(16, 50),
        }
    }

    /// Embed one batch of pending entries for a user.
    ///
    /// Returns how many entries were embedded (zero when nothing is
    /// pending).
    pub fn process_batch(
        &self,
        user: &UserId,
        records: &dyn RecordStore,
        vectors: &dyn VectorStore,
    ) -> Result<usize> {
        let entries = records.list_unembedded(user, self.batch_size)?;
        if entries.is_empty() {
            debug!("no pending embeddings for {user}");
            return Ok(0);
        }

        let embedded = self.embed_entries(user, &entries, vectors)?;
        records.mark_embedded(user, &embedded)?;

        info!("embedded {} entries for {user}", embedded.len());
        Ok(embedded.len())
    }

    /// Replay every stored index entry for a user through the
    /// embed-and-upsert path. Used by the lazy semantic rebuild.
    pub fn rebuild_user(
        &self,
        user: &UserId,
        records: &dyn RecordStore,
        vectors: &dyn VectorStore,
    ) -> Result<usize> {
        let entries = records.list_index_entries(user)?;
        if entries.is_empty() {
            return Ok(0);
        }

        info!("rebuilding semantic index for {user}: {} entries", entries.len());
        let mut total = 0;
        for chunk in entries.chunks(self.batch_size) {
            let embedded = self.embed_entries(user, chunk, vectors)?;
            records.mark_embedded(user, &embedded)?;
            total += embedded.len();
        }
        Ok(total)
    }

    /// Embed a query string with the pipeline's model
    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embedder.embed(&[query.to_string()])?;
        Ok(vectors.pop().unwrap_or_default())
    }

    fn embed_entries(
        &self,
        user: &UserId,
        entries: &[SearchIndexEntry],
        vectors: &dyn VectorStore,
    ) -> Result<Vec<MessageId>> {
        let texts: Vec<String> = entries.iter().map(build_embedding_text).collect();
        let embeddings = self.embedder.embed(&texts)?;

        let now = Utc::now();
        let items: Vec<VectorRecord> = entries
            .iter()
            .zip(embeddings)
            .map(|(entry, vector)| VectorRecord {
                message_id: entry.message_id.clone(),
                vector,
                labels: entry.labels.clone(),
                model: self.embedder.model_id().to_string(),
                updated_at: now,
            })
            .collect();

        vectors.upsert(user, items)?;
        Ok(entries.iter().map(|e| e.message_id.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use crate::models::{CanonicalRecord, ThreadId};
    use crate::parser::index_entry_for;
    use crate::store::InMemoryStore;
    use crate::vector::InMemoryVectorStore;

    fn seed_entries(store: &InMemoryStore, user: &str, count: usize) {
        for i in 0..count {
            let record = CanonicalRecord::builder(
                UserId::new(user),
                MessageId::new(format!("m{i}")),
                ThreadId::new("t1"),
            )
            .subject(format!("Subject {i}"))
            .snippet(format!("snippet {i}"))
            .received_at(Utc::now() - chrono::Duration::minutes(i as i64))
            .build();
            store.upsert_index_entry(index_entry_for(&record)).unwrap();
        }
    }

    fn pipeline() -> EmbeddingPipeline {
        EmbeddingPipeline::new(Arc::new(HashEmbedder::default()), 16)
    }

    #[test]
    fn test_batch_embeds_and_marks() {
        let store = InMemoryStore::new();
        let vectors = InMemoryVectorStore::new();
        let user = UserId::new("u1");
        seed_entries(&store, "u1", 5);

        let n = pipeline().process_batch(&user, &store, &vectors).unwrap();
        assert_eq!(n, 5);
        assert_eq!(vectors.count(&user).unwrap(), 5);
        assert!(store.list_unembedded(&user, 10).unwrap().is_empty());

        // Nothing pending on the second run
        let n = pipeline().process_batch(&user, &store, &vectors).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_batch_respects_size_and_takes_newest_first() {
        let store = InMemoryStore::new();
        let vectors = InMemoryVectorStore::new();
        let user = UserId::new("u1");
        seed_entries(&store, "u1", 20);

        let n = pipeline().process_batch(&user, &store, &vectors).unwrap();
        assert_eq!(n, 16);

        // The newest entries went first; m16..m19 remain
        let remaining = store.list_unembedded(&user, 10).unwrap();
        let ids: Vec<&str> = remaining.iter().map(|e| e.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m16", "m17", "m18", "m19"]);
    }

    #[test]
    fn test_rebuild_replays_everything() {
        let store = InMemoryStore::new();
        let vectors = InMemoryVectorStore::new();
        let user = UserId::new("u1");
        seed_entries(&store, "u1", 40);

        let n = pipeline().rebuild_user(&user, &store, &vectors).unwrap();
        assert_eq!(n, 40);
        assert_eq!(vectors.count(&user).unwrap(), 40);
    }
}
