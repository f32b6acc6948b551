//! Semantic search over the vector index, with lazy rebuild
//!
//! A fresh process (or a wiped index) has canonical records but no
//! vectors. Rather than rebuilding eagerly at startup, the first semantic
//! query that comes up empty for a user who has records triggers exactly
//! one rebuild pass, then retries the query.

use anyhow::Result;
use log::info;

use crate::embed::EmbeddingPipeline;
use crate::models::{SearchIndexEntry, UserId};
use crate::store::RecordStore;
use crate::vector::VectorStore;

/// One semantic search hit, best first
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub entry: SearchIndexEntry,
    pub score: f32,
}

/// Query the semantic index for a user.
///
/// Scored ids are joined back to their index entries in score order; ids
/// with no surviving entry are dropped.
pub fn semantic_search(
    user: &UserId,
    query: &str,
    top_k: usize,
    label_filter: Option<&str>,
    pipeline: &EmbeddingPipeline,
    records: &dyn RecordStore,
    vectors: &dyn VectorStore,
) -> Result<Vec<SemanticHit>> {
    let query_vector = pipeline.embed_query(query)?;

    let mut scored = vectors.query(user, &query_vector, top_k, label_filter)?;

    if scored.is_empty() && records.count_records(user)? > 0 {
        info!("no vectors for {user} despite stored records; rebuilding semantic index");
        pipeline.rebuild_user(user, records, vectors)?;
        scored = vectors.query(user, &query_vector, top_k, label_filter)?;
    }

    let mut hits = Vec::with_capacity(scored.len());
    for hit in scored {
        if let Some(entry) = records.get_index_entry(user, &hit.message_id)? {
            hits.push(SemanticHit {
                entry,
                score: hit.score,
            });
        }
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use crate::models::{CanonicalRecord, MessageId, ThreadId};
    use crate::parser::index_entry_for;
    use crate::store::InMemoryStore;
    use crate::vector::InMemoryVectorStore;
    use chrono::Utc;
    use std::sync::Arc;

    fn seed(store: &InMemoryStore, user: &str, id: &str, subject: &str) {
        let record = CanonicalRecord::builder(
            UserId::new(user),
            MessageId::new(id),
            ThreadId::new("t1"),
        )
        .subject(subject)
        .snippet(subject)
        .received_at(Utc::now())
        .build();
        store.upsert_record(record.clone()).unwrap();
        store.upsert_index_entry(index_entry_for(&record)).unwrap();
    }

    #[test]
    fn test_empty_index_triggers_single_rebuild() {
        let store = InMemoryStore::new();
        let vectors = InMemoryVectorStore::new();
        let user = UserId::new("u1");
        let pipeline = EmbeddingPipeline::new(Arc::new(HashEmbedder::default()), 16);

        seed(&store, "u1", "m1", "quarterly budget review");
        seed(&store, "u1", "m2", "weekend hiking plans");

        assert_eq!(vectors.count(&user).unwrap(), 0);

        let hits = semantic_search(
            &user,
            "budget review",
            5,
            None,
            &pipeline,
            &store,
            &vectors,
        )
        .unwrap();

        assert!(!hits.is_empty());
        assert_eq!(vectors.count(&user).unwrap(), 2);
        assert_eq!(hits[0].entry.message_id.as_str(), "m1");
    }

    #[test]
    fn test_no_records_returns_empty_without_rebuild() {
        let store = InMemoryStore::new();
        let vectors = InMemoryVectorStore::new();
        let user = UserId::new("u1");
        let pipeline = EmbeddingPipeline::new(Arc::new(HashEmbedder::default()), 16);

        let hits =
            semantic_search(&user, "anything", 5, None, &pipeline, &store, &vectors).unwrap();
        assert!(hits.is_empty());
        assert_eq!(vectors.count(&user).unwrap(), 0);
    }
}
