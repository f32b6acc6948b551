//! In-memory vector index
//!
//! Cosine scoring over a per-user map. Vectors are rebuilt lazily from the
//! canonical store on a fresh process, so an in-process index is a
//! workable default backend as well as the test double.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;

use super::{ScoredId, VectorRecord, VectorStore};
use crate::models::UserId;

/// In-memory implementation of VectorStore
pub struct InMemoryVectorStore {
    // (user_id, message_id) -> record
    vectors: RwLock<HashMap<(String, String), VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            vectors: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorStore for InMemoryVectorStore {
    fn upsert(&self, user: &UserId, items: Vec<VectorRecord>) -> Result<()> {
        let mut vectors = self.vectors.write().unwrap();
        for item in items {
            let key = (user.as_str().to_string(), item.message_id.as_str().to_string());
            vectors.insert(key, item);
        }
        Ok(())
    }

    fn query(
        &self,
        user: &UserId,
        vector: &[f32],
        top_k: usize,
        label_filter: Option<&str>,
    ) -> Result<Vec<ScoredId>> {
        let vectors = self.vectors.read().unwrap();
        let mut scored: Vec<ScoredId> = vectors
            .iter()
            .filter(|((u, _), _)| u == user.as_str())
            .filter(|(_, record)| match label_filter {
                Some(label) => record.labels.iter().any(|l| l == label),
                None => true,
            })
            .map(|(_, record)| ScoredId {
                message_id: record.message_id.clone(),
                score: cosine_similarity(vector, &record.vector),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    fn count(&self, user: &UserId) -> Result<usize> {
        let vectors = self.vectors.read().unwrap();
        Ok(vectors
            .keys()
            .filter(|(u, _)| u == user.as_str())
            .count())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageId;
    use chrono::Utc;

    fn record(id: &str, vector: Vec<f32>, labels: &[&str]) -> VectorRecord {
        VectorRecord {
            message_id: MessageId::new(id),
            vector,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            model: "test-model".to_string(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_query_ranks_by_similarity() {
        let store = InMemoryVectorStore::new();
        let user = UserId::new("u1");
        store
            .upsert(
                &user,
                vec![
                    record("close", vec![1.0, 0.0], &["INBOX"]),
                    record("far", vec![0.0, 1.0], &["INBOX"]),
                ],
            )
            .unwrap();

        let hits = store.query(&user, &[1.0, 0.1], 10, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].message_id.as_str(), "close");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_same_key_upsert_replaces() {
        let store = InMemoryVectorStore::new();
        let user = UserId::new("u1");
        store
            .upsert(&user, vec![record("m1", vec![1.0, 0.0], &[])])
            .unwrap();
        store
            .upsert(&user, vec![record("m1", vec![0.0, 1.0], &[])])
            .unwrap();

        assert_eq!(store.count(&user).unwrap(), 1);
        let hits = store.query(&user, &[0.0, 1.0], 1, None).unwrap();
        assert!(hits[0].score > 0.99);
    }

    #[test]
    fn test_label_filter_and_user_isolation() {
        let store = InMemoryVectorStore::new();
        let u1 = UserId::new("u1");
        let u2 = UserId::new("u2");
        store
            .upsert(&u1, vec![record("m1", vec![1.0], &["todo"])])
            .unwrap();
        store
            .upsert(&u2, vec![record("m2", vec![1.0], &["todo"])])
            .unwrap();

        let hits = store.query(&u1, &[1.0], 10, Some("todo")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message_id.as_str(), "m1");

        let none = store.query(&u1, &[1.0], 10, Some("done")).unwrap();
        assert!(none.is_empty());
    }
}
