//! Vector index abstraction for the semantic search path

mod memory;

pub use memory::InMemoryVectorStore;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{MessageId, UserId};

/// One embedded message: vector plus the metadata the query path needs
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub message_id: MessageId,
    pub vector: Vec<f32>,
    pub labels: Vec<String>,
    /// Identifier of the model that produced the vector
    pub model: String,
    pub updated_at: DateTime<Utc>,
}

/// A scored query hit
#[derive(Debug, Clone)]
pub struct ScoredId {
    pub message_id: MessageId,
    pub score: f32,
}

/// Vector index keyed by (user_id, message_id).
///
/// Upserting the same key replaces the previous vector; the index never
/// holds duplicates for a message.
pub trait VectorStore: Send + Sync {
    /// Insert or replace a batch of vectors for one user
    fn upsert(&self, user: &UserId, items: Vec<VectorRecord>) -> Result<()>;

    /// Nearest neighbors for a query vector, best first, optionally
    /// restricted to records carrying a label
    fn query(
        &self,
        user: &UserId,
        vector: &[f32],
        top_k: usize,
        label_filter: Option<&str>,
    ) -> Result<Vec<ScoredId>>;

    /// Number of vectors stored for a user
    fn count(&self, user: &UserId) -> Result<usize>;
}
