//! Embedding service integration
//!
//! The engine asks an external service to turn short natural-language
//! representations of messages into vectors. Everything behind the
//! `Embedder` trait; the pipeline and search paths don't care whether the
//! vectors come from an HTTP service or the deterministic test embedder.

mod http;
mod pipeline;

pub use http::HttpEmbedder;
pub use pipeline::EmbeddingPipeline;

use anyhow::Result;

use crate::models::SearchIndexEntry;

/// Produces embedding vectors for batches of texts
pub trait Embedder: Send + Sync {
    /// Embed a batch; returns one vector per input text, in order
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Identifier of the underlying model, recorded with each vector
    fn model_id(&self) -> &str;
}

/// Build the short natural-language representation of one entry
pub fn build_embedding_text(entry: &SearchIndexEntry) -> String {
    format!(
        "Subject: {}\nFrom: {} <{}>\nSnippet: {}",
        entry.subject, entry.from_name, entry.from_address, entry.snippet
    )
}

/// Deterministic token-hash embedder.
///
/// Stands in for the real service in tests and local development: similar
/// texts share token buckets, identical texts embed identically.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t, self.dimension)).collect())
    }

    fn model_id(&self) -> &str {
        "token-hash"
    }
}

fn hash_embed(text: &str, dimension: usize) -> Vec<f32> {
    use std::hash::{DefaultHasher, Hash, Hasher};

    let mut vector = vec![0.0f32; dimension];
    for token in text.split_whitespace() {
        let mut hasher = DefaultHasher::new();
        token.to_lowercase().hash(&mut hasher);
        let bucket = (hasher.finish() as usize) % dimension;
        vector[bucket] += 1.0;
    }

    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}
