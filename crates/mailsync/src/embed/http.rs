//! HTTP client for an external embedding service

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use super::Embedder;

/// Client for an embedding service that accepts a batch of texts and
/// returns one vector per text.
pub struct HttpEmbedder {
    endpoint: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }
}

impl Embedder for HttpEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut response = ureq::post(&format!("{}/embeddings", self.endpoint))
            .header("Content-Type", "application/json")
            .send_json(&body)
            .context("Failed to reach embedding service")?;

        let parsed: EmbedResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse embedding response")?;

        if parsed.embeddings.len() != texts.len() {
            return Err(anyhow!(
                "embedding service returned {} vectors for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            ));
        }

        Ok(parsed.embeddings)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
