//! Embedding provider (spec §2): turns an utterance into a dense vector for
//! retrieval. Out-of-scope collaborator; this is the default HTTP adapter.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Turns text into a dense embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single piece of text.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedding provider is unreachable or rejects
    /// the request.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Default [`Embedder`] adapter: an OpenAI-compatible embeddings HTTP
/// endpoint, mirroring the chat-completions adapter in `llm::HttpLlm`.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    /// Create a new adapter targeting `base_url` (an OpenAI-compatible
    /// `/v1/embeddings` server) using `model`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let base = self.base_url.trim_end_matches('/');
        let url = format!("{base}/v1/embeddings");

        let mut req = self.client.post(&url).json(&EmbedRequest {
            model: &self.model,
            input: text,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| CoreError::Embedding(format!("request failed: {e}")))?
            .error_for_status()
            .map_err(|e| CoreError::Embedding(format!("upstream error: {e}")))?;

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Embedding(format!("malformed response: {e}")))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| CoreError::Embedding("empty embeddings response".into()))
    }
}
