//! Streaming LLM adapter and sentence segmentation (spec §2, §4.4 step 5).
//!
//! [`HttpLlm`] adapts the teacher's OpenAI-compatible chat-completions SSE
//! client (`ureq`-over-`spawn_blocking`) to `reqwest`'s native async
//! streaming, since the core runs entirely on tokio.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// A single chat message for prompt assembly (spec §4.4 step 4).
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// `"system"`, `"user"`, or `"assistant"`.
    pub role: &'static str,
    /// Message content.
    pub content: String,
}

/// Streaming token generator given an assembled prompt.
#[async_trait]
pub trait Llm: Send + Sync {
    /// Stream a completion for `messages`, sending each raw token to `tx` as
    /// it arrives. Returns once the stream ends or `tx` is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or the stream fails
    /// before completion.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        max_tokens: usize,
        tx: mpsc::Sender<String>,
    ) -> Result<()>;
}

/// Default [`Llm`] adapter: an OpenAI-compatible `/v1/chat/completions`
/// endpoint with `stream: true`, consumed as Server-Sent Events.
pub struct HttpLlm {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpLlm {
    /// Create a new adapter targeting `base_url` (stripped of a trailing
    /// `/v1`) using `model`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.strip_suffix("/v1").unwrap_or(&base_url).to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            model: model.into(),
            api_key,
        }
    }
}

#[async_trait]
impl Llm for HttpLlm {
    async fn stream(
        &self,
        messages: &[ChatMessage],
        max_tokens: usize,
        tx: mpsc::Sender<String>,
    ) -> Result<()> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages.iter().map(|m| serde_json::json!({
                "role": m.role,
                "content": m.content,
            })).collect::<Vec<_>>(),
            "stream": true,
            "max_tokens": max_tokens,
            "stop": ["User:", "Assistant:"],
        });

        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| CoreError::Llm(format!("request failed: {e}")))?
            .error_for_status()
            .map_err(|e| CoreError::Llm(format!("upstream error: {e}")))?;

        let mut byte_stream = response.bytes_stream();
        let mut leftover = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| CoreError::Llm(format!("stream read failed: {e}")))?;
            leftover.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = leftover.find('\n') {
                let line = leftover[..pos].trim().to_string();
                leftover.drain(..=pos);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(());
                }

                let parsed: serde_json::Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("malformed SSE chunk from LLM upstream: {e}");
                        continue;
                    }
                };

                if let Some(token) = parsed["choices"][0]["delta"]["content"].as_str()
                    && !token.is_empty()
                    && tx.send(token.to_string()).await.is_err()
                {
                    return Ok(());
                }

                if parsed["choices"][0]["finish_reason"].as_str() == Some("stop") {
                    return Ok(());
                }
            }
        }

        info!("LLM stream ended without explicit [DONE]");
        Ok(())
    }
}

/// Maximum sentence length (chars) before forcing a boundary even without a
/// terminator (spec §4.4 step 5: "soft limit ≈200 chars").
pub const SOFT_SENTENCE_LIMIT: usize = 200;

/// Find the end index (inclusive) of the first complete sentence in
/// `buffer`, per the end-of-sentence rule in spec §4.4 step 5: a sentence is
/// complete when it ends in `.`, `!`, `?`, or reaches the soft length limit.
#[must_use]
pub fn find_sentence_boundary(buffer: &str) -> Option<usize> {
    for (idx, ch) in buffer.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            return Some(idx);
        }
    }
    if buffer.len() >= SOFT_SENTENCE_LIMIT {
        if let Some((idx, _)) = buffer.char_indices().rfind(|&(i, c)| i < buffer.len() && c == ' ') {
            return Some(idx);
        }
        return Some(buffer.len() - 1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_terminator_boundary() {
        let buf = "Hello there. More text";
        let idx = find_sentence_boundary(buf).expect("boundary");
        assert_eq!(&buf[..=idx], "Hello there.");
    }

    #[test]
    fn no_boundary_under_soft_limit_without_terminator() {
        let buf = "short text with no terminator yet";
        assert!(find_sentence_boundary(buf).is_none());
    }

    #[test]
    fn soft_limit_forces_a_boundary_at_a_word_break() {
        let buf = "a".repeat(SOFT_SENTENCE_LIMIT + 5);
        let buf_with_space = format!("{} {}", "word".repeat(50), buf);
        let idx = find_sentence_boundary(&buf_with_space).expect("boundary");
        assert!(idx < buf_with_space.len());
    }
}
