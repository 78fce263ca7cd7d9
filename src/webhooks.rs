//! Fire-and-forget webhook dispatch (spec §2): `call.ended` and the
//! `call_webhook` built-in tool (spec §4.6, §4.7).

use async_trait::async_trait;
use tracing::warn;

/// Fire-and-forget event sink.
#[async_trait]
pub trait Webhooks: Send + Sync {
    /// Dispatch `event` with `payload` to the configured sink. Failures are
    /// logged, never propagated — a webhook is best-effort by definition.
    async fn dispatch(&self, event: &str, payload: serde_json::Value);
}

/// Default [`Webhooks`] adapter: a single outbound HTTP POST per event,
/// matching the teacher's reqwest-based channel-notification adapters.
pub struct HttpWebhooks {
    client: reqwest::Client,
    url: String,
}

impl HttpWebhooks {
    /// Create a new adapter posting every event to `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Webhooks for HttpWebhooks {
    async fn dispatch(&self, event: &str, payload: serde_json::Value) {
        let body = serde_json::json!({ "event": event, "data": payload });
        if let Err(e) = self.client.post(&self.url).json(&body).send().await {
            warn!(event, "webhook dispatch failed: {e}");
        }
    }
}
