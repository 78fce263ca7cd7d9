//! MediaTransport (spec §2, §6): the carrier's bidirectional media
//! WebSocket. Wire format and the axum upgrade handler are grounded on the
//! Twilio-style media-stream handler used elsewhere in this corpus; the
//! core itself depends only on the [`MediaTransport`] trait.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{CoreError, Result};

/// Inbound MediaTransport wire events (spec §6).
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    /// Initial handshake.
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    /// Stream start, carrying identifiers and custom parameters.
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartPayload,
    },
    /// One 20ms audio frame.
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    /// A mark acknowledgement from the carrier.
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    /// Stream end.
    Stop {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

/// `start` event metadata (spec §6: "optional custom parameters including
/// `agent_id`, `call_id`, and a dynamic-variables bag").
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    /// Carrier-side call identifier.
    #[serde(default)]
    pub call_id: Option<String>,
    /// Which agent configuration to load.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Arbitrary caller-supplied substitution variables.
    #[serde(default)]
    pub dynamic_variables: HashMap<String, String>,
}

/// `media` event payload.
#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded 20ms µ-law frame.
    pub payload: String,
    /// Carrier timestamp, unused for control.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Carrier chunk index, unused for control.
    #[serde(default)]
    pub chunk: Option<String>,
}

/// The per-call bidirectional byte channel to the carrier (spec §2).
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Send one outbound base64 µ-law `media` frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying socket send fails.
    async fn send_media(&self, payload_b64: &str) -> Result<()>;

    /// Send a `clear` signal, instructing the carrier to flush any buffered
    /// outbound audio (spec §4.2 cancel semantics).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying socket send fails.
    async fn send_clear(&self) -> Result<()>;
}

/// Default [`MediaTransport`] adapter: an axum WebSocket's outbound half,
/// addressed by `stream_sid` per the wire format in spec §6.
pub struct WsMediaTransport {
    sender: mpsc::Sender<Message>,
    stream_sid: String,
}

impl WsMediaTransport {
    /// Wrap an outbound message channel for the given stream.
    #[must_use]
    pub fn new(sender: mpsc::Sender<Message>, stream_sid: String) -> Self {
        Self { sender, stream_sid }
    }
}

#[async_trait]
impl MediaTransport for WsMediaTransport {
    async fn send_media(&self, payload_b64: &str) -> Result<()> {
        let body = serde_json::json!({
            "event": "media",
            "streamSid": self.stream_sid,
            "media": { "payload": payload_b64 },
        });
        self.sender
            .send(Message::Text(body.to_string().into()))
            .await
            .map_err(|e| CoreError::Transport(format!("send failed: {e}")))
    }

    async fn send_clear(&self) -> Result<()> {
        let body = serde_json::json!({ "event": "clear", "streamSid": self.stream_sid });
        self.sender
            .send(Message::Text(body.to_string().into()))
            .await
            .map_err(|e| CoreError::Transport(format!("send failed: {e}")))?;
        // Sent twice, 10ms apart, to tolerate carrier frame-boundary loss
        // (spec §4.2 cancel semantics).
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        self.sender
            .send(Message::Text(body.to_string().into()))
            .await
            .map_err(|e| CoreError::Transport(format!("send failed: {e}")))
    }
}

/// Decode a base64 µ-law payload from an inbound `media` event.
///
/// # Errors
///
/// Returns an error if the payload is not valid base64.
pub fn decode_media_payload(payload: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| CoreError::Transport(format!("invalid base64 media payload: {e}")))
}

/// Base64-encode an outbound µ-law frame.
#[must_use]
pub fn encode_media_payload(mulaw: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(mulaw)
}

/// Shared application state for the axum router (spec: call setup/auth is
/// out of scope; this only threads the session-spawning callback through).
#[derive(Clone)]
pub struct AppState {
    /// Invoked with the raw WebSocket once a stream's `start` event arrives.
    pub on_connect: Arc<dyn Fn(WebSocket) + Send + Sync>,
}

/// Axum handler: upgrade to a WebSocket and hand it to `state.on_connect`.
pub async fn handle_media_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        info!("media transport connected");
        (state.on_connect)(socket);
    })
}

/// Parse one inbound text frame into an [`InboundEvent`], per spec §7's
/// protocol-violation policy: malformed JSON is logged and the frame
/// ignored rather than tearing down the connection.
#[must_use]
pub fn parse_inbound_event(text: &str) -> Option<InboundEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("malformed MediaTransport frame, ignoring: {e}");
            None
        }
    }
}
