//! Streaming text-to-speech adapter and the TTS Streamer drain loop (C5,
//! spec §4.5).
//!
//! Structured the same way as `stt::StreamingStt`: a factory trait opening
//! one synthesis channel per sentence, which yields [`SynthesizedFrame`]s
//! until the upstream closes.

use crate::cancel::CancelSignal;
use crate::error::{CoreError, Result};
use crate::pipeline::messages::{SentenceChunk, SynthesizedFrame};
use crate::transport::MediaTransport;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

/// Opens one streaming synthesis channel per sentence.
#[async_trait]
pub trait StreamingTts: Send + Sync {
    /// Begin synthesising `text` with `voice_id`, returning a receiver of
    /// PCM frames.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream connection cannot be established.
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<mpsc::Receiver<SynthesizedFrame>>;
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
}

#[derive(Deserialize)]
struct WireFrame {
    samples: Vec<i16>,
    sample_rate: u32,
}

/// Default [`StreamingTts`] adapter: a WebSocket client to a generic
/// streaming-TTS provider, one connection per sentence.
pub struct WsStreamingTts {
    url: String,
}

impl WsStreamingTts {
    /// Create a new adapter targeting the given WebSocket URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl StreamingTts for WsStreamingTts {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<mpsc::Receiver<SynthesizedFrame>> {
        let (stream, _response) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| CoreError::Tts(format!("connect failed: {e}")))?;
        let (mut sink, mut source) = stream.split();

        let request = SynthesizeRequest { text, voice_id };
        let request_text = serde_json::to_string(&request)
            .map_err(|e| CoreError::Tts(format!("request encode failed: {e}")))?;
        sink.send(Message::Text(request_text.into()))
            .await
            .map_err(|e| CoreError::Tts(format!("send failed: {e}")))?;

        let (frame_tx, frame_rx) = mpsc::channel(16);
        tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<WireFrame>(&text) {
                        Ok(wire) => {
                            let frame = SynthesizedFrame {
                                samples: wire.samples,
                                sample_rate: wire.sample_rate,
                            };
                            if frame_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("malformed TTS frame: {e}");
                            break;
                        }
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
            let _ = sink.close().await;
        });

        Ok(frame_rx)
    }
}

/// Backpressure timeout for `MediaTransport` sends (spec §4.5, §5: "500ms").
const SEND_BACKPRESSURE_TIMEOUT: Duration = Duration::from_millis(500);

/// The TTS Streamer (C5): drains `sentence_rx`, synthesising and emitting
/// each sentence's audio until the queue closes or `cancel` fires.
pub async fn run_tts_drainer(
    tts: Arc<dyn StreamingTts>,
    transport: Arc<dyn MediaTransport>,
    voice_id: String,
    mut sentence_rx: mpsc::Receiver<SentenceChunk>,
    cancel: CancelSignal,
) {
    while let Some(chunk) = sentence_rx.recv().await {
        if cancel.is_set() {
            continue;
        }
        if chunk.text.trim().is_empty() {
            continue;
        }
        if let Err(e) = synthesize_and_emit(tts.as_ref(), transport.as_ref(), &chunk.text, &voice_id, &cancel).await {
            warn!("TTS stream error, dropping sentence: {e}");
            continue;
        }
    }
}

async fn synthesize_and_emit(
    tts: &dyn StreamingTts,
    transport: &dyn MediaTransport,
    text: &str,
    voice_id: &str,
    cancel: &CancelSignal,
) -> Result<()> {
    let mut frames = tts.synthesize(text, voice_id).await?;

    while let Some(frame) = frames.recv().await {
        if cancel.is_set() {
            frames.close();
            return Ok(());
        }
        emit_frame(transport, &frame, cancel).await?;
    }
    Ok(())
}

async fn emit_frame(transport: &dyn MediaTransport, frame: &SynthesizedFrame, cancel: &CancelSignal) -> Result<()> {
    let pcm_8k = crate::audio::resample_linear(&frame.samples, frame.sample_rate, 8_000);
    for frame_20ms in pcm_8k.chunks(crate::audio::FRAME_BYTES_8KHZ) {
        if cancel.is_set() {
            return Ok(());
        }
        let mulaw = crate::audio::mulaw_encode(frame_20ms);
        let payload = crate::transport::encode_media_payload(&mulaw);

        match tokio::time::timeout(SEND_BACKPRESSURE_TIMEOUT, transport.send_media(&payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(CoreError::Transport("send backpressure timeout".into()));
            }
        }
    }
    Ok(())
}
