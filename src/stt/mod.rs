//! Streaming speech-to-text upstream adapter.
//!
//! `StreamingStt` is the external collaborator named in spec §1/§2: a live
//! recognition channel fed resampled linear PCM and emitting
//! `{text, is_final, confidence, start_ms, end_ms}` events (spec §6). The
//! default adapter here speaks a generic streaming-STT WebSocket protocol,
//! adapted from the teacher's `ParakeetStt` (`transcribe`/`ensure_loaded`
//! shape) but over the network instead of a local ONNX model.

use crate::error::{CoreError, Result};
use crate::pipeline::messages::SttEvent;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use futures_util::stream::{SplitSink, SplitStream};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tracing::{info, warn};

/// A streaming STT provider: opens one send/receive session pair per call.
#[async_trait]
pub trait StreamingStt: Send + Sync {
    /// Open a new recognition channel for one call, returning the send and
    /// receive halves separately so both can be driven concurrently.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream connection cannot be established.
    async fn open(&self) -> Result<(Box<dyn SttSender>, Box<dyn SttReceiver>)>;
}

/// The send half of an open streaming STT session.
#[async_trait]
pub trait SttSender: Send {
    /// Forward a frame of resampled 16kHz mono PCM16 audio.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream write fails.
    async fn send_audio(&mut self, pcm16: &[i16]) -> Result<()>;

    /// Close the upstream write side.
    async fn close(&mut self);
}

/// The receive half of an open streaming STT session.
#[async_trait]
pub trait SttReceiver: Send {
    /// Receive the next recognition event, or `None` when the upstream
    /// closes the session cleanly.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream read fails or emits malformed JSON.
    async fn recv_event(&mut self) -> Result<Option<SttEvent>>;
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    text: String,
    is_final: bool,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    start_ms: u64,
    #[serde(default)]
    end_ms: u64,
}

/// Default `StreamingStt` adapter: a WebSocket client to a generic
/// streaming-STT provider.
pub struct WsStreamingStt {
    url: String,
}

impl WsStreamingStt {
    /// Create a new adapter targeting the given WebSocket URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[async_trait]
impl StreamingStt for WsStreamingStt {
    async fn open(&self) -> Result<(Box<dyn SttSender>, Box<dyn SttReceiver>)> {
        let (stream, _response) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| CoreError::Stt(format!("connect failed: {e}")))?;
        info!(url = %self.url, "STT upstream connected");
        let (sink, stream) = stream.split();
        Ok((
            Box::new(WsSttSender { sink }),
            Box::new(WsSttReceiver { stream }),
        ))
    }
}

struct WsSttSender {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl SttSender for WsSttSender {
    async fn send_audio(&mut self, pcm16: &[i16]) -> Result<()> {
        let bytes: Vec<u8> = pcm16.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.sink
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| CoreError::Stt(format!("send failed: {e}")))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            warn!("error closing STT sender: {e}");
        }
    }
}

struct WsSttReceiver {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl SttReceiver for WsSttReceiver {
    async fn recv_event(&mut self) -> Result<Option<SttEvent>> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(CoreError::Stt(format!("recv failed: {e}"))),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Text(text))) => {
                    let wire: WireEvent = serde_json::from_str(&text)
                        .map_err(|e| CoreError::Stt(format!("malformed STT event: {e}")))?;
                    return Ok(Some(SttEvent {
                        text: wire.text,
                        is_final: wire.is_final,
                        confidence: wire.confidence,
                        start_ms: wire.start_ms,
                        end_ms: wire.end_ms,
                    }));
                }
                Some(Ok(_)) => continue,
            }
        }
    }
}

/// Drive one STT session: forward raw µ-law frames from `audio_rx` (resampled
/// to 16kHz linear PCM) to the upstream, and forward recognition events to
/// `event_tx`, until either side closes (spec §4.1 step 4, §5).
pub async fn run_stt_forwarder(
    mut sender: Box<dyn SttSender>,
    mut receiver: Box<dyn SttReceiver>,
    mut audio_rx: mpsc::Receiver<Vec<u8>>,
    event_tx: mpsc::Sender<SttEvent>,
) {
    loop {
        tokio::select! {
            frame = audio_rx.recv() => {
                let Some(mulaw) = frame else { break };
                let pcm8k = crate::audio::mulaw_decode(&mulaw);
                let pcm16k = crate::audio::resample_linear(&pcm8k, 8_000, 16_000);
                if let Err(e) = sender.send_audio(&pcm16k).await {
                    warn!("STT upstream send failed: {e}");
                    break;
                }
            }
            event = receiver.recv_event() => {
                match event {
                    Ok(Some(ev)) => {
                        if event_tx.send(ev).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("STT upstream recv failed: {e}");
                        break;
                    }
                }
            }
        }
    }
    sender.close().await;
}
