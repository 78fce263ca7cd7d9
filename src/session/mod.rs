//! Session Controller (C6, spec §4.6): the per-call state machine wiring
//! every other component together.

use crate::cancel::CancelSignal;
use crate::config::{AgentConfig, RuntimeConfig};
use crate::embed::Embedder;
use crate::history::{CallStatus, HistoryStore, TurnRecord};
use crate::llm::Llm;
use crate::pipeline::messages::{SentenceChunk, SttEvent, ToolCall};
use crate::rag::{self, Intent};
use crate::webhooks::Webhooks;
use crate::retry::{RetryDecision, RetryOnce};
use crate::stt::StreamingStt;
use crate::tools::{Affirmation, ToolExecutor, builtin, classify_affirmation};
use crate::transport::MediaTransport;
use crate::tts::StreamingTts;
use crate::turn::{TICK_PERIOD, TurnAssembler};
use crate::vad::InterruptionDetector;
use crate::vectorstore::VectorStore;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// The per-call phase (spec §3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Speaking the first message, if configured.
    Greeting,
    /// Waiting for user speech; detector disarmed.
    Listening,
    /// Generating and speaking a reply; detector armed.
    Responding,
    /// A confirmed tool call is pending a Confirm/Deny from the user.
    AwaitingConfirmation,
    /// Draining, persisting, and closing.
    Ending,
}

/// Process-wide collaborators, constructed once at startup and shared by
/// reference across sessions (spec §9).
pub struct SessionDeps {
    /// Streaming STT factory.
    pub stt: Arc<dyn StreamingStt>,
    /// Embedding provider.
    pub embedder: Arc<dyn Embedder>,
    /// Vector store.
    pub vector_store: Arc<dyn VectorStore>,
    /// LLM.
    pub llm: Arc<dyn Llm>,
    /// Streaming TTS factory.
    pub tts: Arc<dyn StreamingTts>,
    /// Tool executor for anything beyond the built-ins.
    pub tool_executor: Arc<dyn ToolExecutor>,
    /// Conversation history store.
    pub history: Arc<dyn HistoryStore>,
    /// Fire-and-forget webhook sink.
    pub webhooks: Arc<crate::webhooks::HttpWebhooks>,
}

/// Bounded capacity of the SentenceQueue (spec §3: "capacity ≈ 8").
const SENTENCE_QUEUE_CAPACITY: usize = 8;

/// A single call's state machine, owning its TurnBuffer/EnergyStats/phase
/// and driving its workers. One instance per call (spec §3 `Session`).
pub struct SessionController {
    deps: Arc<SessionDeps>,
    runtime_config: RuntimeConfig,
    agent_config: AgentConfig,
    call_id: String,
    agent_id: String,
    transport: Arc<dyn MediaTransport>,
    phase: Phase,
    history: Vec<TurnRecord>,
    cancel: CancelSignal,
    baseline: f32,
    detector: InterruptionDetector,
    pending_tool: Option<ToolCall>,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl SessionController {
    /// Create a new session for a just-started call.
    #[must_use]
    pub fn new(
        deps: Arc<SessionDeps>,
        runtime_config: RuntimeConfig,
        agent_config: AgentConfig,
        call_id: String,
        agent_id: String,
        transport: Arc<dyn MediaTransport>,
    ) -> Self {
        let interrupt_config = {
            let mut c = runtime_config.interrupt.clone();
            c.enabled = c.enabled && agent_config.interrupt_enabled;
            c
        };
        Self {
            deps,
            runtime_config,
            agent_config,
            call_id,
            agent_id,
            transport,
            phase: Phase::Greeting,
            history: Vec::new(),
            cancel: CancelSignal::new(),
            baseline: 50.0,
            detector: InterruptionDetector::new(interrupt_config),
            pending_tool: None,
            started_at: chrono::Utc::now(),
        }
    }

    fn silence_threshold(&self) -> f32 {
        self.agent_config
            .silence_threshold_sec
            .unwrap_or(self.runtime_config.turn.silence_threshold_sec)
    }

    /// Drive the session to completion: consumes inbound µ-law frames from
    /// `inbound_rx` and STT events it generates internally, until the
    /// transport closes or the call ends.
    ///
    /// Returns the final [`CallStatus`] for the caller to log.
    pub async fn run(mut self, mut inbound_rx: mpsc::Receiver<Vec<u8>>) -> CallStatus {
        let now = Instant::now();
        let mut turn_config = self.runtime_config.turn.clone();
        turn_config.silence_threshold_sec = self.silence_threshold();
        let mut turns = TurnAssembler::new(turn_config, now);
        let mut tick = tokio::time::interval(TICK_PERIOD);

        let mut stt_retry = RetryOnce::new();
        let (mut stt_audio_tx, mut stt_event_rx) = match self.try_open_stt().await {
            Some(pair) => (Some(pair.0), Some(pair.1)),
            None => match stt_retry.report_failure("stt-open") {
                RetryDecision::RetryOnce => match self.try_open_stt().await {
                    Some(pair) => (Some(pair.0), Some(pair.1)),
                    None => {
                        stt_retry.report_failure("stt-open");
                        (None, None)
                    }
                },
                RetryDecision::Degrade => (None, None),
            },
        };

        let (tts_sentence_tx, tts_sentence_rx) = mpsc::channel::<SentenceChunk>(SENTENCE_QUEUE_CAPACITY);
        let tts_handle = tokio::spawn(crate::tts::run_tts_drainer(
            Arc::clone(&tts_dep(&self.deps)),
            Arc::clone(&self.transport),
            self.agent_config.voice_id.clone(),
            tts_sentence_rx,
            self.cancel.clone(),
        ));

        let (gen_chunk_tx, mut gen_chunk_rx) = mpsc::channel::<SentenceChunk>(SENTENCE_QUEUE_CAPACITY);
        let (gen_done_tx, mut gen_done_rx) = mpsc::channel::<(String, rag::GenerationOutcome)>(1);

        if let Some(first) = self.agent_config.first_message.clone() {
            self.phase = Phase::Responding;
            self.detector.rearm();
            let _ = tts_sentence_tx
                .send(SentenceChunk { text: first, tool_call: None })
                .await;
        } else {
            self.phase = Phase::Listening;
        }

        let inactivity_timeout =
            std::time::Duration::from_secs(self.runtime_config.call.inactivity_timeout_sec);
        let mut last_activity = Instant::now();

        let status = loop {
            tokio::select! {
                frame = inbound_rx.recv() => {
                    let Some(mulaw) = frame else { break CallStatus::Disconnected };
                    last_activity = Instant::now();
                    self.on_media_frame(&mulaw, stt_audio_tx.as_ref(), &mut turns).await;
                }
                event = recv_or_pending(&mut stt_event_rx) => {
                    match event {
                        Some(event) => {
                            last_activity = Instant::now();
                            turns.on_stt_event(&event, Instant::now());
                        }
                        None => {
                            stt_event_rx = None;
                            match stt_retry.report_failure("stt") {
                                RetryDecision::RetryOnce => {
                                    if let Some((tx, rx)) = self.try_open_stt().await {
                                        stt_audio_tx = Some(tx);
                                        stt_event_rx = Some(rx);
                                    }
                                }
                                RetryDecision::Degrade => {
                                    stt_audio_tx = None;
                                    let _ = tts_sentence_tx
                                        .send(SentenceChunk {
                                            text: "I'm having trouble hearing you right now.".into(),
                                            tool_call: None,
                                        })
                                        .await;
                                    self.phase = Phase::Listening;
                                }
                            }
                        }
                    }
                }
                _ = tick.tick() => {
                    if let Some(utterance) = turns.tick(Instant::now()) {
                        self.on_utterance(utterance, gen_chunk_tx.clone(), gen_done_tx.clone(), &tts_sentence_tx).await;
                    }
                    if last_activity.elapsed() >= inactivity_timeout {
                        break CallStatus::Timeout;
                    }
                }
                chunk = gen_chunk_rx.recv() => {
                    let Some(chunk) = chunk else { continue };
                    self.on_generation_chunk(chunk, &tts_sentence_tx).await;
                }
                done = gen_done_rx.recv() => {
                    let Some((utterance, outcome)) = done else { continue };
                    self.on_generation_done(utterance, outcome, &tts_sentence_tx, &mut turns).await;
                    if self.phase == Phase::Ending {
                        break CallStatus::Completed;
                    }
                }
            }
            if self.phase == Phase::Ending {
                break CallStatus::Completed;
            }
        };

        // Let the TTS drainer flush whatever is already queued (e.g. a
        // farewell sentence) before the call record is closed.
        drop(tts_sentence_tx);
        drop(gen_chunk_tx);
        drop(stt_audio_tx);
        let _ = tts_handle.await;

        self.finalize(status).await
    }

    async fn on_media_frame(
        &mut self,
        mulaw: &[u8],
        stt_audio_tx: Option<&mpsc::Sender<Vec<u8>>>,
        turns: &mut TurnAssembler,
    ) {
        let pcm = crate::audio::mulaw_decode(mulaw);
        let energy = crate::audio::rms_energy(&pcm);

        if self.phase != Phase::Responding {
            self.baseline = (0.95 * self.baseline + 0.05 * energy).max(50.0);
        } else {
            let tick = self.detector.process_frame(energy, self.baseline, Instant::now());
            if tick.fire_cancel {
                self.fire_cancel(turns).await;
            }
        }

        if let Some(tx) = stt_audio_tx {
            let _ = tx.send(mulaw.to_vec()).await;
        }
    }

    /// Open one STT upstream connection and spawn its forwarder task,
    /// returning the fresh audio/event channel pair (spec §4.8: "close and
    /// reopen the channel once" on failure).
    async fn try_open_stt(&self) -> Option<(mpsc::Sender<Vec<u8>>, mpsc::Receiver<SttEvent>)> {
        match self.deps.stt.open().await {
            Ok((sender, receiver)) => {
                let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(64);
                let (event_tx, event_rx) = mpsc::channel(64);
                tokio::spawn(crate::stt::run_stt_forwarder(sender, receiver, audio_rx, event_tx));
                Some((audio_tx, event_rx))
            }
            Err(e) => {
                warn!("failed to open STT upstream: {e}");
                None
            }
        }
    }

    async fn fire_cancel(&mut self, turns: &mut TurnAssembler) {
        if !self.cancel.fire() {
            return;
        }
        if let Err(e) = self.transport.send_clear().await {
            warn!("failed to send clear on cancel: {e}");
        }
        self.phase = Phase::Listening;
        self.detector.rearm();
        turns.reset(Instant::now());
    }

    async fn on_utterance(
        &mut self,
        utterance: crate::pipeline::messages::Utterance,
        gen_chunk_tx: mpsc::Sender<SentenceChunk>,
        gen_done_tx: mpsc::Sender<(String, rag::GenerationOutcome)>,
        tts_sentence_tx: &mpsc::Sender<SentenceChunk>,
    ) {
        if utterance.text.trim().is_empty() {
            return;
        }

        if self.phase == Phase::AwaitingConfirmation {
            self.handle_confirmation(&utterance.text, tts_sentence_tx).await;
            return;
        }

        if self.phase != Phase::Listening {
            // Crosstalk/echo picked up while we're speaking (or still
            // greeting): the barge-in detector owns interruption, not the
            // Turn Assembler. Drop the fired utterance rather than starting
            // a second concurrent Generation task (spec §8 invariant 1).
            return;
        }

        let intent = rag::classify_intent(&utterance.text);
        if intent == Intent::Goodbye {
            let farewell = self
                .agent_config
                .farewell_message
                .clone()
                .unwrap_or_else(|| "Goodbye, take care.".to_string());
            let _ = gen_chunk_tx.send(SentenceChunk { text: farewell, tool_call: None }).await;
            self.phase = Phase::Ending;
            return;
        }

        self.cancel.rearm();
        self.phase = Phase::Responding;
        self.detector.rearm();

        let deps = Arc::clone(&self.deps);
        let agent_id = self.agent_id.clone();
        let agent_config = self.agent_config.clone();
        let history_snapshot = last_n(&self.history, self.runtime_config.rag.history_window);
        let rag_config = self.runtime_config.rag.clone();
        let cancel = self.cancel.clone();
        let text = utterance.text.clone();

        tokio::spawn(async move {
            let outcome = rag::run_generation(
                Arc::clone(&deps.embedder),
                Arc::clone(&deps.vector_store),
                Arc::clone(&deps.llm),
                &agent_id,
                &agent_config,
                &history_snapshot,
                &text,
                &rag_config,
                gen_chunk_tx,
                cancel,
            )
            .await;
            let _ = gen_done_tx.send((text, outcome)).await;
        });
    }

    async fn on_generation_chunk(&mut self, chunk: SentenceChunk, tts_sentence_tx: &mpsc::Sender<SentenceChunk>) {
        if let Some(call) = chunk.tool_call.clone() {
            if call.requires_confirmation {
                self.pending_tool = Some(call);
            } else {
                let _ = tts_sentence_tx
                    .send(SentenceChunk { text: chunk.text.clone(), tool_call: None })
                    .await;
                self.execute_immediate_tool(call, tts_sentence_tx).await;
                return;
            }
        }
        let _ = tts_sentence_tx.send(SentenceChunk { text: chunk.text, tool_call: None }).await;
    }

    async fn execute_immediate_tool(&mut self, call: ToolCall, tts_sentence_tx: &mpsc::Sender<SentenceChunk>) {
        let result = self.run_tool(&call).await;
        match result {
            Ok(text) => {
                let turn = TurnRecord {
                    user: String::new(),
                    assistant: text.clone(),
                    tool_name: Some(call.name.clone()),
                    timestamp: chrono::Utc::now(),
                };
                self.persist_turn(turn).await;
                let _ = tts_sentence_tx.send(SentenceChunk { text, tool_call: None }).await;
            }
            Err(e) => {
                warn!("tool execution failed: {e}");
                let _ = tts_sentence_tx
                    .send(SentenceChunk { text: "I wasn't able to do that.".into(), tool_call: None })
                    .await;
            }
        }
    }

    async fn run_tool(&mut self, call: &ToolCall) -> crate::error::Result<String> {
        match call.name.as_str() {
            builtin::END_CALL => {
                self.phase = Phase::Ending;
                Ok(String::new())
            }
            builtin::CALL_WEBHOOK => {
                let payload = serde_json::json!(call
                    .params
                    .iter()
                    .map(|(k, v)| (k.clone(), v.as_display()))
                    .collect::<std::collections::HashMap<_, _>>());
                self.deps.webhooks.dispatch("call_webhook", payload).await;
                Ok(String::new())
            }
            builtin::TRANSFER_CALL => self.deps.tool_executor.execute(call).await,
            _ => self.deps.tool_executor.execute(call).await,
        }
    }

    async fn handle_confirmation(&mut self, text: &str, tts_sentence_tx: &mpsc::Sender<SentenceChunk>) {
        match classify_affirmation(text) {
            Affirmation::Confirm => {
                if let Some(call) = self.pending_tool.take() {
                    self.execute_immediate_tool(call, tts_sentence_tx).await;
                }
                self.phase = Phase::Listening;
            }
            Affirmation::Deny => {
                self.pending_tool = None;
                self.phase = Phase::Listening;
            }
            Affirmation::Neither => {
                self.pending_tool = None;
                self.phase = Phase::Listening;
            }
        }
    }

    async fn on_generation_done(
        &mut self,
        utterance: String,
        outcome: rag::GenerationOutcome,
        _tts_sentence_tx: &mpsc::Sender<SentenceChunk>,
        turns: &mut TurnAssembler,
    ) {
        if outcome.llm_error && !outcome.cancelled {
            warn!("LLM stream errored mid-token");
        }
        if !outcome.full_text.is_empty() {
            let turn = TurnRecord {
                user: utterance,
                assistant: outcome.full_text,
                tool_name: None,
                timestamp: chrono::Utc::now(),
            };
            self.persist_turn(turn).await;
        }
        if self.pending_tool.is_some() {
            self.phase = Phase::AwaitingConfirmation;
        } else if self.phase != Phase::Ending {
            self.phase = Phase::Listening;
        }
        turns.reset(Instant::now());
    }

    /// Append `turn` to in-memory context and persist it immediately (spec
    /// §6: the transcript is part of the durable call record, not just a
    /// final summary written at hangup).
    async fn persist_turn(&mut self, turn: TurnRecord) {
        if let Err(e) = self.deps.history.append_turn(&self.call_id, &turn).await {
            warn!("failed to persist turn: {e}");
        }
        self.history.push(turn);
    }

    async fn finalize(self, status: CallStatus) -> CallStatus {
        let ended_at = chrono::Utc::now();
        if let Err(e) = self
            .deps
            .history
            .finalize_call(&self.call_id, &self.agent_id, status, self.started_at, ended_at)
            .await
        {
            warn!("failed to persist call record: {e}");
        }
        self.deps
            .webhooks
            .dispatch(
                "call.ended",
                serde_json::json!({ "call_id": self.call_id, "status": format!("{status:?}") }),
            )
            .await;
        info!(call_id = %self.call_id, ?status, "session ended");
        status
    }
}

fn last_n(history: &[TurnRecord], n: usize) -> Vec<TurnRecord> {
    let start = history.len().saturating_sub(n);
    history[start..].to_vec()
}

fn tts_dep(deps: &Arc<SessionDeps>) -> Arc<dyn StreamingTts> {
    Arc::clone(&deps.tts)
}

/// Await the next event on `rx`, or never resolve if STT has been
/// permanently degraded (`rx` is `None`) — keeps the degraded state out of
/// the `select!`'s ready set instead of spinning on a closed channel.
async fn recv_or_pending(rx: &mut Option<mpsc::Receiver<SttEvent>>) -> Option<SttEvent> {
    match rx {
        Some(r) => r.recv().await,
        None => std::future::pending().await,
    }
}
