//! End-to-end scenarios driving a full `SessionController` with fake
//! collaborators (spec §8 seed scenarios).

use async_trait::async_trait;
use fae::config::{AgentConfig, CallConfig, InterruptConfig, RagConfig, RuntimeConfig, TurnConfig};
use fae::embed::Embedder;
use fae::history::{CallStatus, HistoryStore, TurnRecord};
use fae::llm::{ChatMessage, Llm};
use fae::pipeline::messages::{SttEvent, SynthesizedFrame, ToolCall};
use fae::session::{SessionController, SessionDeps};
use fae::stt::{SttReceiver, SttSender, StreamingStt};
use fae::tools::ToolExecutor;
use fae::transport::MediaTransport;
use fae::tts::StreamingTts;
use fae::vectorstore::{Hit, VectorStore};
use fae::webhooks::HttpWebhooks;
use fae::{CoreError, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// A streaming STT upstream scripted by the test: events sent on the
/// matching `mpsc::Sender` are delivered in order as recognition events.
struct ScriptedStt {
    rx: Mutex<Option<mpsc::Receiver<SttEvent>>>,
}

impl ScriptedStt {
    fn new(rx: mpsc::Receiver<SttEvent>) -> Self {
        Self { rx: Mutex::new(Some(rx)) }
    }
}

#[async_trait]
impl StreamingStt for ScriptedStt {
    async fn open(&self) -> Result<(Box<dyn SttSender>, Box<dyn SttReceiver>)> {
        let rx = self
            .rx
            .lock()
            .expect("mutex")
            .take()
            .ok_or_else(|| CoreError::Stt("already opened".into()))?;
        Ok((Box::new(NoopSttSender), Box::new(ScriptedSttReceiver { rx })))
    }
}

struct NoopSttSender;

#[async_trait]
impl SttSender for NoopSttSender {
    async fn send_audio(&mut self, _pcm16: &[i16]) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) {}
}

struct ScriptedSttReceiver {
    rx: mpsc::Receiver<SttEvent>,
}

#[async_trait]
impl SttReceiver for ScriptedSttReceiver {
    async fn recv_event(&mut self) -> Result<Option<SttEvent>> {
        Ok(self.rx.recv().await)
    }
}

/// An LLM that ignores the prompt and streams back one scripted reply per
/// call, in order.
struct ScriptedLlm {
    replies: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().rev().map(str::to_string).collect()),
        }
    }
}

#[async_trait]
impl Llm for ScriptedLlm {
    async fn stream(&self, _messages: &[ChatMessage], _max_tokens: usize, tx: mpsc::Sender<String>) -> Result<()> {
        let reply = self.replies.lock().expect("mutex").pop().unwrap_or_default();
        let _ = tx.send(reply).await;
        Ok(())
    }
}

/// A fixed embedding vector, regardless of input text.
struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.1, 0.2, 0.3])
    }
}

/// A knowledge base with no chunks: every query returns zero hits.
struct EmptyVectorStore;

#[async_trait]
impl VectorStore for EmptyVectorStore {
    async fn query(&self, _agent_id: &str, _vector: &[f32], _k: usize) -> Result<Vec<Hit>> {
        Ok(Vec::new())
    }
}

/// Synthesizes a fixed burst of silence per sentence, regardless of text.
struct SilentTts;

#[async_trait]
impl StreamingTts for SilentTts {
    async fn synthesize(&self, _text: &str, _voice_id: &str) -> Result<mpsc::Receiver<SynthesizedFrame>> {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let _ = tx
                .send(SynthesizedFrame { samples: vec![0i16; 1600], sample_rate: 16_000 })
                .await;
        });
        Ok(rx)
    }
}

/// Records every outbound `media`/`clear` call for assertions.
#[derive(Default)]
struct RecordingTransport {
    media_sends: Mutex<usize>,
    clear_sends: Mutex<usize>,
}

#[async_trait]
impl MediaTransport for RecordingTransport {
    async fn send_media(&self, _payload_b64: &str) -> Result<()> {
        *self.media_sends.lock().expect("mutex") += 1;
        Ok(())
    }

    async fn send_clear(&self) -> Result<()> {
        *self.clear_sends.lock().expect("mutex") += 1;
        Ok(())
    }
}

/// Records every tool invocation and returns a scripted result.
#[derive(Default)]
struct RecordingToolExecutor {
    calls: Mutex<Vec<ToolCall>>,
}

#[async_trait]
impl ToolExecutor for RecordingToolExecutor {
    async fn execute(&self, call: &ToolCall) -> Result<String> {
        self.calls.lock().expect("mutex").push(call.clone());
        Ok("Transferring you now.".to_string())
    }
}

/// An in-memory `HistoryStore`, for asserting what got persisted mid-call.
#[derive(Default)]
struct InMemoryHistory {
    turns: Mutex<Vec<TurnRecord>>,
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn append_turn(&self, _call_id: &str, turn: &TurnRecord) -> Result<()> {
        self.turns.lock().expect("mutex").push(turn.clone());
        Ok(())
    }

    async fn finalize_call(
        &self,
        _call_id: &str,
        _agent_id: &str,
        _status: CallStatus,
        _started_at: chrono::DateTime<chrono::Utc>,
        _ended_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        Ok(())
    }
}

fn fast_runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        interrupt: InterruptConfig::default(),
        turn: TurnConfig {
            silence_threshold_sec: 0.1,
            interim_processing_enabled: false,
            interim_min_length: 5,
        },
        rag: RagConfig::default(),
        call: CallConfig { inactivity_timeout_sec: 30 },
    }
}

fn agent() -> AgentConfig {
    AgentConfig {
        name: "Test Agent".into(),
        system_prompt: "You are a helpful agent.".into(),
        first_message: None,
        voice_id: "v1".into(),
        model_name: "m1".into(),
        interrupt_enabled: true,
        silence_threshold_sec: None,
        farewell_message: Some("Goodbye!".into()),
    }
}

fn stt_event(text: &str) -> SttEvent {
    SttEvent { text: text.into(), is_final: true, confidence: 0.9, start_ms: 0, end_ms: 500 }
}

async fn wait_for(mut predicate: impl FnMut() -> bool, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !predicate() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met before timeout");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn barge_in_interrupts_the_response_and_the_call_continues() {
    // spec §8 scenario 2: a multi-sentence reply is interrupted mid-playback
    // by sustained loud audio. This is also the regression test for the TTS
    // drainer's `break`-on-cancel bug: if the drainer died here, every
    // subsequent sentence would hang forever on the bounded sentence queue.
    let (stt_tx, stt_rx) = mpsc::channel(16);
    let transport = Arc::new(RecordingTransport::default());
    let history = Arc::new(InMemoryHistory::default());

    let deps = Arc::new(SessionDeps {
        stt: Arc::new(ScriptedStt::new(stt_rx)),
        embedder: Arc::new(FixedEmbedder),
        vector_store: Arc::new(EmptyVectorStore),
        llm: Arc::new(ScriptedLlm::new(vec![
            "Sentence one. Sentence two. Sentence three.",
            "Sure, happy to help further.",
        ])),
        tts: Arc::new(SilentTts),
        tool_executor: Arc::new(RecordingToolExecutor::default()),
        history: Arc::clone(&history) as Arc<dyn HistoryStore>,
        webhooks: Arc::new(HttpWebhooks::new("http://127.0.0.1:9")),
    });

    let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(64);
    let session = SessionController::new(
        deps,
        fast_runtime_config(),
        agent(),
        "call-1".into(),
        "agent-1".into(),
        Arc::clone(&transport) as Arc<dyn MediaTransport>,
    );
    let handle = tokio::spawn(session.run(inbound_rx));

    // A silent frame establishes the noise-floor baseline.
    let silent_frame = fae::audio::mulaw_encode(&vec![0i16; 160]);
    inbound_tx.send(silent_frame.clone()).await.expect("send");
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Drive the first utterance: triggers generation of a 3-sentence reply.
    stt_tx.send(stt_event("hello there")).await.expect("send stt event");
    wait_for(|| *transport.media_sends.lock().expect("mutex") > 0, Duration::from_secs(2)).await;

    // Loud, sustained frames simulate the caller talking over the reply.
    let loud_frame = fae::audio::mulaw_encode(&vec![3000i16; 160]);
    for _ in 0..10 {
        inbound_tx.send(loud_frame.clone()).await.expect("send");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    wait_for(|| *transport.clear_sends.lock().expect("mutex") > 0, Duration::from_secs(2)).await;

    let media_sends_at_cancel = *transport.media_sends.lock().expect("mutex");

    // The session must still be able to answer a second utterance — proof
    // the TTS drainer kept running instead of dying on cancel.
    stt_tx.send(stt_event("can you still hear me")).await.expect("send stt event");
    wait_for(
        || history.turns.lock().expect("mutex").iter().any(|t| t.user == "can you still hear me"),
        Duration::from_secs(2),
    )
    .await;
    assert!(*transport.media_sends.lock().expect("mutex") > media_sends_at_cancel);

    // Give the phase transition back to Listening a moment to land before
    // the next utterance arrives.
    tokio::time::sleep(Duration::from_millis(100)).await;
    stt_tx.send(stt_event("goodbye")).await.expect("send stt event");

    let status = tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("session did not finish in time")
        .expect("session task panicked");
    assert_eq!(status, CallStatus::Completed);
}

#[tokio::test]
async fn confirmed_tool_call_waits_for_user_confirmation_before_executing() {
    // spec §8 scenario 4: a `[CONFIRM_TOOL:...]` marker must not execute
    // until the next utterance confirms it.
    let (stt_tx, stt_rx) = mpsc::channel(16);
    let tool_executor = Arc::new(RecordingToolExecutor::default());
    let history = Arc::new(InMemoryHistory::default());
    let transport = Arc::new(RecordingTransport::default());

    let deps = Arc::new(SessionDeps {
        stt: Arc::new(ScriptedStt::new(stt_rx)),
        embedder: Arc::new(FixedEmbedder),
        vector_store: Arc::new(EmptyVectorStore),
        llm: Arc::new(ScriptedLlm::new(vec!["I can do that for you. [CONFIRM_TOOL:transfer_call(reason=billing)]"])),
        tts: Arc::new(SilentTts),
        tool_executor: Arc::clone(&tool_executor) as Arc<dyn ToolExecutor>,
        history: Arc::clone(&history) as Arc<dyn HistoryStore>,
        webhooks: Arc::new(HttpWebhooks::new("http://127.0.0.1:9")),
    });

    let (_inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(64);
    let session = SessionController::new(
        deps,
        fast_runtime_config(),
        agent(),
        "call-2".into(),
        "agent-1".into(),
        Arc::clone(&transport) as Arc<dyn MediaTransport>,
    );
    let handle = tokio::spawn(session.run(inbound_rx));

    stt_tx.send(stt_event("please transfer me to billing")).await.expect("send stt event");

    // The lead-in sentence gets spoken, but the tool must not fire yet.
    wait_for(|| *transport.media_sends.lock().expect("mutex") > 0, Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(tool_executor.calls.lock().expect("mutex").is_empty());

    stt_tx.send(stt_event("yes")).await.expect("send stt event");
    wait_for(|| !tool_executor.calls.lock().expect("mutex").is_empty(), Duration::from_secs(2)).await;

    let calls = tool_executor.calls.lock().expect("mutex").clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "transfer_call");

    tokio::time::sleep(Duration::from_millis(100)).await;
    stt_tx.send(stt_event("goodbye")).await.expect("send stt event");

    let status = tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("session did not finish in time")
        .expect("session task panicked");
    assert_eq!(status, CallStatus::Completed);

    let turns = history.turns.lock().expect("mutex").clone();
    assert!(turns.iter().any(|t| t.tool_name.as_deref() == Some("transfer_call")));
}
