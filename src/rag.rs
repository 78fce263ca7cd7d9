//! Retrieval + Generation (C4, spec §4.4): intent classification, vector
//! retrieval, prompt assembly, and the streaming generation task that turns
//! an utterance into a sequence of [`SentenceChunk`]s.

use crate::cancel::CancelSignal;
use crate::config::{AgentConfig, RagConfig};
use crate::embed::Embedder;
use crate::history::TurnRecord;
use crate::llm::{ChatMessage, Llm, find_sentence_boundary};
use crate::pipeline::messages::SentenceChunk;
use crate::tools::{Affirmation, extract_tool_marker};
use crate::vectorstore::VectorStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// A cheap lexical classification of a user utterance (spec §4.4 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// An opening greeting.
    Greeting,
    /// A closing statement; short-circuits to the Ending flow.
    Goodbye,
    /// An affirmative response, meaningful only in `AwaitingConfirmation`.
    Confirm,
    /// A negative response, meaningful only in `AwaitingConfirmation`.
    Deny,
    /// A question directed at the agent.
    Question,
    /// A request to perform an action.
    Action,
    /// Anything else.
    Other,
}

const GREETING_WORDS: &[&str] = &["hello", "hi", "hey", "good morning", "good afternoon"];
const GOODBYE_WORDS: &[&str] = &["goodbye", "bye", "see you", "that's all", "that is all"];
const ACTION_WORDS: &[&str] = &["please", "can you", "could you", "i need", "i want", "schedule", "transfer", "cancel"];

/// Classify `text` into an [`Intent]` using a closed set of lexical cues.
#[must_use]
pub fn classify_intent(text: &str) -> Intent {
    let lower = text.to_lowercase();
    let trimmed = lower.trim();

    match crate::tools::classify_affirmation(trimmed) {
        Affirmation::Confirm => return Intent::Confirm,
        Affirmation::Deny => return Intent::Deny,
        Affirmation::Neither => {}
    }
    if GOODBYE_WORDS.iter().any(|w| trimmed.contains(w)) {
        return Intent::Goodbye;
    }
    if GREETING_WORDS.iter().any(|w| trimmed.starts_with(w)) {
        return Intent::Greeting;
    }
    if trimmed.ends_with('?') || trimmed.starts_with("what") || trimmed.starts_with("how") || trimmed.starts_with("why") {
        return Intent::Question;
    }
    if ACTION_WORDS.iter().any(|w| trimmed.contains(w)) {
        return Intent::Action;
    }
    Intent::Other
}

/// Retrieve and assemble the context block for `query_vector` (spec §4.4
/// step 3): top-k hits filtered by `relevance_threshold`, the top
/// `context_top` joined with `"\n\n---\n\n"`.
///
/// Vector-store errors are swallowed into an empty context, per spec §4.8
/// ("Vector store error: Treat as zero retrieved chunks").
pub async fn retrieve_context(
    store: &dyn VectorStore,
    agent_id: &str,
    query_vector: &[f32],
    config: &RagConfig,
) -> String {
    let hits = match store.query(agent_id, query_vector, config.k).await {
        Ok(hits) => hits,
        Err(e) => {
            warn!("vector store query failed, using empty context: {e}");
            Vec::new()
        }
    };

    let relevant: Vec<&str> = hits
        .iter()
        .filter(|h| h.distance <= f64::from(config.relevance_threshold))
        .take(config.context_top)
        .map(|h| h.text.as_str())
        .collect();

    relevant.join("\n\n---\n\n")
}

/// Assemble the full prompt (spec §4.4 step 4): system block, history block,
/// context block, then the user utterance.
#[must_use]
pub fn build_prompt(
    agent: &AgentConfig,
    history: &[TurnRecord],
    context: &str,
    utterance: &str,
) -> Vec<ChatMessage> {
    let directive = if context.is_empty() {
        "Answer only using the context above. If the context is empty or doesn't contain the answer, politely say you don't have that information."
    } else {
        "Answer only using the context above; do not invent facts outside it."
    };

    let system = format!("{}\n\n{directive}", agent.system_prompt);

    let mut messages = vec![ChatMessage {
        role: "system",
        content: system,
    }];

    for turn in history {
        messages.push(ChatMessage {
            role: "user",
            content: format!("User: {}", turn.user),
        });
        messages.push(ChatMessage {
            role: "assistant",
            content: format!("Assistant: {}", turn.assistant),
        });
    }

    let user_content = if context.is_empty() {
        utterance.to_string()
    } else {
        format!("Context:\n{context}\n\nUser: {utterance}")
    };
    messages.push(ChatMessage {
        role: "user",
        content: user_content,
    });

    messages
}

/// Outcome of one generation run, used by the Session Controller to decide
/// the next phase and history update (spec §4.4 step 6, §4.8).
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// The full, clean (marker-stripped) assistant text, for history.
    pub full_text: String,
    /// Whether the run was cut short by the cancel signal.
    pub cancelled: bool,
    /// Whether the LLM stream itself errored mid-token (spec §4.8).
    pub llm_error: bool,
}

/// Run one generation turn (spec §4.4 steps 2–7): embed, retrieve, stream
/// the LLM, split into sentences, scan for tool markers, and enqueue onto
/// `sentence_tx`. Checks `cancel` at every suspension point.
pub async fn run_generation(
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn Llm>,
    agent_id: &str,
    agent: &AgentConfig,
    history: &[TurnRecord],
    utterance: &str,
    rag_config: &RagConfig,
    sentence_tx: mpsc::Sender<SentenceChunk>,
    cancel: CancelSignal,
) -> GenerationOutcome {
    let query_vector = match embedder.embed(utterance).await {
        Ok(v) => v,
        Err(e) => {
            warn!("embedding failed, proceeding with empty context: {e}");
            Vec::new()
        }
    };

    let context = if query_vector.is_empty() {
        String::new()
    } else {
        retrieve_context(store.as_ref(), agent_id, &query_vector, rag_config).await
    };

    let prompt = build_prompt(agent, history, &context, utterance);

    let (token_tx, mut token_rx) = mpsc::channel::<String>(64);
    let llm_for_task = Arc::clone(&llm);
    let max_tokens = rag_config.llm_max_tokens;
    let prompt_for_task = prompt.clone();
    let stream_handle = tokio::spawn(async move {
        llm_for_task.stream(&prompt_for_task, max_tokens, token_tx).await
    });

    let mut full_text = String::new();
    let mut sentence_buffer = String::new();
    let mut cancelled = false;

    while let Some(token) = token_rx.recv().await {
        if cancel.is_set() {
            cancelled = true;
            break;
        }
        full_text.push_str(&token);
        sentence_buffer.push_str(&token);

        while let Some(idx) = find_sentence_boundary(&sentence_buffer) {
            let sentence_text = sentence_buffer[..=idx].trim().to_string();
            sentence_buffer.drain(..=idx);
            if sentence_text.is_empty() {
                continue;
            }
            if cancel.is_set() {
                cancelled = true;
                break;
            }
            let (clean_text, tool_call) = extract_tool_marker(&sentence_text);
            let chunk = SentenceChunk {
                text: normalize_for_tts(&clean_text),
                tool_call,
            };
            if sentence_tx.send(chunk).await.is_err() {
                cancelled = true;
                break;
            }
        }
        if cancelled {
            break;
        }
    }

    let llm_error = match stream_handle.await {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            warn!("LLM stream error mid-token: {e}");
            !cancelled
        }
        Err(e) => {
            warn!("LLM stream task panicked: {e}");
            !cancelled
        }
    };

    if !cancelled {
        let remaining = sentence_buffer.trim().to_string();
        if !remaining.is_empty() {
            let (clean_text, tool_call) = extract_tool_marker(&remaining);
            let chunk = SentenceChunk {
                text: normalize_for_tts(&clean_text),
                tool_call,
            };
            let _ = sentence_tx.send(chunk).await;
        }
    }

    GenerationOutcome {
        full_text: full_text.trim().to_string(),
        cancelled,
        llm_error,
    }
}

/// Strip the minimal markdown the LLM might emit, for cleaner TTS input.
fn normalize_for_tts(text: &str) -> String {
    text.replace(['*', '_', '`', '#'], "")
}
