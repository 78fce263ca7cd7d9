//! Fae: a real-time voice-agent telephony pipeline.
//!
//! A carrier opens one bidirectional WebSocket per call, streaming 8kHz
//! µ-law audio frames in and out. Each call is driven by a
//! [`session::SessionController`], which coordinates:
//!
//! - **STT** (`stt`): streaming transcription with interim/final events
//! - **Turn assembly** (`turn`): deciding when a user has finished speaking
//! - **Barge-in detection** (`vad`): energy-based interruption of an
//!   in-progress reply
//! - **RAG** (`rag`, `embed`, `vectorstore`): retrieval-augmented, streaming
//!   generation, split into sentences as tokens arrive
//! - **Tool calls** (`tools`): inline and confirmed tool markers parsed out
//!   of the generated text
//! - **TTS** (`tts`): per-sentence streaming synthesis, resampled and
//!   re-encoded back to the carrier's µ-law frames
//!
//! Call history and outcomes are persisted via `history`, and external
//! systems are notified via `webhooks`.

pub mod audio;
pub mod cancel;
pub mod config;
pub mod embed;
pub mod error;
pub mod history;
pub mod llm;
pub mod pipeline;
pub mod rag;
pub mod retry;
pub mod session;
pub mod stt;
pub mod tools;
pub mod transport;
pub mod tts;
pub mod turn;
pub mod vad;
pub mod vectorstore;
pub mod webhooks;

pub use config::RuntimeConfig;
pub use error::{CoreError, Result};
pub use session::{SessionController, SessionDeps};
