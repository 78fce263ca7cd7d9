//! Message types passed between pipeline stages (spec §3, §5).

use std::time::Instant;

/// A single inbound 20ms µ-law frame from the carrier (spec §4.1).
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Raw µ-law bytes (160 bytes for a 20ms 8kHz frame).
    pub mulaw: Vec<u8>,
    /// When this frame was received.
    pub received_at: Instant,
}

/// A recognition event from the streaming STT upstream (spec §6).
#[derive(Debug, Clone)]
pub struct SttEvent {
    /// Recognized text (partial or final).
    pub text: String,
    /// Whether this is the STT provider's committed result.
    pub is_final: bool,
    /// Provider confidence score (unused for control, per spec §6).
    pub confidence: f32,
    /// Start offset of the recognized span, in ms.
    pub start_ms: u64,
    /// End offset of the recognized span, in ms.
    pub end_ms: u64,
}

/// A user utterance handed from the Turn Assembler to Generation (spec §4.3).
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Assembled utterance text.
    pub text: String,
    /// Whether the end-of-turn gate fired from a final STT result (false
    /// when fired via the fast-path/interim mode).
    pub from_final: bool,
}

/// A sentence produced by Generation, queued for TTS (spec §4.4/§3).
#[derive(Debug, Clone)]
pub struct SentenceChunk {
    /// Sentence text, tool markers stripped and markdown normalised.
    pub text: String,
    /// Tool invocation parsed from this sentence's marker, if any.
    pub tool_call: Option<ToolCall>,
}

/// A parsed tool marker (spec §4.7/§6).
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Tool name.
    pub name: String,
    /// Parsed parameter bag (string-keyed, string-or-number values per
    /// spec §9's "dynamic Python typing" note).
    pub params: Vec<(String, ParamValue)>,
    /// Whether this marker requires user confirmation before execution.
    pub requires_confirmation: bool,
}

/// A tool-marker parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// A string literal (quoted or a bare word).
    Str(String),
    /// A numeric literal.
    Number(f64),
}

impl ParamValue {
    /// Render as a plain string, regardless of underlying variant.
    #[must_use]
    pub fn as_display(&self) -> String {
        match self {
            ParamValue::Str(s) => s.clone(),
            ParamValue::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
        }
    }
}

/// A frame of synthesized linear PCM16 audio from TTS, ready for
/// resample/encode/emit (spec §4.5).
#[derive(Debug, Clone)]
pub struct SynthesizedFrame {
    /// 16-bit PCM samples, mono, at `sample_rate`.
    pub samples: Vec<i16>,
    /// Sample rate in Hz (16 kHz per spec §4.5 step 1).
    pub sample_rate: u32,
}
