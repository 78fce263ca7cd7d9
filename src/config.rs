//! Configuration types for the real-time voice-agent pipeline.
//!
//! [`RuntimeConfig`] is the process-wide, environment-driven configuration
//! described in spec §6 — loaded once at startup and shared by reference
//! across sessions. [`AgentConfig`] is the per-call, read-only configuration
//! supplied by the (out-of-scope) agent-lookup collaborator when a session
//! is created.

use serde::{Deserialize, Serialize};

/// Top-level, process-wide configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interruption detector (C2) settings.
    pub interrupt: InterruptConfig,
    /// Turn assembler (C3) settings.
    pub turn: TurnConfig,
    /// Retrieval + generation (C4) settings.
    pub rag: RagConfig,
    /// Per-call inactivity watchdog.
    pub call: CallConfig,
}

impl RuntimeConfig {
    /// Load configuration from the TOML file named by `FAE_CORE_CONFIG`, if
    /// set, falling back to built-in defaults, then apply `VOICECORE_*`
    /// environment overrides for the keys enumerated in spec §6.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> crate::error::Result<Self> {
        let mut config = match std::env::var("FAE_CORE_CONFIG") {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)?;
                toml::from_str(&text)
                    .map_err(|e| crate::error::CoreError::Config(format!("{path}: {e}")))?
            }
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        env_bool("VOICECORE_INTERRUPT_ENABLED", &mut self.interrupt.enabled);
        env_f32(
            "VOICECORE_INTERRUPT_MIN_ENERGY",
            &mut self.interrupt.min_energy,
        );
        env_f32(
            "VOICECORE_INTERRUPT_BASELINE_FACTOR",
            &mut self.interrupt.baseline_factor,
        );
        env_u32(
            "VOICECORE_INTERRUPT_MIN_SPEECH_MS",
            &mut self.interrupt.min_speech_ms,
        );
        env_u32(
            "VOICECORE_INTERRUPT_DEBOUNCE_MS",
            &mut self.interrupt.debounce_ms,
        );
        env_usize(
            "VOICECORE_INTERRUPT_REQUIRED_SAMPLES",
            &mut self.interrupt.required_samples,
        );
        env_f32(
            "VOICECORE_SILENCE_THRESHOLD_SEC",
            &mut self.turn.silence_threshold_sec,
        );
        env_bool(
            "VOICECORE_INTERIM_PROCESSING_ENABLED",
            &mut self.turn.interim_processing_enabled,
        );
        env_usize(
            "VOICECORE_INTERIM_MIN_LENGTH",
            &mut self.turn.interim_min_length,
        );
        env_usize("VOICECORE_RAG_K", &mut self.rag.k);
        env_f32(
            "VOICECORE_RAG_RELEVANCE_THRESHOLD",
            &mut self.rag.relevance_threshold,
        );
        env_usize("VOICECORE_RAG_CONTEXT_TOP", &mut self.rag.context_top);
        env_usize("VOICECORE_LLM_MAX_TOKENS", &mut self.rag.llm_max_tokens);
        env_usize("VOICECORE_HISTORY_WINDOW", &mut self.rag.history_window);
        env_u64(
            "VOICECORE_CALL_INACTIVITY_TIMEOUT_SEC",
            &mut self.call.inactivity_timeout_sec,
        );
    }
}

fn env_bool(key: &str, slot: &mut bool) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}

fn env_f32(key: &str, slot: &mut f32) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}

fn env_u32(key: &str, slot: &mut u32) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}

fn env_u64(key: &str, slot: &mut u64) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}

fn env_usize(key: &str, slot: &mut usize) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}

/// Interruption detector (C2) configuration — spec §4.2 / §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptConfig {
    /// Master on/off switch.
    pub enabled: bool,
    /// Absolute floor for "loud enough", in RMS energy units.
    pub min_energy: f32,
    /// Multiplicative factor over the rolling baseline.
    pub baseline_factor: f32,
    /// Sustained duration (ms) before the detector fires.
    pub min_speech_ms: u32,
    /// Minimum gap (ms) between consecutive triggers.
    pub debounce_ms: u32,
    /// High-energy samples required out of the last window.
    pub required_samples: usize,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_energy: 500.0,
            baseline_factor: 2.0,
            min_speech_ms: 100,
            debounce_ms: 300,
            required_samples: 2,
        }
    }
}

/// Turn assembler (C3) configuration — spec §4.3 / §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Silence required (seconds) after the last STT event before firing.
    ///
    /// The source exposed several conflicting defaults (0.1/0.3/0.8/1.5s)
    /// across different files; 0.8s is the median and is the default here
    /// (see DESIGN.md).
    pub silence_threshold_sec: f32,
    /// Enables utterance dispatch on long-enough partials ("fast path").
    pub interim_processing_enabled: bool,
    /// Minimum partial length (chars) to dispatch in fast-path mode.
    pub interim_min_length: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            silence_threshold_sec: 0.8,
            interim_processing_enabled: false,
            interim_min_length: 5,
        }
    }
}

/// Retrieval + generation (C4) configuration — spec §4.4 / §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Number of vector-store hits to retrieve.
    pub k: usize,
    /// Maximum distance accepted for a retrieved chunk.
    pub relevance_threshold: f32,
    /// Number of retrieved chunks included in the prompt context block.
    pub context_top: usize,
    /// Hard cap on generated tokens per turn.
    pub llm_max_tokens: usize,
    /// Number of prior turns included in the prompt.
    pub history_window: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            k: 6,
            relevance_threshold: 1.0,
            context_top: 3,
            llm_max_tokens: 1200,
            history_window: 6,
        }
    }
}

/// Whole-call watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Seconds of no audio and no STT events before the call is ended with
    /// status `timeout`.
    pub inactivity_timeout_sec: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_sec: 30,
        }
    }
}

/// Per-call agent configuration — spec §6, supplied by the (out-of-scope)
/// agent-lookup collaborator when a session is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Human-readable agent name.
    pub name: String,
    /// System prompt used to build the LLM prompt.
    pub system_prompt: String,
    /// First message spoken immediately on session start, if any.
    #[serde(default)]
    pub first_message: Option<String>,
    /// TTS voice identifier.
    pub voice_id: String,
    /// LLM model identifier.
    pub model_name: String,
    /// Per-agent override for the interruption detector master switch.
    #[serde(default = "default_true")]
    pub interrupt_enabled: bool,
    /// Per-agent override for the end-of-turn silence threshold (seconds).
    #[serde(default)]
    pub silence_threshold_sec: Option<f32>,
    /// Farewell line spoken on a Goodbye intent, if configured.
    #[serde(default)]
    pub farewell_message: Option<String>,
}

fn default_true() -> bool {
    true
}
