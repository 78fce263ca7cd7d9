//! Error types for the voice-agent pipeline.

/// Top-level error type for the real-time pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// MediaTransport (carrier WebSocket) error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Audio decode/encode/resample error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Streaming STT upstream error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Embedding provider error.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Vector store error.
    #[error("vector store error: {0}")]
    VectorStore(String),

    /// LLM streaming error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// TTS streaming error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Tool execution error.
    #[error("tool error: {0}")]
    Tool(String),

    /// History store error.
    #[error("history error: {0}")]
    History(String),

    /// Webhook dispatch error.
    #[error("webhook error: {0}")]
    Webhook(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Inter-task channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Session-level fatal error (transport closed, watchdog elapsed).
    #[error("session error: {0}")]
    Session(String),
}

impl CoreError {
    /// Whether this error should escape a worker loop and trigger Session
    /// cleanup, as opposed to being caught and logged locally.
    ///
    /// Per the propagation policy: transient upstream and protocol-violation
    /// errors are handled inside each worker; only transport/session-fatal
    /// errors propagate.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Transport(_) | CoreError::Session(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CoreError>;
