// ── Vidgraph Atoms: Error Types ────────────────────────────────────────────
// Single canonical error enum for the analysis core, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, stores, LLM, config…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • No variant carries secret material (API keys, passwords) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Vector store rejected a request or returned a malformed response.
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Graph store rejected a request or returned Cypher errors.
    #[error("Graph store error: {0}")]
    GraphStore(String),

    /// LLM endpoint HTTP or response-format failure.
    #[error("LLM error: {model}: {message}")]
    Llm { model: String, message: String },

    /// Required endpoint URL or credential absent at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transcript produced no segments.
    #[error("Empty transcript: {0}")]
    EmptyTranscript(String),

    /// The pipeline was cancelled cooperatively.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create an LLM error with model name and message.
    pub fn llm(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Llm {
            model: model.into(),
            message: message.into(),
        }
    }
}

// ── Bridge: String → EngineError ───────────────────────────────────────────
// Allows `?` on helpers that produce plain string messages.

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All core operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;

// ── Conversion: EngineError → String ───────────────────────────────────────
// Lets CLI boundaries call `.map_err(EngineError::into)` directly.

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}
