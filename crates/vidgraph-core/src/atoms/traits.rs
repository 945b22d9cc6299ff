// ── Vidgraph Atoms: Provider Traits ────────────────────────────────────────
// Seams between the analysis components and the LLM endpoint, so extractors
// and detectors can be exercised against stubs in tests.
// Implementations live in engine/llm.rs.

use async_trait::async_trait;

use crate::atoms::error::EngineResult;

/// Chat-completion provider used by the two concept-extraction passes.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier, recorded on extraction results.
    fn model_name(&self) -> &str;

    /// Send one system+user exchange with a strict-JSON instruction and
    /// return the raw text the model produced.
    async fn complete_json(&self, system: &str, user: &str) -> EngineResult<String>;
}

/// Text-embedding provider used by the relationship detectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;
}
