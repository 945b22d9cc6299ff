// ── Vidgraph Atoms: Configuration Types ────────────────────────────────────
// Typed configuration for every external endpoint and tunable stage.
// Credentials are loaded once at pipeline construction via `from_env()` and
// passed explicitly; no component reads the environment on its own.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::atoms::constants::{
    DEFAULT_EMBEDDING_MODEL, DEFAULT_LLM_BASE_URL, DEFAULT_LLM_MODEL, GRAPH_DEFAULT_DATABASE,
    SEGMENT_CLASS,
};
use crate::atoms::error::{EngineError, EngineResult};

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ── Vector store ───────────────────────────────────────────────────────────

/// Weaviate connection settings. The optional OpenAI key is forwarded as a
/// request header so the store can vectorize segment text server-side.
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub class_name: String,
}

impl VectorStoreConfig {
    pub fn from_env() -> EngineResult<Self> {
        let url = env_var("WEAVIATE_URL").ok_or_else(|| {
            EngineError::Config("missing Weaviate credentials: set WEAVIATE_URL".into())
        })?;
        Ok(Self {
            url,
            api_key: env_var("WEAVIATE_API_KEY"),
            openai_api_key: env_var("OPENAI_API_KEY"),
            class_name: SEGMENT_CLASS.to_string(),
        })
    }
}

// ── Graph store ────────────────────────────────────────────────────────────

/// Neo4j connection settings (HTTP transaction API).
#[derive(Debug, Clone)]
pub struct GraphStoreConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl GraphStoreConfig {
    pub fn from_env() -> EngineResult<Self> {
        let uri = env_var("NEO4J_URI");
        let user = env_var("NEO4J_USER");
        let password = env_var("NEO4J_PASSWORD");
        match (uri, user, password) {
            (Some(uri), Some(user), Some(password)) => Ok(Self {
                uri,
                user,
                password,
                database: env_var("NEO4J_DATABASE")
                    .unwrap_or_else(|| GRAPH_DEFAULT_DATABASE.to_string()),
            }),
            _ => Err(EngineError::Config(
                "missing Neo4j credentials: set NEO4J_URI, NEO4J_USER, and NEO4J_PASSWORD".into(),
            )),
        }
    }
}

// ── LLM endpoint ───────────────────────────────────────────────────────────

/// Chat-completion and embedding endpoint settings. Supports both standard
/// OpenAI and custom OpenAI-compatible bindings via LLM_BINDING_* variables.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f64,
}

impl LlmConfig {
    pub fn from_env() -> EngineResult<Self> {
        let api_key = env_var("LLM_BINDING_API_KEY")
            .or_else(|| env_var("OPENAI_API_KEY"))
            .ok_or_else(|| {
                EngineError::Config(
                    "missing LLM credentials: set OPENAI_API_KEY or LLM_BINDING_API_KEY".into(),
                )
            })?;
        Ok(Self {
            api_key,
            base_url: env_var("LLM_BINDING_HOST")
                .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            model: env_var("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            temperature: 0.3,
        })
    }
}

// ── Segment assembly ───────────────────────────────────────────────────────

/// Soft bounds for sentence accumulation into segments.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegmenterConfig {
    pub min_tokens: usize,
    pub max_tokens: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_tokens: 120,
            max_tokens: 320,
        }
    }
}

// ── Grouping ───────────────────────────────────────────────────────────────

/// Hyperparameters for the semantic grouping engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GroupingConfig {
    /// Nearest neighbors fetched per segment.
    pub k_neighbors: usize,
    /// Minimum raw cosine similarity to keep a neighbor.
    pub neighbor_threshold: f64,
    /// Minimum effective similarity to join adjacent segments.
    pub adjacent_threshold: f64,
    /// Temporal decay constant in seconds.
    pub temporal_tau: f64,
    /// Hard word-count split within a group.
    pub max_group_words: usize,
    /// Minimum segments per group, except possibly the final one.
    pub min_group_segments: usize,
    /// Centroid-similarity floor for the post-merge pass.
    pub merge_centroid_threshold: f64,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            k_neighbors: 8,
            neighbor_threshold: 0.80,
            adjacent_threshold: 0.70,
            temporal_tau: 150.0,
            max_group_words: 700,
            min_group_segments: 2,
            merge_centroid_threshold: 0.85,
        }
    }
}

// ── Relationship detectors ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Minimum cosine similarity for the intra-group embedding fallback.
    pub vector_similarity_threshold: f64,
    /// Minimum cosine similarity for the inter-group embedding path.
    pub similarity_threshold: f64,
    /// Maximum first-mention distance (seconds) for inter-group similarity.
    pub temporal_window: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            vector_similarity_threshold: 0.6,
            similarity_threshold: 0.75,
            temporal_window: 300.0,
        }
    }
}

// ── Pipeline ───────────────────────────────────────────────────────────────

/// Stage gating and processing parameters for one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub enable_grouping: bool,
    pub enable_concepts: bool,
    pub enable_relationships: bool,
    pub min_relationship_confidence: f64,
    /// Delay between LLM calls during Pass 1 (rate limiting).
    pub concept_delay_seconds: f64,
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_grouping: true,
            enable_concepts: true,
            enable_relationships: true,
            min_relationship_confidence: 0.6,
            concept_delay_seconds: 0.5,
            output_dir: PathBuf::from("output"),
        }
    }
}

impl PipelineConfig {
    pub fn transcripts_dir(&self) -> PathBuf {
        self.output_dir.join("transcripts")
    }

    pub fn groups_dir(&self) -> PathBuf {
        self.output_dir.join("groups")
    }

    pub fn relationships_dir(&self) -> PathBuf {
        self.output_dir.join("relationships")
    }
}

// ── Aggregate ──────────────────────────────────────────────────────────────

/// Complete application configuration, built once at pipeline construction.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub vector_store: VectorStoreConfig,
    pub graph_store: GraphStoreConfig,
    pub llm: LlmConfig,
    pub segmenter: SegmenterConfig,
    pub grouping: GroupingConfig,
    pub detectors: DetectorConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn from_env() -> EngineResult<Self> {
        Ok(Self {
            vector_store: VectorStoreConfig::from_env()?,
            graph_store: GraphStoreConfig::from_env()?,
            llm: LlmConfig::from_env()?,
            segmenter: SegmenterConfig::default(),
            grouping: GroupingConfig::default(),
            detectors: DetectorConfig::default(),
            pipeline: PipelineConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouping_defaults() {
        let cfg = GroupingConfig::default();
        assert_eq!(cfg.k_neighbors, 8);
        assert!((cfg.neighbor_threshold - 0.80).abs() < f64::EPSILON);
        assert!((cfg.adjacent_threshold - 0.70).abs() < f64::EPSILON);
        assert_eq!(cfg.max_group_words, 700);
        assert_eq!(cfg.min_group_segments, 2);
    }

    #[test]
    fn test_pipeline_output_dirs() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.groups_dir(), PathBuf::from("output/groups"));
        assert_eq!(
            cfg.relationships_dir(),
            PathBuf::from("output/relationships")
        );
    }
}
