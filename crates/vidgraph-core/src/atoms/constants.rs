// ── Vidgraph Atoms: Constants ──────────────────────────────────────────────
// All named constants for the crate live here.
// Rationale: collecting constants in one place eliminates magic strings,
// makes auditing easier, and keeps every layer's code self-documenting.

// ── Vector store ───────────────────────────────────────────────────────────
// The class name is part of the Weaviate schema; changing it orphans every
// previously uploaded segment. Treat as a stable identifier.
pub const SEGMENT_CLASS: &str = "Segment";

/// Objects per batch-upsert request. Weaviate accepts larger batches but
/// this keeps individual request bodies well under proxy limits.
pub const SEGMENT_BATCH_SIZE: usize = 100;

/// Upper bound on segments fetched per video.
pub const FETCH_LIMIT: usize = 10_000;

// ── Graph store ────────────────────────────────────────────────────────────
pub const GRAPH_DEFAULT_DATABASE: &str = "neo4j";

/// Relationship rows per UNWIND batch.
pub const RELATIONSHIP_BATCH_SIZE: usize = 100;

// ── Concurrency ────────────────────────────────────────────────────────────
/// Maximum in-flight k-NN queries during neighborhood construction.
pub const MAX_INFLIGHT_KNN: usize = 8;

// ── LLM ────────────────────────────────────────────────────────────────────
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Dimensionality requested from the embedding endpoint.
pub const EMBEDDING_DIMENSIONS: usize = 1536;

/// High completion limit so reasoning models do not truncate mid-JSON.
pub const LLM_MAX_TOKENS: u32 = 8_000;

// ── Validation bounds ──────────────────────────────────────────────────────
// Concept names/definitions and relationship evidence outside these bounds
// are rejected (too short) or truncated (too long).
pub const CONCEPT_NAME_MIN_CHARS: usize = 2;
pub const CONCEPT_NAME_MAX_CHARS: usize = 100;
pub const CONCEPT_DEFINITION_MIN_CHARS: usize = 10;
pub const CONCEPT_DEFINITION_MAX_CHARS: usize = 500;
pub const MENTION_SURFACE_MIN_CHARS: usize = 2;
pub const MENTION_SURFACE_MAX_CHARS: usize = 500;
pub const EVIDENCE_MIN_CHARS: usize = 10;
pub const EVIDENCE_MAX_CHARS: usize = 1000;

// ── Detection heuristics ───────────────────────────────────────────────────
/// Two concept mentions closer than this (characters) imply a generic
/// `uses` relationship when no explicit pattern matched.
pub const PROXIMITY_THRESHOLD_CHARS: usize = 100;

/// Context padding around a pattern match when extracting evidence.
pub const PATTERN_EVIDENCE_PAD: usize = 50;

/// Context padding around a proximity match when extracting evidence.
pub const PROXIMITY_EVIDENCE_PAD: usize = 30;

/// A cue-phrase match counts only when the earlier concept's name appears
/// within this window around the cue position (chars before, chars after).
pub const CUE_LOOKBEHIND_CHARS: usize = 100;
pub const CUE_LOOKAHEAD_CHARS: usize = 200;
