// vidgraph-core — analysis core for the vidgraph knowledge-graph pipeline.
//
// Layering:
//   atoms/  — constants, errors, config, domain types, provider traits
//   engine/ — the pipeline components and shared HTTP plumbing

// ── Atoms (constants, errors, types) ───────────────────────────────────────
pub mod atoms;

// ── Engine (pipeline components) ───────────────────────────────────────────
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use atoms::graph_types::{
    Concept, ConceptMention, ConceptType, DetectionMethod, ExtractedConcepts,
    ExtractedRelationships, Neighbor, Relationship, RelationshipType, SegmentGroup, SegmentNode,
    TranscriptInput, TranscriptSegment, WordTiming,
};
pub use atoms::types::AppConfig;
pub use engine::pipeline::{Pipeline, PipelineReport, RunOptions};
