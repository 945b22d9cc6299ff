// ── Vidgraph Atoms: Knowledge Graph Types ──────────────────────────────────
//
// Type definitions for the transcript analysis core. These are data types
// with validation and derived accessors only; network I/O lives in engine/.
//
// Lifecycle overview:
//   TranscriptInput → TranscriptSegment (assembler)
//   SegmentNode + Neighbor → SegmentGroup (grouping engine)
//   SegmentGroup → Concept candidates (Pass 1) → consolidated Concepts (Pass 2)
//   Concepts → Relationship edges (pattern / cue / embedding detectors)

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::atoms::constants::{
    CONCEPT_DEFINITION_MAX_CHARS, CONCEPT_DEFINITION_MIN_CHARS, CONCEPT_NAME_MAX_CHARS,
    CONCEPT_NAME_MIN_CHARS, EVIDENCE_MAX_CHARS, EVIDENCE_MIN_CHARS, MENTION_SURFACE_MAX_CHARS,
    MENTION_SURFACE_MIN_CHARS,
};
use crate::atoms::error::{EngineError, EngineResult};

// ═════════════════════════════════════════════════════════════════════════════
// SECTION 1: Transcript input and segments
// ═════════════════════════════════════════════════════════════════════════════

/// Timing of one spoken word, in seconds from video start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WordTiming {
    pub start_s: f64,
    pub end_s: f64,
}

/// What the external transcript provider hands us: a word-level timeline and
/// the punctuation-restored text of the same video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptInput {
    pub video_id: String,
    pub timeline: Vec<WordTiming>,
    pub punctuated_text: String,
}

/// A sentence-chunked, timestamped fragment of one video's transcript.
/// Created once by the segment assembler; never mutated after upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub video_id: String,
    pub text: String,
    pub start_s: f64,
    pub end_s: f64,
    pub tokens: usize,
}

impl TranscriptSegment {
    /// Deterministic UUID over (video_id, start_s). The start time is
    /// rendered with fixed six-decimal precision so equal floats always
    /// produce equal ids.
    pub fn deterministic_id(&self) -> Uuid {
        segment_id(&self.video_id, self.start_s)
    }
}

/// Deterministic segment UUID shared by the assembler and the vector store.
pub fn segment_id(video_id: &str, start_s: f64) -> Uuid {
    let key = format!("{}:{:.6}", video_id, start_s);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
}

// ═════════════════════════════════════════════════════════════════════════════
// SECTION 2: Grouping
// ═════════════════════════════════════════════════════════════════════════════

/// A neighboring segment returned by a k-NN query, with similarity and
/// timing. Scoped to one grouping run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighbor {
    pub segment_id: Uuid,
    /// Position of this neighbor in the video's fetched sequence, when known.
    #[serde(default)]
    pub index: Option<usize>,
    pub similarity: f64,
    pub start_s: f64,
    pub end_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Neighbor {
    /// Time-penalized similarity relative to a reference timestamp.
    /// The exponential decay prevents topic teleportation: semantically
    /// similar but temporally distant segments are down-weighted.
    pub fn effective_similarity(&self, ref_time: f64, tau: f64) -> f64 {
        let time_diff = (self.start_s - ref_time).abs();
        self.similarity * (-time_diff / tau).exp()
    }
}

/// A fetched segment with neighborhood information, used during grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentNode {
    pub id: Uuid,
    pub video_id: String,
    /// Position in the video timeline (dense, start_s ascending).
    pub index: usize,
    pub text: String,
    pub start_s: f64,
    pub end_s: f64,
    pub word_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing)]
    pub neighbors: Vec<Neighbor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<usize>,
}

impl SegmentNode {
    pub fn duration(&self) -> f64 {
        self.end_s - self.start_s
    }
}

/// A temporally contiguous set of segments forming one topic cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentGroup {
    pub group_id: usize,
    pub video_id: String,
    pub segments: Vec<SegmentNode>,
}

impl SegmentGroup {
    /// Earliest start time in the group.
    pub fn start_time(&self) -> f64 {
        self.segments
            .iter()
            .map(|s| s.start_s)
            .fold(f64::INFINITY, f64::min)
    }

    /// Latest end time in the group.
    pub fn end_time(&self) -> f64 {
        self.segments
            .iter()
            .map(|s| s.end_s)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn duration(&self) -> f64 {
        self.end_time() - self.start_time()
    }

    /// Total word count across all segments.
    pub fn total_words(&self) -> usize {
        self.segments.iter().map(|s| s.word_count).sum()
    }

    /// Concatenated text of all segments.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Average embedding vector of all embedded segments, or None when no
    /// member carries an embedding.
    pub fn centroid_embedding(&self) -> Option<Vec<f32>> {
        let embeddings: Vec<&Vec<f32>> = self
            .segments
            .iter()
            .filter_map(|s| s.embedding.as_ref())
            .collect();
        let first = embeddings.first()?;
        let dim = first.len();
        let mut centroid = vec![0.0_f32; dim];
        for emb in &embeddings {
            for (j, &v) in emb.iter().enumerate().take(dim) {
                centroid[j] += v;
            }
        }
        let n = embeddings.len() as f32;
        for v in centroid.iter_mut() {
            *v /= n;
        }
        Some(centroid)
    }

    /// Average pairwise cosine similarity within the group.
    /// Groups with fewer than two embedded members are maximally cohesive.
    pub fn avg_internal_similarity(&self) -> f64 {
        let embeddings: Vec<&Vec<f32>> = self
            .segments
            .iter()
            .filter_map(|s| s.embedding.as_ref())
            .collect();
        if embeddings.len() < 2 {
            return 1.0;
        }
        let mut total = 0.0;
        let mut pairs = 0usize;
        for i in 0..embeddings.len() {
            for j in (i + 1)..embeddings.len() {
                total += cosine_similarity(embeddings[i], embeddings[j]);
                pairs += 1;
            }
        }
        total / pairs as f64
    }
}

/// Cosine similarity between two vectors. Zero-norm vectors compare as 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for i in 0..len {
        dot += a[i] as f64 * b[i] as f64;
        norm_a += (a[i] as f64).powi(2);
        norm_b += (b[i] as f64).powi(2);
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    dot / denom
}

// ═════════════════════════════════════════════════════════════════════════════
// SECTION 3: Concepts
// ═════════════════════════════════════════════════════════════════════════════

/// Closed enumeration of concept types. Unknown strings coerce to Concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConceptType {
    Person,
    Organization,
    Technology,
    Method,
    Problem,
    Solution,
    Concept,
    Metric,
    Dataset,
    Event,
    Place,
}

impl ConceptType {
    /// Convert a string to a ConceptType, defaulting to Concept when invalid.
    pub fn from_string(value: &str) -> Self {
        match value {
            "Person" => Self::Person,
            "Organization" => Self::Organization,
            "Technology" => Self::Technology,
            "Method" => Self::Method,
            "Problem" => Self::Problem,
            "Solution" => Self::Solution,
            "Concept" => Self::Concept,
            "Metric" => Self::Metric,
            "Dataset" => Self::Dataset,
            "Event" => Self::Event,
            "Place" => Self::Place,
            _ => Self::Concept,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "Person",
            Self::Organization => "Organization",
            Self::Technology => "Technology",
            Self::Method => "Method",
            Self::Problem => "Problem",
            Self::Solution => "Solution",
            Self::Concept => "Concept",
            Self::Metric => "Metric",
            Self::Dataset => "Dataset",
            Self::Event => "Event",
            Self::Place => "Place",
        }
    }
}

/// A distinct idea, entity, or topic extracted from a group.
///
/// Pass 1 produces transient candidates with deterministic ids; Pass 2 mints
/// fresh random ids for the consolidated set that is persisted to the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub id: Uuid,
    pub name: String,
    pub definition: String,
    #[serde(rename = "type")]
    pub concept_type: ConceptType,
    pub importance: f64,
    pub confidence: f64,
    pub video_id: String,
    pub group_id: usize,
    pub first_mention_time: f64,
    pub last_mention_time: f64,
    pub mention_count: usize,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub extracted_at: DateTime<Utc>,
}

impl Concept {
    /// Deterministic candidate UUID over (video_id, group_id, lowercased name).
    pub fn candidate_id(video_id: &str, group_id: usize, name: &str) -> Uuid {
        let key = format!("{}:{}:{}", video_id, group_id, name.to_lowercase());
        Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
    }

    /// Validate and normalize field values. Rejects names shorter than 2
    /// chars and definitions shorter than 10; truncates over-long text;
    /// clamps scores; assigns the deterministic candidate id when `id` is
    /// nil. Builders construct the struct literal and funnel through here.
    pub fn validated(mut self) -> EngineResult<Self> {
        self.name = self.name.trim().to_string();
        if self.name.chars().count() < CONCEPT_NAME_MIN_CHARS {
            return Err(EngineError::Other(format!(
                "concept name too short: {:?}",
                self.name
            )));
        }
        self.name = truncate_chars(&self.name, CONCEPT_NAME_MAX_CHARS);

        self.definition = self.definition.trim().to_string();
        if self.definition.chars().count() < CONCEPT_DEFINITION_MIN_CHARS {
            return Err(EngineError::Other(format!(
                "definition too short for {:?}: {:?}",
                self.name, self.definition
            )));
        }
        self.definition = truncate_chars(&self.definition, CONCEPT_DEFINITION_MAX_CHARS);

        self.importance = self.importance.clamp(0.0, 1.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);
        if self.mention_count < 1 {
            self.mention_count = 1;
        }
        if self.id.is_nil() {
            self.id = Self::candidate_id(&self.video_id, self.group_id, &self.name);
        }
        Ok(self)
    }

    /// Seconds from first to last mention.
    pub fn duration(&self) -> f64 {
        self.last_mention_time - self.first_mention_time
    }

    /// Text to embed for vector-based relationship heuristics.
    pub fn embedding_text(&self) -> String {
        format!("{}. {}", self.name, self.definition)
    }
}

/// A specific occurrence of a concept in transcript text. Enables
/// fine-grained traceability and salience analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptMention {
    pub id: Uuid,
    /// Exact text span.
    pub surface: String,
    /// When this occurs in the video, seconds.
    pub timestamp: f64,
    /// Local importance in [0,1].
    pub salience: f64,
    pub video_id: String,
    pub group_id: usize,
    pub concept_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_end: Option<usize>,
}

impl ConceptMention {
    pub fn deterministic_id(
        concept_id: &Uuid,
        video_id: &str,
        group_id: usize,
        timestamp: f64,
    ) -> Uuid {
        let key = format!("{}:{}:{}:{:.6}", concept_id, video_id, group_id, timestamp);
        Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
    }

    pub fn validated(mut self) -> EngineResult<Self> {
        self.surface = self.surface.trim().to_string();
        if self.surface.chars().count() < MENTION_SURFACE_MIN_CHARS {
            return Err(EngineError::Other(format!(
                "surface text too short: {:?}",
                self.surface
            )));
        }
        self.surface = truncate_chars(&self.surface, MENTION_SURFACE_MAX_CHARS);
        self.salience = self.salience.clamp(0.0, 1.0);
        if let (Some(start), Some(end)) = (self.offset_start, self.offset_end) {
            if end <= start {
                return Err(EngineError::Other(format!(
                    "invalid mention offsets: end ({}) <= start ({})",
                    end, start
                )));
            }
        }
        if self.id.is_nil() {
            self.id = Self::deterministic_id(
                &self.concept_id,
                &self.video_id,
                self.group_id,
                self.timestamp,
            );
        }
        Ok(self)
    }
}

/// Everything Pass 1 produced for one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedConcepts {
    pub video_id: String,
    pub group_id: usize,
    pub group_text: String,
    pub concepts: Vec<Concept>,
    #[serde(default)]
    pub mentions: Vec<ConceptMention>,
    pub extraction_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
}

impl ExtractedConcepts {
    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    pub fn avg_importance(&self) -> f64 {
        if self.concepts.is_empty() {
            return 0.0;
        }
        self.concepts.iter().map(|c| c.importance).sum::<f64>() / self.concepts.len() as f64
    }

    pub fn avg_confidence(&self) -> f64 {
        if self.concepts.is_empty() {
            return 0.0;
        }
        self.concepts.iter().map(|c| c.confidence).sum::<f64>() / self.concepts.len() as f64
    }

    pub fn type_distribution(&self) -> HashMap<&'static str, usize> {
        let mut distribution = HashMap::new();
        for concept in &self.concepts {
            *distribution.entry(concept.concept_type.as_str()).or_insert(0) += 1;
        }
        distribution
    }

    /// Quality check for one group's extraction. Issues are advisory; the
    /// pipeline logs them and continues.
    pub fn validate(&self) -> (bool, Vec<String>) {
        let mut issues = Vec::new();

        if self.concepts.len() < 3 {
            issues.push(format!(
                "too few concepts: {} (expected 5-7)",
                self.concepts.len()
            ));
        } else if self.concepts.len() > 10 {
            issues.push(format!(
                "too many concepts: {} (expected 5-7)",
                self.concepts.len()
            ));
        }

        if self.avg_confidence() < 0.6 {
            issues.push(format!("low average confidence: {:.2}", self.avg_confidence()));
        }

        let mut names: Vec<String> = self.concepts.iter().map(|c| c.name.to_lowercase()).collect();
        let unique_before = names.len();
        names.sort();
        names.dedup();
        if names.len() != unique_before {
            issues.push("duplicate concept names detected".to_string());
        }

        if self.type_distribution().len() < 2 {
            issues.push("low type diversity - all concepts of same type".to_string());
        }

        (issues.is_empty(), issues)
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// SECTION 4: Relationships
// ═════════════════════════════════════════════════════════════════════════════

/// Closed enumeration of relationship types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    // Intra-group (within the same group)
    Defines,
    Causes,
    Requires,
    Contradicts,
    Exemplifies,
    Implements,
    Uses,
    // Inter-group (across groups in the same video)
    BuildsOn,
    Elaborates,
    References,
    Refines,
    // Cross-video (enumerated for schema completeness; detection out of scope)
    Complements,
    ContradictsAcross,
    Extends,
    SimilarTo,
}

impl RelationshipType {
    pub fn from_string(value: &str) -> EngineResult<Self> {
        match value.to_lowercase().as_str() {
            "defines" => Ok(Self::Defines),
            "causes" => Ok(Self::Causes),
            "requires" => Ok(Self::Requires),
            "contradicts" => Ok(Self::Contradicts),
            "exemplifies" => Ok(Self::Exemplifies),
            "implements" => Ok(Self::Implements),
            "uses" => Ok(Self::Uses),
            "builds_on" => Ok(Self::BuildsOn),
            "elaborates" => Ok(Self::Elaborates),
            "references" => Ok(Self::References),
            "refines" => Ok(Self::Refines),
            "complements" => Ok(Self::Complements),
            "contradicts_across" => Ok(Self::ContradictsAcross),
            "extends" => Ok(Self::Extends),
            "similar_to" => Ok(Self::SimilarTo),
            other => Err(EngineError::Other(format!(
                "invalid relationship type: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Defines => "defines",
            Self::Causes => "causes",
            Self::Requires => "requires",
            Self::Contradicts => "contradicts",
            Self::Exemplifies => "exemplifies",
            Self::Implements => "implements",
            Self::Uses => "uses",
            Self::BuildsOn => "builds_on",
            Self::Elaborates => "elaborates",
            Self::References => "references",
            Self::Refines => "refines",
            Self::Complements => "complements",
            Self::ContradictsAcross => "contradicts_across",
            Self::Extends => "extends",
            Self::SimilarTo => "similar_to",
        }
    }

    /// Upper-case rendering stored on the graph edge's `relType` property.
    pub fn as_upper(&self) -> String {
        self.as_str().to_uppercase()
    }

    pub fn is_intra_group(&self) -> bool {
        matches!(
            self,
            Self::Defines
                | Self::Causes
                | Self::Requires
                | Self::Contradicts
                | Self::Exemplifies
                | Self::Implements
                | Self::Uses
        )
    }

    pub fn is_inter_group(&self) -> bool {
        matches!(
            self,
            Self::BuildsOn | Self::Elaborates | Self::References | Self::Refines
        )
    }

    pub fn is_cross_video(&self) -> bool {
        matches!(
            self,
            Self::Complements | Self::ContradictsAcross | Self::Extends | Self::SimilarTo
        )
    }

    /// The seven types tried by pattern matching, in trial order.
    pub fn intra_group_types() -> [Self; 7] {
        [
            Self::Defines,
            Self::Causes,
            Self::Requires,
            Self::Contradicts,
            Self::Exemplifies,
            Self::Implements,
            Self::Uses,
        ]
    }
}

/// How a relationship was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    PatternMatching,
    CuePhrase,
    VectorSimilarity,
    TemporalProximity,
    LlmExtraction,
    CrossReference,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PatternMatching => "pattern_matching",
            Self::CuePhrase => "cue_phrase",
            Self::VectorSimilarity => "vector_similarity",
            Self::TemporalProximity => "temporal_proximity",
            Self::LlmExtraction => "llm_extraction",
            Self::CrossReference => "cross_reference",
        }
    }
}

/// A directed typed edge in the knowledge graph: source → target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: Uuid,
    pub source_concept_id: Uuid,
    pub target_concept_id: Uuid,
    #[serde(rename = "type")]
    pub rel_type: RelationshipType,
    pub confidence: f64,
    /// Text supporting this relationship.
    pub evidence: String,
    pub detection_method: DetectionMethod,
    pub source_video_id: String,
    pub source_group_id: usize,
    pub target_video_id: String,
    pub target_group_id: usize,
    /// Time between the two concepts' first mentions, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_distance: Option<f64>,
    pub extracted_at: DateTime<Utc>,
}

impl Relationship {
    /// Deterministic UUID over (source, target, type).
    pub fn deterministic_id(source: &Uuid, target: &Uuid, rel_type: RelationshipType) -> Uuid {
        let key = format!("{}:{}:{}", source, target, rel_type.as_str());
        Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
    }

    /// Validate and normalize. Clamps confidence, enforces evidence bounds,
    /// rejects negative temporal distance, and assigns the deterministic id
    /// when `id` is nil.
    pub fn validated(mut self) -> EngineResult<Self> {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self.evidence = self.evidence.trim().to_string();
        if self.evidence.chars().count() < EVIDENCE_MIN_CHARS {
            return Err(EngineError::Other(format!(
                "evidence too short: {:?}",
                self.evidence
            )));
        }
        self.evidence = truncate_chars(&self.evidence, EVIDENCE_MAX_CHARS);
        if let Some(distance) = self.temporal_distance {
            if distance < 0.0 {
                return Err(EngineError::Other(format!(
                    "invalid temporal_distance: {} (must be >= 0)",
                    distance
                )));
            }
        }
        if self.id.is_nil() {
            self.id = Self::deterministic_id(
                &self.source_concept_id,
                &self.target_concept_id,
                self.rel_type,
            );
        }
        Ok(self)
    }

    pub fn is_same_video(&self) -> bool {
        self.source_video_id == self.target_video_id
    }

    pub fn is_same_group(&self) -> bool {
        self.is_same_video() && self.source_group_id == self.target_group_id
    }

    /// Dedup key: a (source, target, type) tuple must be unique per video.
    pub fn dedup_key(&self) -> (Uuid, Uuid, RelationshipType) {
        (self.source_concept_id, self.target_concept_id, self.rel_type)
    }
}

/// All relationships extracted from one video, with summary accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelationships {
    pub relationships: Vec<Relationship>,
    pub extraction_time: DateTime<Utc>,
    #[serde(default)]
    pub video_ids: Vec<String>,
}

impl ExtractedRelationships {
    pub fn new(relationships: Vec<Relationship>, video_ids: Vec<String>) -> Self {
        Self {
            relationships,
            extraction_time: Utc::now(),
            video_ids,
        }
    }

    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }

    pub fn avg_confidence(&self) -> f64 {
        if self.relationships.is_empty() {
            return 0.0;
        }
        self.relationships.iter().map(|r| r.confidence).sum::<f64>()
            / self.relationships.len() as f64
    }

    pub fn type_distribution(&self) -> HashMap<&'static str, usize> {
        let mut distribution = HashMap::new();
        for rel in &self.relationships {
            *distribution.entry(rel.rel_type.as_str()).or_insert(0) += 1;
        }
        distribution
    }

    pub fn detection_method_distribution(&self) -> HashMap<&'static str, usize> {
        let mut distribution = HashMap::new();
        for rel in &self.relationships {
            *distribution.entry(rel.detection_method.as_str()).or_insert(0) += 1;
        }
        distribution
    }

    pub fn intra_group(&self) -> Vec<&Relationship> {
        self.relationships.iter().filter(|r| r.is_same_group()).collect()
    }

    pub fn inter_group(&self) -> Vec<&Relationship> {
        self.relationships
            .iter()
            .filter(|r| r.is_same_video() && !r.is_same_group())
            .collect()
    }

    /// Quality check over the extracted set.
    pub fn validate(&self) -> (bool, Vec<String>) {
        let mut issues = Vec::new();

        if self.relationships.is_empty() {
            issues.push("no relationships extracted".to_string());
        }

        if !self.relationships.is_empty() && self.avg_confidence() < 0.5 {
            issues.push(format!(
                "low average confidence: {:.2} (expected >= 0.5)",
                self.avg_confidence()
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for rel in &self.relationships {
            if !seen.insert(rel.dedup_key()) {
                issues.push(format!(
                    "duplicate relationship: {} -> {} ({})",
                    rel.source_concept_id,
                    rel.target_concept_id,
                    rel.rel_type.as_str()
                ));
            }
        }

        if !self.relationships.is_empty() && self.type_distribution().len() < 2 {
            issues.push("low type diversity - all relationships of same type".to_string());
        }

        (issues.is_empty(), issues)
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Private Helpers
// ═════════════════════════════════════════════════════════════════════════════

/// Truncate a string to at most `max` chars, respecting char boundaries.
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════
