// ── Relationships: Inter-Group Detection ───────────────────────────────────
//
// Detects relationships across groups of the same video. Direction is
// later → earlier: spoken content refers back ("as I mentioned", "building
// on"), so the source concept comes from the later group and the target from
// the earlier one. Symmetric detection would double-count.
//
// Methods, in order of precedence per pair:
//   1. Cue phrases in the later group's text, with the earlier concept's
//      name nearby
//   2. Embedding similarity under a temporal window (optional)

use std::sync::{Arc, LazyLock};

use chrono::Utc;
use log::warn;
use regex::Regex;
use uuid::Uuid;

use crate::atoms::constants::{CUE_LOOKAHEAD_CHARS, CUE_LOOKBEHIND_CHARS};
use crate::atoms::error::EngineResult;
use crate::atoms::graph_types::{
    cosine_similarity, Concept, DetectionMethod, ExtractedConcepts, Relationship,
    RelationshipType,
};
use crate::atoms::traits::Embedder;
use crate::engine::relationships::intra::{normalize_for_pattern, slice_window};

// ── Cue phrase definitions ─────────────────────────────────────────────────

static CUE_PHRASES: LazyLock<Vec<(RelationshipType, Vec<&'static str>)>> = LazyLock::new(|| {
    vec![
        (
            RelationshipType::BuildsOn,
            vec![
                r"(?:building|built) (?:on|upon)",
                r"(?:extending|extends?) (?:on|from)",
                r"taking (?:this|that|it) further",
                r"going deeper into",
                r"expanding on",
            ],
        ),
        (
            RelationshipType::Elaborates,
            vec![
                r"(?:more|further) detail(?:s|ed)?",
                r"(?:to|let me) elaborate",
                r"specifically",
                r"in particular",
                r"(?:diving|dig) deeper",
                r"(?:closer|detailed) look",
            ],
        ),
        (
            RelationshipType::References,
            vec![
                r"(?:as|like) (?:I|we) (?:mentioned|said|discussed)",
                r"(?:earlier|previously|before)",
                r"(?:remember|recall) (?:that|when)",
                r"(?:back|going back) to",
                r"(?:as|like) (?:discussed|talked about)",
            ],
        ),
        (
            RelationshipType::Refines,
            vec![
                r"(?:more|better|improved) (?:accurate|precise|refined)",
                r"(?:to be|more) (?:clear|specific)",
                r"(?:actually|in fact|really)",
                r"(?:correcting|correction)",
                r"(?:refining|refined)",
            ],
        ),
    ]
});

/// Search the later group's normalized text for a cue phrase with the
/// earlier concept's name nearby. Returns (type, evidence, confidence).
fn detect_cue_phrase_relationship(
    source: &Concept,
    target: &Concept,
    later_text_normalized: &str,
) -> Option<(RelationshipType, String, f64)> {
    let target_pattern = format!(r"\b{}\b", regex::escape(&target.name.to_lowercase()));
    let target_re = Regex::new(&target_pattern).ok()?;

    for (rel_type, patterns) in CUE_PHRASES.iter() {
        for pattern in patterns {
            let cue_re = match Regex::new(pattern) {
                Ok(r) => r,
                Err(_) => continue,
            };
            let cue_match = match cue_re.find(later_text_normalized) {
                Some(m) => m,
                None => continue,
            };

            // The earlier concept must be mentioned near the cue
            let cue_pos = cue_match.start();
            let search_region = slice_window(
                later_text_normalized,
                cue_pos.saturating_sub(CUE_LOOKBEHIND_CHARS),
                cue_pos + CUE_LOOKAHEAD_CHARS,
            );
            if !target_re.is_match(search_region) {
                continue;
            }

            let evidence = slice_window(
                later_text_normalized,
                cue_pos.saturating_sub(50),
                cue_pos + 150,
            )
            .trim()
            .to_string();
            let confidence = 0.75 + source.importance * 0.15;
            return Some((*rel_type, evidence, confidence));
        }
    }
    None
}

// ── Detector ───────────────────────────────────────────────────────────────

pub struct InterGroupDetector {
    min_confidence: f64,
    similarity_threshold: f64,
    temporal_window: f64,
    embedder: Option<Arc<dyn Embedder>>,
}

impl InterGroupDetector {
    pub fn new(
        min_confidence: f64,
        similarity_threshold: f64,
        temporal_window: f64,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            min_confidence,
            similarity_threshold,
            temporal_window,
            embedder,
        }
    }

    /// Detect relationships across groups of one video.
    /// `extractions` must belong to one video; they are sorted by group id.
    pub async fn detect_relationships(
        &self,
        extractions: &[ExtractedConcepts],
        video_id: &str,
    ) -> EngineResult<Vec<Relationship>> {
        let mut groups: Vec<&ExtractedConcepts> = extractions
            .iter()
            .filter(|ec| ec.video_id == video_id)
            .collect();
        groups.sort_by_key(|ec| ec.group_id);

        let mut relationships = Vec::new();

        for i in 0..groups.len() {
            for j in (i + 1)..groups.len() {
                let earlier = groups[i];
                let later = groups[j];
                let later_normalized = normalize_for_pattern(&later.group_text);

                // Later group's concepts refer back to the earlier group's
                for source in &later.concepts {
                    for target in &earlier.concepts {
                        let temporal_distance =
                            (source.first_mention_time - target.first_mention_time).abs();

                        // Method 1: cue phrase
                        if let Some((rel_type, evidence, confidence)) =
                            detect_cue_phrase_relationship(source, target, &later_normalized)
                        {
                            if confidence >= self.min_confidence {
                                if let Some(rel) = build(
                                    source,
                                    target,
                                    rel_type,
                                    confidence,
                                    evidence,
                                    DetectionMethod::CuePhrase,
                                    temporal_distance,
                                ) {
                                    relationships.push(rel);
                                    continue;
                                }
                            }
                        }

                        // Method 2: embedding similarity under the temporal window
                        let embedder = match &self.embedder {
                            Some(e) => e,
                            None => continue,
                        };
                        let source_emb = match embedder.embed(&source.embedding_text()).await {
                            Ok(v) => v,
                            Err(e) => {
                                warn!("[relationships] Failed to embed '{}': {}", source.name, e);
                                continue;
                            }
                        };
                        let target_emb = match embedder.embed(&target.embedding_text()).await {
                            Ok(v) => v,
                            Err(e) => {
                                warn!("[relationships] Failed to embed '{}': {}", target.name, e);
                                continue;
                            }
                        };

                        let similarity = cosine_similarity(&source_emb, &target_emb);
                        if similarity < self.similarity_threshold
                            || temporal_distance > self.temporal_window
                        {
                            continue;
                        }

                        let evidence = format!(
                            "Semantically similar concepts (similarity: {:.2}) appearing within {:.0}s",
                            similarity, temporal_distance
                        );
                        let confidence = similarity * 0.7
                            + (1.0 - temporal_distance / self.temporal_window) * 0.2;
                        if confidence < self.min_confidence {
                            continue;
                        }
                        if let Some(rel) = build(
                            source,
                            target,
                            RelationshipType::BuildsOn,
                            confidence,
                            evidence,
                            DetectionMethod::VectorSimilarity,
                            temporal_distance,
                        ) {
                            relationships.push(rel);
                        }
                    }
                }
            }
        }

        Ok(relationships)
    }
}

fn build(
    source: &Concept,
    target: &Concept,
    rel_type: RelationshipType,
    confidence: f64,
    evidence: String,
    detection_method: DetectionMethod,
    temporal_distance: f64,
) -> Option<Relationship> {
    let result = Relationship {
        id: Uuid::nil(),
        source_concept_id: source.id,
        target_concept_id: target.id,
        rel_type,
        confidence,
        evidence,
        detection_method,
        source_video_id: source.video_id.clone(),
        source_group_id: source.group_id,
        target_video_id: target.video_id.clone(),
        target_group_id: target.group_id,
        temporal_distance: Some(temporal_distance),
        extracted_at: Utc::now(),
    }
    .validated();

    match result {
        Ok(rel) => Some(rel),
        Err(e) => {
            warn!(
                "[relationships] Dropping {} -> {} ({}): {}",
                source.name,
                target.name,
                rel_type.as_str(),
                e
            );
            None
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════
