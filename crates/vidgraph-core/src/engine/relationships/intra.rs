// ── Relationships: Intra-Group Detection ───────────────────────────────────
//
// Detects typed relationships between concepts of the same group using,
// in order of precedence:
//   1. Explicit linguistic patterns per relationship type
//   2. Character-proximity co-occurrence (generic `uses`)
//   3. Embedding similarity of concept definitions (optional)
//
// The first matching method wins for a pair; a pair emits at most one
// relationship.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use log::warn;
use parking_lot::Mutex;
use regex::Regex;
use uuid::Uuid;

use crate::atoms::constants::{
    PATTERN_EVIDENCE_PAD, PROXIMITY_EVIDENCE_PAD, PROXIMITY_THRESHOLD_CHARS,
};
use crate::atoms::error::EngineResult;
use crate::atoms::graph_types::{
    cosine_similarity, Concept, DetectionMethod, ExtractedConcepts, Relationship,
    RelationshipType,
};
use crate::atoms::traits::Embedder;

// ── Pattern definitions ────────────────────────────────────────────────────
// Templates position the two concept-name regexes around a linguistic cue.
// `{source}` / `{target}` are substituted before compilation.

static RELATIONSHIP_PATTERNS: LazyLock<Vec<(RelationshipType, Vec<&'static str>)>> =
    LazyLock::new(|| {
        vec![
            (
                RelationshipType::Defines,
                vec![
                    r"{source}\s+(?:is|are|refers? to|means?|defined as)\s+{target}",
                    r"{source}\s*[:\-]\s*{target}",
                    r"{target}\s+(?:is|are)\s+(?:called|known as|termed)\s+{source}",
                ],
            ),
            (
                RelationshipType::Causes,
                vec![
                    r"{source}\s+(?:causes?|leads? to|results? in|produces?)\s+{target}",
                    r"{target}\s+(?:is|are)\s+(?:caused by|due to|result of)\s+{source}",
                    r"(?:because|since|as)\s+{source}.+{target}",
                ],
            ),
            (
                RelationshipType::Requires,
                vec![
                    r"{source}\s+(?:requires?|needs?|depends? on|relies? on)\s+{target}",
                    r"{target}\s+(?:is|are)\s+(?:required|needed|necessary)\s+(?:for|by)\s+{source}",
                    r"(?:to|for)\s+{source}.+(?:need|require)\s+{target}",
                ],
            ),
            (
                RelationshipType::Contradicts,
                vec![
                    r"{source}\s+(?:contradicts?|conflicts? with|opposes?)\s+{target}",
                    r"{source}\s+(?:but|however|yet)\s+{target}",
                    r"(?:unlike|contrary to|in contrast to)\s+{source}.+{target}",
                ],
            ),
            (
                RelationshipType::Exemplifies,
                vec![
                    r"{source}\s+(?:is|are)\s+(?:an?|one)\s+(?:example|instance)\s+of\s+{target}",
                    r"{target}\s+(?:such as|like|including|e\.g\.|for example)\s+{source}",
                    r"(?:for example|for instance|such as).+{source}.+{target}",
                ],
            ),
            (
                RelationshipType::Implements,
                vec![
                    r"{source}\s+(?:implements?|realizes?)\s+{target}",
                    r"{target}\s+(?:is|are)\s+implemented (?:by|in|using)\s+{source}",
                ],
            ),
            (
                RelationshipType::Uses,
                vec![
                    r"{source}\s+(?:uses?|utilizes?|employs?|applies?)\s+{target}",
                    r"{target}\s+(?:is|are)\s+used (?:by|in|for)\s+{source}",
                ],
            ),
        ]
    });

// ── Text helpers ───────────────────────────────────────────────────────────

/// Normalize text for pattern matching: lowercase, whitespace collapsed.
pub(crate) fn normalize_for_pattern(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Regex for a concept name: escaped, lowercase, optional trailing
/// plural/possessive, wrapped in word boundaries.
pub(crate) fn concept_regex(concept_name: &str) -> String {
    format!(r"\b{}(?:'?s)?\b", regex::escape(&concept_name.to_lowercase()))
}

/// Slice `s` between byte positions, clamped to length and snapped to char
/// boundaries so padded evidence windows never split a code point.
pub(crate) fn slice_window(s: &str, start: usize, end: usize) -> &str {
    let mut start = start.min(s.len());
    let mut end = end.min(s.len());
    while start > 0 && !s.is_char_boundary(start) {
        start -= 1;
    }
    while end < s.len() && !s.is_char_boundary(end) {
        end += 1;
    }
    &s[start..end]
}

// ── Pattern matching ───────────────────────────────────────────────────────

/// Try every template of one relationship type against the normalized group
/// text. On a hit, returns evidence (match plus surrounding context) and a
/// confidence boosted by the endpoints' importance.
fn find_relationship_in_text(
    normalized_text: &str,
    source: &Concept,
    target: &Concept,
    rel_type: RelationshipType,
) -> Option<(String, f64)> {
    let templates = RELATIONSHIP_PATTERNS
        .iter()
        .find(|(t, _)| *t == rel_type)
        .map(|(_, templates)| templates)?;

    let source_pattern = concept_regex(&source.name);
    let target_pattern = concept_regex(&target.name);

    for template in templates {
        let pattern = template
            .replace("{source}", &source_pattern)
            .replace("{target}", &target_pattern);
        // Malformed combined patterns are skipped rather than fatal
        let regex = match Regex::new(&pattern) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if let Some(m) = regex.find(normalized_text) {
            let evidence = slice_window(
                normalized_text,
                m.start().saturating_sub(PATTERN_EVIDENCE_PAD),
                m.end() + PATTERN_EVIDENCE_PAD,
            )
            .trim()
            .to_string();

            let base_confidence = 0.7;
            let importance_boost = (source.importance + target.importance) / 4.0;
            let confidence = (base_confidence + importance_boost).min(0.95);
            return Some((evidence, confidence));
        }
    }
    None
}

/// Fallback for concept pairs that co-occur closely but match no explicit
/// pattern. Emits a generic `uses` relationship.
fn detect_proximity_relationship(
    normalized_text: &str,
    source: &Concept,
    target: &Concept,
) -> Option<(RelationshipType, String, f64)> {
    let source_re = Regex::new(&concept_regex(&source.name)).ok()?;
    let target_re = Regex::new(&concept_regex(&target.name)).ok()?;

    let source_matches: Vec<_> = source_re.find_iter(normalized_text).collect();
    let target_matches: Vec<_> = target_re.find_iter(normalized_text).collect();
    if source_matches.is_empty() || target_matches.is_empty() {
        return None;
    }

    let mut best: Option<(usize, &regex::Match, &regex::Match)> = None;
    for s_match in &source_matches {
        for t_match in &target_matches {
            let distance = s_match.start().abs_diff(t_match.start());
            if best.as_ref().map(|(d, _, _)| distance < *d).unwrap_or(true) {
                best = Some((distance, s_match, t_match));
            }
        }
    }
    let (distance, s_match, t_match) = best?;

    if distance >= PROXIMITY_THRESHOLD_CHARS {
        return None;
    }

    let span_start = s_match.start().min(t_match.start());
    let span_end = s_match.end().max(t_match.end());
    let evidence = slice_window(
        normalized_text,
        span_start.saturating_sub(PROXIMITY_EVIDENCE_PAD),
        span_end + PROXIMITY_EVIDENCE_PAD,
    )
    .trim()
    .to_string();

    let confidence =
        0.5 + (1.0 - distance as f64 / PROXIMITY_THRESHOLD_CHARS as f64) * 0.2;
    Some((RelationshipType::Uses, evidence, confidence))
}

// ── Detector ───────────────────────────────────────────────────────────────

pub struct IntraGroupDetector {
    min_confidence: f64,
    vector_similarity_threshold: f64,
    embedder: Option<Arc<dyn Embedder>>,
    /// Per-run embedding cache keyed by concept id. Failed embeddings are
    /// cached as None so a flaky endpoint is not hammered per pair.
    embedding_cache: Mutex<HashMap<Uuid, Option<Vec<f32>>>>,
}

impl IntraGroupDetector {
    pub fn new(
        min_confidence: f64,
        vector_similarity_threshold: f64,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            min_confidence,
            vector_similarity_threshold,
            embedder,
            embedding_cache: Mutex::new(HashMap::new()),
        }
    }

    async fn get_embedding(&self, concept: &Concept) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        if let Some(cached) = self.embedding_cache.lock().get(&concept.id) {
            return cached.clone();
        }
        let result = match embedder.embed(&concept.embedding_text()).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(
                    "[relationships] Failed to embed concept '{}': {}",
                    concept.name, e
                );
                None
            }
        };
        self.embedding_cache.lock().insert(concept.id, result.clone());
        result
    }

    /// Detect all relationships within one group.
    pub async fn detect_relationships(
        &self,
        extracted: &ExtractedConcepts,
    ) -> EngineResult<Vec<Relationship>> {
        let concepts = &extracted.concepts;
        let normalized_text = normalize_for_pattern(&extracted.group_text);
        let mut relationships = Vec::new();

        for (i, source) in concepts.iter().enumerate() {
            for (j, target) in concepts.iter().enumerate() {
                if i == j {
                    continue;
                }

                let mut emitted = false;

                // 1. Explicit pattern matching; first matching type wins.
                for rel_type in RelationshipType::intra_group_types() {
                    if let Some((evidence, confidence)) =
                        find_relationship_in_text(&normalized_text, source, target, rel_type)
                    {
                        if confidence >= self.min_confidence {
                            if let Some(rel) = self.build(
                                source,
                                target,
                                rel_type,
                                confidence,
                                evidence,
                                DetectionMethod::PatternMatching,
                            ) {
                                relationships.push(rel);
                                emitted = true;
                            }
                        }
                        break;
                    }
                }

                // 2. Proximity fallback.
                if !emitted {
                    if let Some((rel_type, evidence, confidence)) =
                        detect_proximity_relationship(&normalized_text, source, target)
                    {
                        if confidence >= self.min_confidence {
                            if let Some(rel) = self.build(
                                source,
                                target,
                                rel_type,
                                confidence,
                                evidence,
                                DetectionMethod::PatternMatching,
                            ) {
                                relationships.push(rel);
                                emitted = true;
                            }
                        }
                    }
                }

                // 3. Embedding similarity fallback.
                if !emitted && self.embedder.is_some() {
                    let source_vec = self.get_embedding(source).await;
                    let target_vec = self.get_embedding(target).await;
                    if let (Some(sv), Some(tv)) = (source_vec, target_vec) {
                        let similarity = cosine_similarity(&sv, &tv);
                        if similarity >= self.vector_similarity_threshold {
                            let evidence = format!(
                                "Concept definitions are semantically aligned (similarity {:.2}).",
                                similarity
                            );
                            let confidence = (similarity * 0.6
                                + (source.confidence + target.confidence) / 4.0)
                                .max(self.min_confidence);
                            if let Some(rel) = self.build(
                                source,
                                target,
                                RelationshipType::Uses,
                                confidence,
                                evidence,
                                DetectionMethod::VectorSimilarity,
                            ) {
                                relationships.push(rel);
                            }
                        }
                    }
                }
            }
        }

        Ok(relationships)
    }

    fn build(
        &self,
        source: &Concept,
        target: &Concept,
        rel_type: RelationshipType,
        confidence: f64,
        evidence: String,
        detection_method: DetectionMethod,
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
            temporal_distance: Some(
                (source.first_mention_time - target.first_mention_time).abs(),
            ),
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
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::atoms::graph_types::ConceptType;

    fn concept(name: &str, group_id: usize, first_mention: f64) -> Concept {
        Concept {
            id: Uuid::nil(),
            name: name.to_string(),
            definition: format!("Definition of {} for testing purposes.", name),
            concept_type: ConceptType::Concept,
            importance: 0.8,
            confidence: 0.9,
            video_id: "vid123".to_string(),
            group_id,
            first_mention_time: first_mention,
            last_mention_time: first_mention + 30.0,
            mention_count: 1,
            aliases: vec![],
            extracted_at: Utc::now(),
        }
        .validated()
        .unwrap()
    }

    fn extraction(text: &str, concepts: Vec<Concept>) -> ExtractedConcepts {
        ExtractedConcepts {
            video_id: "vid123".to_string(),
            group_id: 0,
            group_text: text.to_string(),
            concepts,
            mentions: vec![],
            extraction_time: Utc::now(),
            model_used: None,
        }
    }

    fn detector() -> IntraGroupDetector {
        IntraGroupDetector::new(0.6, 0.6, None)
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(
            normalize_for_pattern("Gradient   Descent\n\tworks"),
            "gradient descent works"
        );
    }

    #[test]
    fn test_concept_regex_plural_possessive() {
        let re = Regex::new(&concept_regex("transformer")).unwrap();
        assert!(re.is_match("the transformer works"));
        assert!(re.is_match("the transformers work"));
        assert!(re.is_match("the transformer's output"));
        assert!(!re.is_match("transformation"));
    }

    #[tokio::test]
    async fn test_requires_pattern() {
        let source = concept("gradient descent", 0, 10.0);
        let target = concept("learning rate", 0, 40.0);
        let text = "Remember that gradient descent requires learning rate tuning before anything converges at all.";
        let rels = detector()
            .detect_relationships(&extraction(text, vec![source.clone(), target.clone()]))
            .await
            .unwrap();

        let found = rels
            .iter()
            .find(|r| {
                r.source_concept_id == source.id
                    && r.target_concept_id == target.id
                    && r.rel_type == RelationshipType::Requires
            })
            .expect("requires relationship detected");
        assert_eq!(found.detection_method, DetectionMethod::PatternMatching);
        assert!(found.evidence.contains("requires"));
        // confidence = min(0.95, 0.7 + (0.8 + 0.8)/4) = 0.95 after clamping at 0.95
        assert!((found.confidence - 0.95).abs() < 1e-9);
        assert_eq!(found.temporal_distance, Some(30.0));
        assert_eq!(
            found.id,
            Relationship::deterministic_id(&source.id, &target.id, RelationshipType::Requires)
        );
    }

    #[tokio::test]
    async fn test_reversed_caused_by_pattern() {
        let source = concept("overfitting", 0, 0.0);
        let target = concept("memorization", 0, 5.0);
        let text = "We observed that memorization is caused by overfitting on small datasets during training.";
        let rels = detector()
            .detect_relationships(&extraction(text, vec![source.clone(), target.clone()]))
            .await
            .unwrap();
        assert!(rels.iter().any(|r| {
            r.source_concept_id == source.id && r.rel_type == RelationshipType::Causes
        }));
    }

    #[tokio::test]
    async fn test_exemplifies_such_as() {
        let source = concept("resnet", 0, 0.0);
        let target = concept("neural network", 0, 2.0);
        let text = "Deep architectures matter, and a neural network such as resnet shows why depth helps.";
        let rels = detector()
            .detect_relationships(&extraction(text, vec![source.clone(), target.clone()]))
            .await
            .unwrap();
        assert!(rels.iter().any(|r| {
            r.source_concept_id == source.id
                && r.target_concept_id == target.id
                && r.rel_type == RelationshipType::Exemplifies
        }));
    }

    #[tokio::test]
    async fn test_proximity_fallback() {
        let source = concept("quantization", 0, 0.0);
        let target = concept("distillation", 0, 8.0);
        // Close co-occurrence but no explicit linguistic cue between them
        let text = "Model compression tricks abound: quantization, pruning, distillation among them, all shrink networks.";
        let rels = detector()
            .detect_relationships(&extraction(text, vec![source.clone(), target.clone()]))
            .await
            .unwrap();

        let found = rels
            .iter()
            .find(|r| r.source_concept_id == source.id && r.target_concept_id == target.id)
            .expect("proximity relationship detected");
        assert_eq!(found.rel_type, RelationshipType::Uses);
        assert_eq!(found.detection_method, DetectionMethod::PatternMatching);
        assert!(found.confidence >= 0.5 && found.confidence <= 0.7);
    }

    #[tokio::test]
    async fn test_distant_mentions_no_relationship() {
        let source = concept("alpha topic", 0, 0.0);
        let target = concept("omega topic", 0, 100.0);
        let filler = "irrelevant filler words ".repeat(30);
        let text = format!("alpha topic starts here. {} and finally omega topic ends.", filler);
        let rels = detector()
            .detect_relationships(&extraction(&text, vec![source, target]))
            .await
            .unwrap();
        assert!(rels.is_empty());
    }

    #[tokio::test]
    async fn test_one_relationship_per_pair() {
        let source = concept("caching", 0, 0.0);
        let target = concept("latency", 0, 3.0);
        // Both the causes pattern and the proximity fallback would fire;
        // only the pattern relationship must be emitted.
        let text = "caching leads to latency wins, and caching latency interplay matters.";
        let rels = detector()
            .detect_relationships(&extraction(text, vec![source.clone(), target.clone()]))
            .await
            .unwrap();
        let for_pair: Vec<_> = rels
            .iter()
            .filter(|r| r.source_concept_id == source.id && r.target_concept_id == target.id)
            .collect();
        assert_eq!(for_pair.len(), 1);
        assert_eq!(for_pair[0].rel_type, RelationshipType::Causes);
    }

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, _text: &str) -> EngineResult<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    #[tokio::test]
    async fn test_embedding_fallback() {
        let source = concept("alpha topic", 0, 0.0);
        let target = concept("omega topic", 0, 10.0);
        let filler = "irrelevant filler words ".repeat(30);
        let text = format!("alpha topic starts here. {} and finally omega topic ends.", filler);
        let detector = IntraGroupDetector::new(0.6, 0.6, Some(Arc::new(StubEmbedder)));
        let rels = detector
            .detect_relationships(&extraction(&text, vec![source.clone(), target.clone()]))
            .await
            .unwrap();

        let found = rels
            .iter()
            .find(|r| r.source_concept_id == source.id && r.target_concept_id == target.id)
            .expect("embedding relationship detected");
        assert_eq!(found.detection_method, DetectionMethod::VectorSimilarity);
        assert_eq!(found.rel_type, RelationshipType::Uses);
        // Identical stub vectors: sim = 1.0; conf = 1.0*0.6 + (0.9+0.9)/4 = 1.05 -> clamped
        assert!((found.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_slice_window_char_boundaries() {
        let s = "héllo wörld";
        // Positions that would otherwise split the multibyte chars
        let sliced = slice_window(s, 2, 9);
        assert!(s.contains(sliced));
        assert_eq!(slice_window(s, 0, 1000), s);
    }
}
