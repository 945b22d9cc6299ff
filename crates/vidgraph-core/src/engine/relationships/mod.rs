// Vidgraph Engine — Relationship Extraction
//
// Runs the intra-group and inter-group detectors over one video's concept
// extractions, enforces (source, target, type) uniqueness, and handles the
// relationships JSON artifact.

pub mod inter;
pub mod intra;

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use serde_json::json;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::graph_types::{ExtractedConcepts, ExtractedRelationships, Relationship};
use crate::atoms::traits::Embedder;
use crate::atoms::types::DetectorConfig;
use crate::engine::http::CancelToken;

pub use inter::InterGroupDetector;
pub use intra::IntraGroupDetector;

pub struct RelationshipEngine {
    intra: IntraGroupDetector,
    inter: InterGroupDetector,
}

impl RelationshipEngine {
    /// Build both detectors. `embedder` enables the similarity fallbacks;
    /// without it only patterns, proximity, and cue phrases run.
    pub fn new(
        min_confidence: f64,
        config: &DetectorConfig,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            intra: IntraGroupDetector::new(
                min_confidence,
                config.vector_similarity_threshold,
                embedder.clone(),
            ),
            inter: InterGroupDetector::new(
                min_confidence,
                config.similarity_threshold,
                config.temporal_window,
                embedder,
            ),
        }
    }

    /// Extract all relationships for one video.
    pub async fn extract_from_video(
        &self,
        extractions: &[ExtractedConcepts],
        video_id: &str,
        cancel: &CancelToken,
    ) -> EngineResult<ExtractedRelationships> {
        let video_groups: Vec<&ExtractedConcepts> = extractions
            .iter()
            .filter(|ec| ec.video_id == video_id)
            .collect();

        if video_groups.is_empty() {
            warn!(
                "[relationships] No concept groups for video {}; nothing to detect",
                video_id
            );
            return Ok(ExtractedRelationships::new(
                Vec::new(),
                vec![video_id.to_string()],
            ));
        }

        info!(
            "[relationships] Extracting relationships from {} groups in video {}",
            video_groups.len(),
            video_id
        );

        let mut all_relationships: Vec<Relationship> = Vec::new();

        // Phase 1: intra-group
        let mut intra_count = 0usize;
        for extraction in &video_groups {
            cancel.checkpoint("intra-group detection")?;
            if extraction.group_text.is_empty() {
                warn!(
                    "[relationships] Group {} has empty text; pattern detection will find nothing",
                    extraction.group_id
                );
            }
            let found = self.intra.detect_relationships(extraction).await?;
            intra_count += found.len();
            all_relationships.extend(found);
        }
        info!("[relationships] Found {} intra-group relationships", intra_count);

        // Phase 2: inter-group
        cancel.checkpoint("inter-group detection")?;
        let owned: Vec<ExtractedConcepts> =
            video_groups.iter().map(|ec| (*ec).clone()).collect();
        let inter = self.inter.detect_relationships(&owned, video_id).await?;
        info!("[relationships] Found {} inter-group relationships", inter.len());
        all_relationships.extend(inter);

        // Uniqueness: first emission of a (source, target, type) tuple wins
        let mut seen = HashSet::new();
        let before = all_relationships.len();
        all_relationships.retain(|rel| seen.insert(rel.dedup_key()));
        if all_relationships.len() < before {
            warn!(
                "[relationships] Dropped {} duplicate relationships",
                before - all_relationships.len()
            );
        }

        let result =
            ExtractedRelationships::new(all_relationships, vec![video_id.to_string()]);

        info!(
            "[relationships] Total: {} (avg confidence {:.2})",
            result.len(),
            result.avg_confidence()
        );
        for (rel_type, count) in result.type_distribution() {
            info!("[relationships]   {:<20} {}", rel_type, count);
        }
        for (method, count) in result.detection_method_distribution() {
            info!("[relationships]   via {:<16} {}", method, count);
        }

        Ok(result)
    }
}

// ── JSON artifact ──────────────────────────────────────────────────────────

/// Write the `relationships_<video_id>.json` artifact: the relationship list
/// plus a metadata summary.
pub fn save_to_file(
    relationships: &ExtractedRelationships,
    output_path: &Path,
) -> EngineResult<()> {
    let data = json!({
        "relationships": relationships.relationships,
        "metadata": {
            "total_relationships": relationships.len(),
            "video_ids": relationships.video_ids,
            "avg_confidence": relationships.avg_confidence(),
            "type_distribution": relationships.type_distribution(),
            "detection_method_distribution": relationships.detection_method_distribution(),
            "extraction_time": relationships.extraction_time.to_rfc3339(),
        },
    });

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output_path, serde_json::to_string_pretty(&data)?)?;
    info!("[relationships] Saved relationships to {}", output_path.display());
    Ok(())
}

/// Load a relationships artifact back into memory.
pub fn load_from_file(input_path: &Path) -> EngineResult<ExtractedRelationships> {
    let raw = fs::read_to_string(input_path)?;
    let data: serde_json::Value = serde_json::from_str(&raw)?;
    let relationships: Vec<Relationship> = serde_json::from_value(
        data.get("relationships")
            .cloned()
            .ok_or_else(|| EngineError::Other("artifact missing 'relationships' list".into()))?,
    )?;
    let video_ids = data["metadata"]["video_ids"]
        .as_array()
        .map(|ids| {
            ids.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    Ok(ExtractedRelationships::new(relationships, video_ids))
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::atoms::graph_types::{Concept, ConceptType, DetectionMethod, RelationshipType};

    fn concept(name: &str, group_id: usize) -> Concept {
        Concept {
            id: Uuid::nil(),
            name: name.to_string(),
            definition: format!("Definition of {} for testing purposes.", name),
            concept_type: ConceptType::Concept,
            importance: 0.8,
            confidence: 0.9,
            video_id: "vid123".to_string(),
            group_id,
            first_mention_time: group_id as f64 * 100.0,
            last_mention_time: group_id as f64 * 100.0 + 50.0,
            mention_count: 1,
            aliases: vec![],
            extracted_at: Utc::now(),
        }
        .validated()
        .unwrap()
    }

    fn extraction(group_id: usize, text: &str, concepts: Vec<Concept>) -> ExtractedConcepts {
        ExtractedConcepts {
            video_id: "vid123".to_string(),
            group_id,
            group_text: text.to_string(),
            concepts,
            mentions: vec![],
            extraction_time: Utc::now(),
            model_used: None,
        }
    }

    #[tokio::test]
    async fn test_end_to_end_detection_and_dedup() {
        let a = concept("gradient descent", 0);
        let b = concept("learning rate", 0);
        let c = concept("momentum term", 1);
        let groups = vec![
            extraction(
                0,
                "Remember that gradient descent requires learning rate tuning before anything converges.",
                vec![a.clone(), b.clone()],
            ),
            extraction(
                1,
                "Building on gradient descent, the momentum term smooths updates over steps.",
                vec![c.clone()],
            ),
        ];

        let engine = RelationshipEngine::new(0.6, &DetectorConfig::default(), None);
        let result = engine
            .extract_from_video(&groups, "vid123", &CancelToken::new())
            .await
            .unwrap();

        // Intra: requires (and possibly a reverse proximity edge); inter: builds_on
        assert!(result
            .relationships
            .iter()
            .any(|r| r.rel_type == RelationshipType::Requires
                && r.source_concept_id == a.id
                && r.target_concept_id == b.id));
        assert!(result
            .relationships
            .iter()
            .any(|r| r.rel_type == RelationshipType::BuildsOn
                && r.source_concept_id == c.id
                && r.target_concept_id == a.id
                && r.detection_method == DetectionMethod::CuePhrase));

        // Uniqueness invariant
        let mut keys: Vec<_> = result.relationships.iter().map(|r| r.dedup_key()).collect();
        let before = keys.len();
        keys.sort_by_key(|k| (k.0, k.1, k.2.as_str()));
        keys.dedup();
        assert_eq!(keys.len(), before);

        // Confidence floor honored
        assert!(result.relationships.iter().all(|r| r.confidence >= 0.6));
    }

    #[tokio::test]
    async fn test_empty_input_returns_empty() {
        let engine = RelationshipEngine::new(0.6, &DetectorConfig::default(), None);
        let result = engine
            .extract_from_video(&[], "vid123", &CancelToken::new())
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.video_ids, vec!["vid123".to_string()]);
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let groups = vec![extraction(0, "text", vec![])];
        let engine = RelationshipEngine::new(0.6, &DetectorConfig::default(), None);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = engine
            .extract_from_video(&groups, "vid123", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_artifact_round_trip() {
        let a = concept("gradient descent", 0);
        let b = concept("learning rate", 0);
        let groups = vec![extraction(
            0,
            "Remember that gradient descent requires learning rate tuning before anything converges.",
            vec![a, b],
        )];
        let engine = RelationshipEngine::new(0.6, &DetectorConfig::default(), None);
        let result = engine
            .extract_from_video(&groups, "vid123", &CancelToken::new())
            .await
            .unwrap();
        assert!(!result.is_empty());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relationships_vid123.json");
        save_to_file(&result, &path).unwrap();

        let loaded = load_from_file(&path).unwrap();
        assert_eq!(loaded.len(), result.len());
        assert_eq!(loaded.video_ids, result.video_ids);
        for (orig, restored) in result.relationships.iter().zip(loaded.relationships.iter()) {
            assert_eq!(orig.id, restored.id);
            assert_eq!(orig.rel_type, restored.rel_type);
            assert_eq!(orig.evidence, restored.evidence);
            assert_eq!(orig.temporal_distance, restored.temporal_distance);
        }

        // Metadata block present
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            raw["metadata"]["total_relationships"].as_u64().unwrap() as usize,
            result.len()
        );
        assert!(raw["metadata"]["type_distribution"].is_object());
    }
}
