// ── Concepts: Consolidation (Pass 2) ───────────────────────────────────────
//
// One LLM call per video over the union of all Pass-1 candidates. The model
// merges duplicates across groups, collapses aliases, and re-scores
// importance. Each consolidated concept gets a freshly minted id; the first
// source group id is kept for traceability.
//
// Failure here is survivable: the orchestrator falls back to the raw
// candidate union.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::graph_types::{Concept, ConceptType, ExtractedConcepts};
use crate::atoms::traits::ChatModel;
use crate::engine::concepts::extractor::{parse_json_payload, string_list, JSON_ONLY_SYSTEM_PROMPT};

const CONSOLIDATION_PROMPT: &str = r#"Merge duplicate concepts from video segments. Return 1-20 final concepts.

**Candidates ({num_candidates} from {num_groups} groups):**
{candidates_json}

Output JSON:
{
  "consolidatedConcepts": [
    {
      "name": "Concept Name",
      "definition": "Definition",
      "type": "Concept",
      "importance": 0.8,
      "confidence": 0.9,
      "aliases": [],
      "firstMentionTime": 0.0,
      "lastMentionTime": 300.0,
      "mentionCount": 2,
      "groupIds": [0, 1],
      "sourceConceptIds": ["id1", "id2"]
    }
  ]
}

Rules: Merge same concepts with different names. Importance: 0.9-1.0=core, 0.7-0.8=major, 0.5-0.6=supporting.
- Only keep concepts that are genuinely significant to understanding the video
- Aim for 15-30 final concepts (fewer for short videos, more for long ones)
"#;

pub struct ConceptConsolidator {
    model: Arc<dyn ChatModel>,
}

impl ConceptConsolidator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Consolidate candidate concepts from all groups into the final set.
    pub async fn consolidate(
        &self,
        candidate_concepts: &[ExtractedConcepts],
        video_id: &str,
    ) -> EngineResult<Vec<Concept>> {
        if candidate_concepts.is_empty() {
            warn!("[concepts] No candidate groups to consolidate");
            return Ok(Vec::new());
        }

        let all_candidates: Vec<&Concept> = candidate_concepts
            .iter()
            .flat_map(|ec| ec.concepts.iter())
            .collect();
        if all_candidates.is_empty() {
            warn!("[concepts] No candidate concepts found in extracted groups");
            return Ok(Vec::new());
        }

        info!(
            "[concepts] Consolidating {} candidates from {} groups",
            all_candidates.len(),
            candidate_concepts.len()
        );

        let candidates_json =
            serde_json::to_string_pretty(&prepare_candidates(&all_candidates))?;
        let prompt = CONSOLIDATION_PROMPT
            .replace("{num_candidates}", &all_candidates.len().to_string())
            .replace("{num_groups}", &candidate_concepts.len().to_string())
            .replace("{candidates_json}", &candidates_json);

        let raw = self
            .model
            .complete_json(JSON_ONLY_SYSTEM_PROMPT, &prompt)
            .await?;
        let data = parse_consolidation_response(&raw)?;
        let final_concepts = build_consolidated_concepts(&data, video_id);

        info!(
            "[concepts] Consolidation complete: {} candidates -> {} final concepts",
            all_candidates.len(),
            final_concepts.len()
        );
        Ok(final_concepts)
    }
}

// ── Payload construction ───────────────────────────────────────────────────

fn prepare_candidates(candidates: &[&Concept]) -> Vec<Value> {
    candidates
        .iter()
        .map(|concept| {
            json!({
                "id": concept.id.to_string(),
                "name": concept.name,
                "definition": concept.definition,
                "type": concept.concept_type.as_str(),
                "importance": concept.importance,
                "confidence": concept.confidence,
                "groupId": concept.group_id,
                "firstMentionTime": concept.first_mention_time,
                "lastMentionTime": concept.last_mention_time,
                "mentionCount": concept.mention_count,
                "aliases": concept.aliases,
            })
        })
        .collect()
}

// ── Response parsing ───────────────────────────────────────────────────────

pub(crate) fn parse_consolidation_response(raw: &str) -> EngineResult<Value> {
    let data = parse_json_payload(raw)?;
    let consolidated = data
        .get("consolidatedConcepts")
        .ok_or_else(|| EngineError::Other("response missing 'consolidatedConcepts' key".into()))?;
    if !consolidated.is_array() {
        return Err(EngineError::Other("'consolidatedConcepts' must be a list".into()));
    }
    Ok(data)
}

/// Build final Concept values from the consolidation response. Each gets a
/// fresh random id; `group_id` comes from the first entry of `groupIds`.
fn build_consolidated_concepts(data: &Value, video_id: &str) -> Vec<Concept> {
    let items = match data["consolidatedConcepts"].as_array() {
        Some(items) => items,
        None => return Vec::new(),
    };

    let mut final_concepts = Vec::with_capacity(items.len());
    for item in items {
        let name = item["name"].as_str().unwrap_or("").trim();
        let definition = item["definition"].as_str().unwrap_or("").trim();
        if name.is_empty() || definition.is_empty() {
            warn!("[concepts] Skipping consolidated concept: missing name or definition");
            continue;
        }

        let group_id = item["groupIds"]
            .as_array()
            .and_then(|ids| ids.first())
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;

        let concept = Concept {
            id: Uuid::new_v4(),
            name: name.to_string(),
            definition: definition.to_string(),
            concept_type: ConceptType::from_string(item["type"].as_str().unwrap_or("Concept")),
            importance: item["importance"].as_f64().unwrap_or(0.5),
            confidence: item["confidence"].as_f64().unwrap_or(0.7),
            video_id: video_id.to_string(),
            group_id,
            first_mention_time: item["firstMentionTime"].as_f64().unwrap_or(0.0),
            last_mention_time: item["lastMentionTime"].as_f64().unwrap_or(0.0),
            mention_count: item["mentionCount"].as_u64().unwrap_or(1) as usize,
            aliases: string_list(&item["aliases"]),
            extracted_at: Utc::now(),
        };

        match concept.validated() {
            Ok(concept) => final_concepts.push(concept),
            Err(e) => warn!("[concepts] Failed to build consolidated concept: {}", e),
        }
    }
    final_concepts
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubModel {
        response: EngineResult<String>,
    }

    #[async_trait]
    impl ChatModel for StubModel {
        fn model_name(&self) -> &str {
            "stub-model"
        }

        async fn complete_json(&self, _system: &str, _user: &str) -> EngineResult<String> {
            match &self.response {
                Ok(s) => Ok(s.clone()),
                Err(_) => Err(EngineError::Other("stubbed failure".into())),
            }
        }
    }

    fn candidate_group() -> ExtractedConcepts {
        let concept = Concept {
            id: Uuid::nil(),
            name: "Gradient Descent".to_string(),
            definition: "Iterative optimization following the negative gradient.".to_string(),
            concept_type: ConceptType::Method,
            importance: 0.8,
            confidence: 0.9,
            video_id: "vid123".to_string(),
            group_id: 0,
            first_mention_time: 0.0,
            last_mention_time: 120.0,
            mention_count: 1,
            aliases: vec![],
            extracted_at: Utc::now(),
        }
        .validated()
        .unwrap();
        ExtractedConcepts {
            video_id: "vid123".to_string(),
            group_id: 0,
            group_text: "text".to_string(),
            concepts: vec![concept],
            mentions: vec![],
            extraction_time: Utc::now(),
            model_used: None,
        }
    }

    #[tokio::test]
    async fn test_consolidate_mints_new_ids() {
        let response = r#"{
            "consolidatedConcepts": [
                {
                    "name": "Gradient Descent",
                    "definition": "Optimization that follows the negative gradient downhill.",
                    "type": "Method",
                    "importance": 0.9,
                    "confidence": 0.95,
                    "aliases": ["SGD"],
                    "firstMentionTime": 0.0,
                    "lastMentionTime": 400.0,
                    "mentionCount": 3,
                    "groupIds": [2, 0],
                    "sourceConceptIds": ["a", "b"]
                }
            ],
            "consolidationMetadata": {"totalCandidates": 4}
        }"#;
        let consolidator = ConceptConsolidator::new(Arc::new(StubModel {
            response: Ok(response.to_string()),
        }));
        let groups = vec![candidate_group()];
        let finals = consolidator.consolidate(&groups, "vid123").await.unwrap();

        assert_eq!(finals.len(), 1);
        let concept = &finals[0];
        // Fresh id, not the deterministic candidate id
        assert_ne!(
            concept.id,
            Concept::candidate_id("vid123", 2, "Gradient Descent")
        );
        assert!(!concept.id.is_nil());
        // group_id taken from groupIds[0]
        assert_eq!(concept.group_id, 2);
        assert_eq!(concept.mention_count, 3);
        assert_eq!(concept.last_mention_time, 400.0);
        assert_eq!(concept.aliases, vec!["SGD".to_string()]);
    }

    #[tokio::test]
    async fn test_consolidate_empty_input() {
        let consolidator = ConceptConsolidator::new(Arc::new(StubModel {
            response: Ok("{}".to_string()),
        }));
        assert!(consolidator.consolidate(&[], "vid123").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json_errors() {
        let consolidator = ConceptConsolidator::new(Arc::new(StubModel {
            response: Ok("the model rambled instead of emitting JSON".to_string()),
        }));
        let groups = vec![candidate_group()];
        assert!(consolidator.consolidate(&groups, "vid123").await.is_err());
    }

    #[test]
    fn test_parse_requires_key() {
        assert!(parse_consolidation_response(r#"{"concepts": []}"#).is_err());
        assert!(parse_consolidation_response(r#"{"consolidatedConcepts": []}"#).is_ok());
        assert!(parse_consolidation_response(r#"{"consolidatedConcepts": 5}"#).is_err());
    }
}
