// ── Concepts: Candidate Extraction (Pass 1) ────────────────────────────────
//
// One LLM call per group with a strict JSON-only instruction. Candidates
// are transient; nothing is persisted here. The consolidation pass merges
// duplicates and refines the final set.

use std::sync::Arc;

use chrono::Utc;
use log::warn;
use serde_json::Value;
use uuid::Uuid;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::graph_types::{Concept, ConceptType, ExtractedConcepts};
use crate::atoms::traits::ChatModel;

pub const JSON_ONLY_SYSTEM_PROMPT: &str = "Output ONLY valid JSON. No thinking, no explanation.";

const CANDIDATE_EXTRACTION_PROMPT: &str = r#"Extract 1-5 most important concepts from this transcript segment.

**Transcript ({start_time}s-{end_time}s):**
{text}

Output JSON:
{
  "concepts": [
    {
      "name": "Concept Name",
      "definition": "Brief explanation",
      "type": "Concept",
      "importance": 0.8,
      "confidence": 0.9,
      "aliases": []
    }
  ]
}

Types: Concept, Technology, Person, Organization, Method, Problem, Solution, Metric, Event, Place
Importance: 0.9-1.0=core, 0.7-0.8=major, 0.5-0.6=supporting
Confidence: 0.9-1.0=explicit, 0.7-0.8=clear, 0.5-0.6=inferred
"#;

pub struct ConceptExtractor {
    model: Arc<dyn ChatModel>,
}

impl ConceptExtractor {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Extract candidate concepts from a single group.
    pub async fn extract_from_group(
        &self,
        video_id: &str,
        group_id: usize,
        group_text: &str,
        start_time: f64,
        end_time: f64,
    ) -> EngineResult<ExtractedConcepts> {
        let prompt = CANDIDATE_EXTRACTION_PROMPT
            .replace("{start_time}", &format!("{:.0}", start_time))
            .replace("{end_time}", &format!("{:.0}", end_time))
            .replace("{text}", group_text);

        let raw = self
            .model
            .complete_json(JSON_ONLY_SYSTEM_PROMPT, &prompt)
            .await?;

        let data = parse_concepts_response(&raw)?;
        let concepts = build_concepts(&data, video_id, group_id, start_time, end_time);

        Ok(ExtractedConcepts {
            video_id: video_id.to_string(),
            group_id,
            group_text: group_text.to_string(),
            concepts,
            mentions: Vec::new(),
            extraction_time: Utc::now(),
            model_used: Some(self.model.model_name().to_string()),
        })
    }
}

// ── Response parsing ───────────────────────────────────────────────────────

/// Parse the LLM response into structured data, tolerating surrounding prose
/// by slicing from the first `{` to the last `}`.
pub(crate) fn parse_concepts_response(raw: &str) -> EngineResult<Value> {
    let data = parse_json_payload(raw)?;
    let concepts = data
        .get("concepts")
        .ok_or_else(|| EngineError::Other("response missing 'concepts' key".into()))?;
    if !concepts.is_array() {
        return Err(EngineError::Other("'concepts' must be a list".into()));
    }
    Ok(data)
}

/// Locate and parse the outermost JSON object in possibly prose-wrapped text.
pub(crate) fn parse_json_payload(raw: &str) -> EngineResult<Value> {
    if raw.trim().is_empty() {
        return Err(EngineError::Other("LLM returned empty response".into()));
    }
    let candidate = match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if end > start => &raw[start..=end],
        _ => raw,
    };
    serde_json::from_str(candidate)
        .map_err(|e| EngineError::Other(format!("invalid JSON response: {}", e)))
}

/// Build Concept values from parsed data, dropping items that are missing a
/// name or definition.
fn build_concepts(
    data: &Value,
    video_id: &str,
    group_id: usize,
    start_time: f64,
    end_time: f64,
) -> Vec<Concept> {
    let items = match data["concepts"].as_array() {
        Some(items) => items,
        None => return Vec::new(),
    };

    let mut concepts = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let name = item["name"].as_str().unwrap_or("").trim();
        let definition = item["definition"].as_str().unwrap_or("").trim();
        if name.is_empty() || definition.is_empty() {
            warn!(
                "[concepts] Skipping concept {}: missing name or definition",
                i + 1
            );
            continue;
        }

        let candidate = Concept {
            id: Uuid::nil(),
            name: name.to_string(),
            definition: definition.to_string(),
            concept_type: ConceptType::from_string(item["type"].as_str().unwrap_or("Concept")),
            importance: item["importance"].as_f64().unwrap_or(0.5),
            confidence: item["confidence"].as_f64().unwrap_or(0.7),
            video_id: video_id.to_string(),
            group_id,
            first_mention_time: start_time,
            last_mention_time: end_time,
            mention_count: 1,
            aliases: string_list(&item["aliases"]),
            extracted_at: Utc::now(),
        };

        match candidate.validated() {
            Ok(concept) => concepts.push(concept),
            Err(e) => warn!("[concepts] Failed to build concept {}: {}", i + 1, e),
        }
    }
    concepts
}

pub(crate) fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════
