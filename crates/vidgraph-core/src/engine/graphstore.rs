// Vidgraph Engine — Neo4j Concept Graph
//
// Adapter over the Neo4j HTTP transaction API. Every call posts one or more
// Cypher statements to `/db/{database}/tx/commit` and checks the response's
// `errors` array. All writes MERGE on stable ids, so re-execution is
// idempotent.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::atoms::constants::RELATIONSHIP_BATCH_SIZE;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::graph_types::{
    Concept, ConceptMention, ConceptType, ExtractedRelationships,
};
use crate::atoms::types::GraphStoreConfig;

/// Outcome counts for a relationship upsert.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelationshipUpsert {
    pub uploaded: usize,
    /// Rows whose endpoint concepts were not found; silently dropped by the
    /// MATCH clauses and counted here.
    pub skipped: usize,
}

pub struct ConceptGraph {
    client: Client,
    base_url: String,
    user: String,
    password: String,
    database: String,
}

impl ConceptGraph {
    pub fn new(config: &GraphStoreConfig) -> Self {
        ConceptGraph {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url: config.uri.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
        }
    }

    /// Execute Cypher statements in one implicit transaction and return the
    /// per-statement results.
    async fn commit(&self, statements: Vec<Value>) -> EngineResult<Value> {
        let url = format!("{}/db/{}/tx/commit", self.base_url, self.database);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&json!({ "statements": statements }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::GraphStore(format!(
                "transaction failed {}: {}",
                status, text
            )));
        }

        let body: Value = resp.json().await?;
        if let Some(errors) = body["errors"].as_array() {
            if !errors.is_empty() {
                return Err(EngineError::GraphStore(format!(
                    "Cypher errors: {}",
                    errors
                        .iter()
                        .map(|e| {
                            format!(
                                "{}: {}",
                                e["code"].as_str().unwrap_or("unknown"),
                                e["message"].as_str().unwrap_or("")
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("; ")
                )));
            }
        }
        Ok(body)
    }

    /// First scalar of the first row of the first result, as u64.
    fn first_count(body: &Value) -> usize {
        body["results"][0]["data"][0]["row"][0]
            .as_u64()
            .unwrap_or(0) as usize
    }

    // ── Constraint & index setup ───────────────────────────────────────────

    /// Ensure the three uniqueness constraints exist. Safe to call on every
    /// startup; `IF NOT EXISTS` makes it a no-op afterwards.
    pub async fn ensure_constraints(&self) -> EngineResult<()> {
        let statements = vec![
            json!({"statement": "CREATE CONSTRAINT concept_id IF NOT EXISTS FOR (c:Concept) REQUIRE c.id IS UNIQUE"}),
            json!({"statement": "CREATE CONSTRAINT mention_id IF NOT EXISTS FOR (m:ConceptMention) REQUIRE m.id IS UNIQUE"}),
            json!({"statement": "CREATE CONSTRAINT relationship_id IF NOT EXISTS FOR ()-[r:GRAPH_RELATION]-() REQUIRE r.id IS UNIQUE"}),
        ];
        self.commit(statements).await?;
        info!("[graphstore] Constraints ensured");
        Ok(())
    }

    // ── Concept operations ─────────────────────────────────────────────────

    /// MERGE concepts on id, setting all scalar properties. Idempotent.
    pub async fn upsert_concepts(&self, concepts: &[Concept]) -> EngineResult<usize> {
        if concepts.is_empty() {
            return Ok(0);
        }
        let payload: Vec<Value> = concepts.iter().map(concept_params).collect();
        let query = "\
            UNWIND $concepts AS concept \
            MERGE (c:Concept {id: concept.id}) \
            SET c.name = concept.name, \
                c.definition = concept.definition, \
                c.type = concept.type, \
                c.importance = concept.importance, \
                c.confidence = concept.confidence, \
                c.aliases = concept.aliases, \
                c.videoId = concept.videoId, \
                c.groupId = concept.groupId, \
                c.firstMentionTime = concept.firstMentionTime, \
                c.lastMentionTime = concept.lastMentionTime, \
                c.mentionCount = concept.mentionCount, \
                c.extractedAt = concept.extractedAt \
            RETURN count(c) AS updated";
        let body = self
            .commit(vec![json!({
                "statement": query,
                "parameters": {"concepts": payload},
            })])
            .await?;
        let updated = Self::first_count(&body);
        info!("[graphstore] Upserted {} concepts", updated);
        Ok(updated)
    }

    /// MERGE mention nodes and attach them to their concepts.
    pub async fn upsert_mentions(&self, mentions: &[ConceptMention]) -> EngineResult<usize> {
        if mentions.is_empty() {
            return Ok(0);
        }
        let payload: Vec<Value> = mentions.iter().map(mention_params).collect();
        let query = "\
            UNWIND $mentions AS mention \
            MERGE (m:ConceptMention {id: mention.id}) \
            SET m.surface = mention.surface, \
                m.timestamp = mention.timestamp, \
                m.salience = mention.salience, \
                m.videoId = mention.videoId, \
                m.groupId = mention.groupId, \
                m.offsetStart = mention.offsetStart, \
                m.offsetEnd = mention.offsetEnd \
            WITH mention, m \
            MATCH (c:Concept {id: mention.conceptId}) \
            MERGE (m)-[:MENTIONS]->(c) \
            RETURN count(m) AS updated";
        let body = self
            .commit(vec![json!({
                "statement": query,
                "parameters": {"mentions": payload},
            })])
            .await?;
        Ok(Self::first_count(&body))
    }

    /// DETACH DELETE a video's concepts and their attached mention nodes.
    pub async fn delete_concepts_for_video(&self, video_id: &str) -> EngineResult<usize> {
        let query = "\
            MATCH (c:Concept {videoId: $video_id}) \
            OPTIONAL MATCH (c)<-[:MENTIONS]-(m:ConceptMention) \
            DETACH DELETE c, m \
            RETURN count(c) AS deleted";
        let body = self
            .commit(vec![json!({
                "statement": query,
                "parameters": {"video_id": video_id},
            })])
            .await?;
        let deleted = Self::first_count(&body);
        info!(
            "[graphstore] Deleted {} concepts for video {}",
            deleted, video_id
        );
        Ok(deleted)
    }

    /// Fetch a video's concepts ordered by importance descending.
    pub async fn get_concepts_for_video(&self, video_id: &str) -> EngineResult<Vec<Concept>> {
        let query = "\
            MATCH (c:Concept {videoId: $video_id}) \
            RETURN c ORDER BY c.importance DESC";
        let body = self
            .commit(vec![json!({
                "statement": query,
                "parameters": {"video_id": video_id},
            })])
            .await?;

        let rows = body["results"][0]["data"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let mut concepts = Vec::with_capacity(rows.len());
        for row in &rows {
            match concept_from_record(&row["row"][0]) {
                Ok(concept) => concepts.push(concept),
                Err(e) => warn!("[graphstore] Skipping malformed concept record: {}", e),
            }
        }
        Ok(concepts)
    }

    /// Substring search over concept names and definitions.
    pub async fn search_concepts(
        &self,
        query_text: &str,
        limit: usize,
        min_confidence: f64,
    ) -> EngineResult<Vec<Concept>> {
        let query = "\
            MATCH (c:Concept) \
            WHERE (toLower(c.name) CONTAINS toLower($query) \
                   OR toLower(c.definition) CONTAINS toLower($query)) \
              AND c.confidence >= $min_confidence \
            RETURN c \
            ORDER BY c.importance DESC, c.confidence DESC \
            LIMIT $limit";
        let body = self
            .commit(vec![json!({
                "statement": query,
                "parameters": {
                    "query": query_text,
                    "limit": limit,
                    "min_confidence": min_confidence,
                },
            })])
            .await?;

        let rows = body["results"][0]["data"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let mut concepts = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Ok(concept) = concept_from_record(&row["row"][0]) {
                concepts.push(concept);
            }
        }
        Ok(concepts)
    }

    // ── Relationship operations ────────────────────────────────────────────

    /// Batched MERGE of relationship edges. Both endpoints must exist; rows
    /// whose endpoints are missing vanish in the MATCH and are counted as
    /// skipped.
    pub async fn upsert_relationships(
        &self,
        relationships: &ExtractedRelationships,
        batch_size: Option<usize>,
    ) -> EngineResult<RelationshipUpsert> {
        let batch_size = batch_size.unwrap_or(RELATIONSHIP_BATCH_SIZE);
        let rels = &relationships.relationships;
        if rels.is_empty() {
            return Ok(RelationshipUpsert::default());
        }

        let query = "\
            UNWIND $batch AS rel \
            MATCH (source:Concept {id: rel.sourceConceptId}) \
            MATCH (target:Concept {id: rel.targetConceptId}) \
            MERGE (source)-[r:GRAPH_RELATION {id: rel.id}]->(target) \
            ON CREATE SET r.type = rel.relType \
            SET r.confidence = rel.confidence, \
                r.evidence = rel.evidence, \
                r.detectionMethod = rel.detectionMethod, \
                r.sourceVideoId = rel.sourceVideoId, \
                r.sourceGroupId = rel.sourceGroupId, \
                r.targetVideoId = rel.targetVideoId, \
                r.targetGroupId = rel.targetGroupId, \
                r.temporalDistance = rel.temporalDistance, \
                r.extractedAt = rel.extractedAt \
            RETURN count(r) AS added";

        let mut stats = RelationshipUpsert::default();
        for chunk in rels.chunks(batch_size) {
            let batch: Vec<Value> = chunk.iter().map(relationship_params).collect();
            let body = self
                .commit(vec![json!({
                    "statement": query,
                    "parameters": {"batch": batch},
                })])
                .await?;
            let merged = Self::first_count(&body);
            stats.uploaded += merged;
            stats.skipped += chunk.len().saturating_sub(merged);
        }

        if stats.skipped > 0 {
            warn!(
                "[graphstore] {} relationships skipped (missing endpoint concepts)",
                stats.skipped
            );
        }
        info!("[graphstore] Upserted {} relationships", stats.uploaded);
        Ok(stats)
    }

    /// Delete every relationship touching a video from either endpoint.
    pub async fn delete_relationships_for_video(&self, video_id: &str) -> EngineResult<usize> {
        let query = "\
            MATCH ()-[r:GRAPH_RELATION]-() \
            WHERE r.sourceVideoId = $video_id OR r.targetVideoId = $video_id \
            DELETE r \
            RETURN count(r) AS deleted";
        let body = self
            .commit(vec![json!({
                "statement": query,
                "parameters": {"video_id": video_id},
            })])
            .await?;
        let deleted = Self::first_count(&body);
        info!(
            "[graphstore] Deleted {} relationships for video {}",
            deleted, video_id
        );
        Ok(deleted)
    }

    /// Count relationships, optionally restricted to one video.
    pub async fn count_relationships(&self, video_id: Option<&str>) -> EngineResult<usize> {
        let statement = match video_id {
            Some(id) => json!({
                "statement": "MATCH ()-[r:GRAPH_RELATION]-() \
                              WHERE r.sourceVideoId = $video_id OR r.targetVideoId = $video_id \
                              RETURN count(r) AS total",
                "parameters": {"video_id": id},
            }),
            None => json!({
                "statement": "MATCH ()-[r:GRAPH_RELATION]-() RETURN count(r) AS total",
            }),
        };
        let body = self.commit(vec![statement]).await?;
        Ok(Self::first_count(&body))
    }
}

// ── Parameter / record conversion ──────────────────────────────────────────

fn concept_params(concept: &Concept) -> Value {
    json!({
        "id": concept.id.to_string(),
        "name": concept.name,
        "definition": concept.definition,
        "type": concept.concept_type.as_str(),
        "importance": concept.importance,
        "confidence": concept.confidence,
        "aliases": concept.aliases,
        "videoId": concept.video_id,
        "groupId": concept.group_id,
        "firstMentionTime": concept.first_mention_time,
        "lastMentionTime": concept.last_mention_time,
        "mentionCount": concept.mention_count,
        "extractedAt": concept.extracted_at.to_rfc3339(),
    })
}

fn mention_params(mention: &ConceptMention) -> Value {
    json!({
        "id": mention.id.to_string(),
        "surface": mention.surface,
        "timestamp": mention.timestamp,
        "salience": mention.salience,
        "videoId": mention.video_id,
        "groupId": mention.group_id,
        "conceptId": mention.concept_id.to_string(),
        "offsetStart": mention.offset_start,
        "offsetEnd": mention.offset_end,
    })
}

fn relationship_params(rel: &crate::atoms::graph_types::Relationship) -> Value {
    json!({
        "id": rel.id.to_string(),
        "type": rel.rel_type.as_str(),
        "relType": rel.rel_type.as_upper(),
        "confidence": rel.confidence,
        "evidence": rel.evidence,
        "detectionMethod": rel.detection_method.as_str(),
        "sourceConceptId": rel.source_concept_id.to_string(),
        "targetConceptId": rel.target_concept_id.to_string(),
        "sourceVideoId": rel.source_video_id,
        "sourceGroupId": rel.source_group_id,
        "targetVideoId": rel.target_video_id,
        "targetGroupId": rel.target_group_id,
        "temporalDistance": rel.temporal_distance,
        "extractedAt": rel.extracted_at.to_rfc3339(),
    })
}

/// Rebuild a Concept from a node's property map. Used by the replay path
/// when Pass 1 is skipped because concepts already exist.
fn concept_from_record(record: &Value) -> EngineResult<Concept> {
    let name = record["name"]
        .as_str()
        .ok_or_else(|| EngineError::GraphStore("concept record missing name".into()))?;
    let id = record["id"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or(Uuid::nil());
    let extracted_at = record["extractedAt"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Concept {
        id,
        name: name.to_string(),
        definition: record["definition"].as_str().unwrap_or("").to_string(),
        concept_type: ConceptType::from_string(record["type"].as_str().unwrap_or("Concept")),
        importance: record["importance"].as_f64().unwrap_or(0.5),
        confidence: record["confidence"].as_f64().unwrap_or(0.5),
        video_id: record["videoId"].as_str().unwrap_or("").to_string(),
        group_id: record["groupId"].as_u64().unwrap_or(0) as usize,
        first_mention_time: record["firstMentionTime"].as_f64().unwrap_or(0.0),
        last_mention_time: record["lastMentionTime"].as_f64().unwrap_or(0.0),
        mention_count: record["mentionCount"].as_u64().unwrap_or(1) as usize,
        aliases: record["aliases"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
        extracted_at,
    }
    .validated()
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::graph_types::{DetectionMethod, Relationship, RelationshipType};

    #[test]
    fn test_concept_params_shape() {
        let concept = Concept {
            id: Uuid::nil(),
            name: "Temporal Decay".to_string(),
            definition: "Similarity penalty applied over time distance.".to_string(),
            concept_type: ConceptType::Method,
            importance: 0.9,
            confidence: 0.8,
            video_id: "vid123".to_string(),
            group_id: 2,
            first_mention_time: 10.0,
            last_mention_time: 40.0,
            mention_count: 3,
            aliases: vec!["decay".to_string()],
            extracted_at: Utc::now(),
        }
        .validated()
        .unwrap();

        let params = concept_params(&concept);
        assert_eq!(params["name"], "Temporal Decay");
        assert_eq!(params["type"], "Method");
        assert_eq!(params["groupId"], 2);
        assert_eq!(params["mentionCount"], 3);
        assert_eq!(params["aliases"][0], "decay");
        assert!(params["extractedAt"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_relationship_params_upper_type() {
        let rel = Relationship {
            id: Uuid::nil(),
            source_concept_id: Uuid::new_v4(),
            target_concept_id: Uuid::new_v4(),
            rel_type: RelationshipType::BuildsOn,
            confidence: 0.8,
            evidence: "building on the earlier definition".to_string(),
            detection_method: DetectionMethod::CuePhrase,
            source_video_id: "vid123".to_string(),
            source_group_id: 3,
            target_video_id: "vid123".to_string(),
            target_group_id: 1,
            temporal_distance: Some(120.0),
            extracted_at: Utc::now(),
        }
        .validated()
        .unwrap();

        let params = relationship_params(&rel);
        assert_eq!(params["type"], "builds_on");
        assert_eq!(params["relType"], "BUILDS_ON");
        assert_eq!(params["detectionMethod"], "cue_phrase");
        assert_eq!(params["temporalDistance"], 120.0);
    }

    #[test]
    fn test_concept_round_trip_via_record() {
        let original = Concept {
            id: Uuid::nil(),
            name: "Vector Search".to_string(),
            definition: "Finding nearest neighbors in embedding space.".to_string(),
            concept_type: ConceptType::Technology,
            importance: 0.7,
            confidence: 0.9,
            video_id: "vid123".to_string(),
            group_id: 0,
            first_mention_time: 5.0,
            last_mention_time: 25.0,
            mention_count: 2,
            aliases: vec![],
            extracted_at: Utc::now(),
        }
        .validated()
        .unwrap();

        let record = concept_params(&original);
        let rebuilt = concept_from_record(&record).unwrap();
        assert_eq!(rebuilt.id, original.id);
        assert_eq!(rebuilt.name, original.name);
        assert_eq!(rebuilt.concept_type, ConceptType::Technology);
        assert_eq!(rebuilt.group_id, 0);
        assert_eq!(rebuilt.mention_count, 2);
    }

    #[test]
    fn test_first_count() {
        let body = json!({
            "results": [{"columns": ["updated"], "data": [{"row": [7]}]}],
            "errors": [],
        });
        assert_eq!(ConceptGraph::first_count(&body), 7);
        assert_eq!(ConceptGraph::first_count(&json!({"results": []})), 0);
    }
}
