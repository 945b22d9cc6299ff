// Vidgraph Engine — Weaviate Segment Store
//
// Adapter over the Weaviate REST + GraphQL API. Segment text is vectorized
// server-side on insert (text2vec with the forwarded OpenAI key); this crate
// never computes segment embeddings itself.
//
// No retry policy here: transport errors surface to the orchestrator, which
// owns retries.

use std::time::Duration;

use log::{info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::atoms::constants::{FETCH_LIMIT, SEGMENT_BATCH_SIZE};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::graph_types::{Neighbor, SegmentNode, TranscriptSegment};
use crate::atoms::types::VectorStoreConfig;
use crate::engine::http::CancelToken;

pub struct SegmentStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    openai_api_key: Option<String>,
    class_name: String,
}

impl SegmentStore {
    pub fn new(config: &VectorStoreConfig) -> Self {
        SegmentStore {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            openai_api_key: config.openai_api_key.clone(),
            class_name: config.class_name.clone(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        if let Some(key) = &self.openai_api_key {
            // Forwarded so the store's text2vec module can call the
            // embedding provider on insert.
            req = req.header("X-OpenAI-Api-Key", key);
        }
        req
    }

    /// Check the store's readiness endpoint.
    pub async fn is_ready(&self) -> EngineResult<()> {
        let resp = self
            .request(reqwest::Method::GET, "/v1/.well-known/ready")
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(EngineError::VectorStore(format!(
                "store not ready: {}",
                resp.status()
            )))
        }
    }

    /// Create the segment class with a text2vec vectorizer if it is missing.
    /// Returns true when the class was created by this call.
    pub async fn ensure_schema(&self) -> EngineResult<bool> {
        let probe = self
            .request(reqwest::Method::GET, &format!("/v1/schema/{}", self.class_name))
            .send()
            .await?;
        if probe.status().is_success() {
            return Ok(false);
        }
        if probe.status().as_u16() != 404 {
            let status = probe.status();
            let body = probe.text().await.unwrap_or_default();
            return Err(EngineError::VectorStore(format!(
                "schema probe failed {}: {}",
                status, body
            )));
        }

        let schema = json!({
            "class": self.class_name,
            "vectorizer": "text2vec-openai",
            "moduleConfig": {
                "text2vec-openai": {"vectorizeClassName": false}
            },
            "properties": [
                {"name": "videoId", "dataType": ["text"],
                 "moduleConfig": {"text2vec-openai": {"skip": true}}},
                {"name": "text", "dataType": ["text"]},
                {"name": "start_s", "dataType": ["number"],
                 "moduleConfig": {"text2vec-openai": {"skip": true}}},
                {"name": "end_s", "dataType": ["number"],
                 "moduleConfig": {"text2vec-openai": {"skip": true}}},
                {"name": "tokens", "dataType": ["int"],
                 "moduleConfig": {"text2vec-openai": {"skip": true}}},
            ],
        });

        let resp = self
            .request(reqwest::Method::POST, "/v1/schema")
            .json(&schema)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::VectorStore(format!(
                "schema creation failed {}: {}",
                status, body
            )));
        }
        info!("[vectorstore] Created class '{}'", self.class_name);
        Ok(true)
    }

    /// Batched, idempotent segment upsert with deterministic client UUIDs.
    /// Returns the number of objects accepted by the store.
    pub async fn upsert_segments(
        &self,
        segments: &[TranscriptSegment],
        cancel: &CancelToken,
    ) -> EngineResult<usize> {
        if segments.is_empty() {
            return Ok(0);
        }
        info!(
            "[vectorstore] Uploading {} segments to '{}'",
            segments.len(),
            self.class_name
        );

        let mut uploaded = 0usize;
        let mut failed = 0usize;

        for chunk in segments.chunks(SEGMENT_BATCH_SIZE) {
            cancel.checkpoint("segment upsert")?;

            let objects: Vec<Value> = chunk
                .iter()
                .map(|segment| {
                    json!({
                        "class": self.class_name,
                        "id": segment.deterministic_id().to_string(),
                        "properties": {
                            "videoId": segment.video_id,
                            "text": segment.text,
                            "start_s": segment.start_s,
                            "end_s": segment.end_s,
                            "tokens": segment.tokens,
                        },
                    })
                })
                .collect();

            let resp = self
                .request(reqwest::Method::POST, "/v1/batch/objects")
                .json(&json!({ "objects": objects }))
                .send()
                .await?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(EngineError::VectorStore(format!(
                    "batch upsert failed {}: {}",
                    status, body
                )));
            }

            let results: Value = resp.json().await?;
            let (ok, errors) = count_batch_results(&results);
            uploaded += ok;
            failed += errors;
        }

        if failed > 0 {
            warn!("[vectorstore] {} segment objects rejected by the store", failed);
        }
        info!("[vectorstore] Uploaded {} segments", uploaded);
        Ok(uploaded)
    }

    /// Fetch all segments for a video, ordered by start time with dense
    /// indices reassigned. Malformed vectors are treated as missing.
    pub async fn fetch_by_video(
        &self,
        video_id: &str,
        include_vectors: bool,
    ) -> EngineResult<Vec<SegmentNode>> {
        self.is_ready().await?;

        let additional = if include_vectors { "id vector" } else { "id" };
        let query = format!(
            "{{ Get {{ {}(limit: {}, where: {{path: [\"videoId\"], operator: Equal, valueText: {}}}) \
             {{ videoId text start_s end_s tokens _additional {{ {} }} }} }} }}",
            self.class_name,
            FETCH_LIMIT,
            graphql_string(video_id),
            additional,
        );

        let body = self.graphql(&query).await?;
        let mut segments = parse_fetch_response(&body, &self.class_name)?;

        segments.sort_by(|a, b| a.start_s.partial_cmp(&b.start_s).unwrap_or(std::cmp::Ordering::Equal));
        for (i, segment) in segments.iter_mut().enumerate() {
            segment.index = i;
        }

        info!(
            "[vectorstore] Fetched {} segments for video {}",
            segments.len(),
            video_id
        );
        Ok(segments)
    }

    /// k-NN by vector, filtered to one video. Similarity is `1 - distance`
    /// (cosine). Self-matches are not filtered here; callers drop self.
    pub async fn knn(
        &self,
        embedding: &[f32],
        video_id: &str,
        k: usize,
    ) -> EngineResult<Vec<Neighbor>> {
        let vector = serde_json::to_string(embedding)?;
        let query = format!(
            "{{ Get {{ {}(limit: {}, nearVector: {{vector: {}}}, \
             where: {{path: [\"videoId\"], operator: Equal, valueText: {}}}) \
             {{ start_s end_s _additional {{ id vector distance }} }} }} }}",
            self.class_name,
            k,
            vector,
            graphql_string(video_id),
        );

        let body = self.graphql(&query).await?;
        parse_knn_response(&body, &self.class_name)
    }

    /// Idempotent removal of every segment belonging to a video.
    /// Returns the number of matched objects.
    pub async fn delete_by_video(&self, video_id: &str) -> EngineResult<usize> {
        let body = json!({
            "match": {
                "class": self.class_name,
                "where": {
                    "path": ["videoId"],
                    "operator": "Equal",
                    "valueText": video_id,
                },
            },
            "output": "minimal",
        });

        let resp = self
            .request(reqwest::Method::DELETE, "/v1/batch/objects")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::VectorStore(format!(
                "batch delete failed {}: {}",
                status, text
            )));
        }

        let v: Value = resp.json().await?;
        let matches = v["results"]["matches"].as_u64().unwrap_or(0) as usize;
        info!(
            "[vectorstore] Deleted {} segments for video {}",
            matches, video_id
        );
        Ok(matches)
    }

    async fn graphql(&self, query: &str) -> EngineResult<Value> {
        let resp = self
            .request(reqwest::Method::POST, "/v1/graphql")
            .json(&json!({ "query": query }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::VectorStore(format!(
                "GraphQL request failed {}: {}",
                status, text
            )));
        }

        let body: Value = resp.json().await?;
        if let Some(errors) = body["errors"].as_array() {
            if !errors.is_empty() {
                return Err(EngineError::VectorStore(format!(
                    "GraphQL errors: {}",
                    errors
                        .iter()
                        .map(|e| e["message"].as_str().unwrap_or("unknown").to_string())
                        .collect::<Vec<_>>()
                        .join("; ")
                )));
            }
        }
        Ok(body)
    }
}

// ── Response parsing ───────────────────────────────────────────────────────

/// Quote a string for inline use in a GraphQL query.
fn graphql_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

/// Count per-object outcomes in a batch response. Objects whose `result`
/// carries an `errors` key were rejected.
fn count_batch_results(results: &Value) -> (usize, usize) {
    let mut ok = 0usize;
    let mut failed = 0usize;
    if let Some(items) = results.as_array() {
        for item in items {
            let has_error = item["result"]["errors"]["error"]
                .as_array()
                .map(|errs| !errs.is_empty())
                .unwrap_or(false);
            if has_error {
                failed += 1;
                warn!(
                    "[vectorstore] Object rejected: {}",
                    item["result"]["errors"]["error"][0]["message"]
                        .as_str()
                        .unwrap_or("unknown error")
                );
            } else {
                ok += 1;
            }
        }
    }
    (ok, failed)
}

/// Extract a dense vector from `_additional.vector`. Non-numeric entries
/// make the whole vector count as missing.
fn parse_vector(value: &Value) -> Option<Vec<f32>> {
    let array = match value {
        Value::Array(a) => a,
        // Named-vector form: {"default": [...]}
        Value::Object(map) => map.get("default")?.as_array()?,
        _ => return None,
    };
    if array.is_empty() {
        return None;
    }
    let mut out = Vec::with_capacity(array.len());
    for entry in array {
        out.push(entry.as_f64()? as f32);
    }
    Some(out)
}

fn parse_fetch_response(body: &Value, class_name: &str) -> EngineResult<Vec<SegmentNode>> {
    let objects = body["data"]["Get"][class_name]
        .as_array()
        .ok_or_else(|| EngineError::VectorStore("missing Get payload in response".into()))?;

    let mut segments = Vec::with_capacity(objects.len());
    for (i, obj) in objects.iter().enumerate() {
        let additional = &obj["_additional"];
        let id = additional["id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| EngineError::VectorStore("object missing id".into()))?;
        let text = obj["text"].as_str().unwrap_or("").to_string();
        let word_count = obj["tokens"]
            .as_u64()
            .map(|t| t as usize)
            .unwrap_or_else(|| text.split_whitespace().count());
        segments.push(SegmentNode {
            id,
            video_id: obj["videoId"].as_str().unwrap_or("").to_string(),
            index: i,
            text,
            start_s: obj["start_s"].as_f64().unwrap_or(0.0),
            end_s: obj["end_s"].as_f64().unwrap_or(0.0),
            word_count,
            embedding: parse_vector(&additional["vector"]),
            neighbors: Vec::new(),
            group_id: None,
        });
    }
    Ok(segments)
}

fn parse_knn_response(body: &Value, class_name: &str) -> EngineResult<Vec<Neighbor>> {
    let objects = body["data"]["Get"][class_name]
        .as_array()
        .ok_or_else(|| EngineError::VectorStore("missing Get payload in response".into()))?;

    let mut neighbors = Vec::with_capacity(objects.len());
    for obj in objects {
        let additional = &obj["_additional"];
        let id = match additional["id"].as_str().and_then(|s| Uuid::parse_str(s).ok()) {
            Some(id) => id,
            None => continue,
        };
        let distance = additional["distance"].as_f64().unwrap_or(0.0);
        neighbors.push(Neighbor {
            segment_id: id,
            index: None,
            similarity: 1.0 - distance,
            start_s: obj["start_s"].as_f64().unwrap_or(0.0),
            end_s: obj["end_s"].as_f64().unwrap_or(0.0),
            embedding: parse_vector(&additional["vector"]),
        });
    }
    Ok(neighbors)
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graphql_string_escapes() {
        assert_eq!(graphql_string("abc"), "\"abc\"");
        assert_eq!(graphql_string("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn test_parse_vector_forms() {
        assert_eq!(parse_vector(&json!([0.1, 0.2])), Some(vec![0.1, 0.2]));
        assert_eq!(
            parse_vector(&json!({"default": [1.0, 2.0]})),
            Some(vec![1.0, 2.0])
        );
        assert_eq!(parse_vector(&json!([])), None);
        assert_eq!(parse_vector(&json!("oops")), None);
        // A single malformed entry poisons the vector
        assert_eq!(parse_vector(&json!([0.1, "bad"])), None);
    }

    #[test]
    fn test_count_batch_results() {
        let results = json!([
            {"result": {}},
            {"result": {"errors": {"error": [{"message": "vectorizer down"}]}}},
            {"result": {"status": "SUCCESS"}},
        ]);
        assert_eq!(count_batch_results(&results), (2, 1));
    }

    #[test]
    fn test_parse_fetch_response() {
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();
        let body = json!({
            "data": {"Get": {"Segment": [
                {
                    "videoId": "vid123", "text": "later text", "start_s": 60.0,
                    "end_s": 90.0, "tokens": 2,
                    "_additional": {"id": id_b.to_string(), "vector": [0.0, 1.0]},
                },
                {
                    "videoId": "vid123", "text": "earlier text", "start_s": 0.0,
                    "end_s": 30.0, "tokens": 2,
                    "_additional": {"id": id_a.to_string(), "vector": "malformed"},
                },
            ]}}
        });
        let segments = parse_fetch_response(&body, "Segment").unwrap();
        assert_eq!(segments.len(), 2);
        // Unsorted here; the store method sorts and reindexes
        assert_eq!(segments[0].id, id_b);
        assert!(segments[0].embedding.is_some());
        // Malformed vector treated as missing
        assert!(segments[1].embedding.is_none());
        assert_eq!(segments[1].word_count, 2);
    }

    #[test]
    fn test_parse_knn_response_similarity() {
        let id = Uuid::new_v4();
        let body = json!({
            "data": {"Get": {"Segment": [
                {
                    "start_s": 10.0, "end_s": 40.0,
                    "_additional": {"id": id.to_string(), "distance": 0.25, "vector": [1.0]},
                },
            ]}}
        });
        let neighbors = parse_knn_response(&body, "Segment").unwrap();
        assert_eq!(neighbors.len(), 1);
        assert!((neighbors[0].similarity - 0.75).abs() < 1e-9);
        assert_eq!(neighbors[0].segment_id, id);
    }
}
