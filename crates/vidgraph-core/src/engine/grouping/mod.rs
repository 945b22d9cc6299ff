// Vidgraph Engine — Semantic Segment Grouping
//
// Partitions a video's segments into temporally contiguous, semantically
// cohesive groups:
//   1. Fetch segments (start_s order) from the vector store
//   2. Build k-NN neighborhoods with temporal-decay weighting
//   3. Detect boundaries on cohesion dips and word-count caps
//   4. Form groups, folding undersized ones into their predecessors
//   5. Single-sweep centroid merge of adjacent near-duplicate groups
//   6. Report statistics and export the groups artifact

pub mod boundary;
pub mod merge;
pub mod neighborhood;

use std::fs;
use std::path::Path;

use log::{info, warn};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::graph_types::{SegmentGroup, SegmentNode};
use crate::atoms::types::GroupingConfig;
use crate::engine::http::CancelToken;
use crate::engine::vectorstore::SegmentStore;

pub struct GroupingEngine {
    config: GroupingConfig,
}

impl GroupingEngine {
    pub fn new(config: GroupingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GroupingConfig {
        &self.config
    }

    /// Complete grouping pipeline for one video.
    ///
    /// Empty videos produce an empty list. A video with no embedded
    /// segments produces a single group holding everything, since no
    /// cohesion signal exists to split on.
    pub async fn run(
        &self,
        store: &SegmentStore,
        video_id: &str,
        cancel: &CancelToken,
    ) -> EngineResult<Vec<SegmentGroup>> {
        info!("[grouping] Grouping segments for video {}", video_id);

        let mut segments = store.fetch_by_video(video_id, true).await?;
        if segments.is_empty() {
            warn!("[grouping] No segments found for video {}", video_id);
            return Ok(Vec::new());
        }

        let embedded = segments.iter().filter(|s| s.embedding.is_some()).count();
        if embedded == 0 {
            warn!(
                "[grouping] No segment embeddings for video {}; emitting a single group",
                video_id
            );
            for seg in segments.iter_mut() {
                seg.group_id = Some(0);
            }
            return Ok(vec![SegmentGroup {
                group_id: 0,
                video_id: video_id.to_string(),
                segments,
            }]);
        }

        neighborhood::build_neighborhoods(store, &mut segments, &self.config, cancel).await?;
        cancel.checkpoint("grouping")?;

        let groups = boundary::form_groups(segments, &self.config);
        let groups = merge::merge_adjacent_groups(groups, &self.config);

        GroupingStats::from_groups(&groups).log_report();
        Ok(groups)
    }
}

// ── Statistics ─────────────────────────────────────────────────────────────

/// Summary statistics for one grouping run.
#[derive(Debug, Default, Clone)]
pub struct GroupingStats {
    pub num_groups: usize,
    pub total_segments: usize,
    pub words_min: usize,
    pub words_max: usize,
    pub words_mean: f64,
    pub words_median: f64,
    pub cohesion_min: f64,
    pub cohesion_max: f64,
    pub cohesion_mean: f64,
}

impl GroupingStats {
    pub fn from_groups(groups: &[SegmentGroup]) -> Self {
        if groups.is_empty() {
            return Self::default();
        }
        let word_counts: Vec<usize> = groups.iter().map(|g| g.total_words()).collect();
        let cohesions: Vec<f64> = groups.iter().map(|g| g.avg_internal_similarity()).collect();
        Self {
            num_groups: groups.len(),
            total_segments: groups.iter().map(|g| g.segments.len()).sum(),
            words_min: word_counts.iter().copied().min().unwrap_or(0),
            words_max: word_counts.iter().copied().max().unwrap_or(0),
            words_mean: mean(&word_counts.iter().map(|&w| w as f64).collect::<Vec<_>>()),
            words_median: median(&word_counts.iter().map(|&w| w as f64).collect::<Vec<_>>()),
            cohesion_min: cohesions.iter().copied().fold(f64::INFINITY, f64::min),
            cohesion_max: cohesions.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            cohesion_mean: mean(&cohesions),
        }
    }

    pub fn log_report(&self) {
        if self.num_groups == 0 {
            return;
        }
        info!(
            "[grouping] {} groups / {} segments (avg {:.1} per group)",
            self.num_groups,
            self.total_segments,
            self.total_segments as f64 / self.num_groups as f64
        );
        info!(
            "[grouping] Words: min={} max={} mean={:.0} median={:.0}",
            self.words_min, self.words_max, self.words_mean, self.words_median
        );
        info!(
            "[grouping] Cohesion: min={:.3} max={:.3} mean={:.3}",
            self.cohesion_min, self.cohesion_max, self.cohesion_mean
        );
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

// ── JSON artifact ──────────────────────────────────────────────────────────

/// Export groups to the `groups_<video_id>.json` artifact.
/// Embeddings are not persisted.
pub fn export_groups(groups: &[SegmentGroup], output_path: &Path) -> EngineResult<()> {
    let video_id = groups.first().map(|g| g.video_id.as_str()).unwrap_or("");
    let output = json!({
        "video_id": video_id,
        "num_groups": groups.len(),
        "groups": groups.iter().map(|g| json!({
            "group_id": g.group_id,
            "start_time": g.start_time(),
            "end_time": g.end_time(),
            "duration": g.duration(),
            "num_segments": g.segments.len(),
            "total_words": g.total_words(),
            "text": g.text(),
            "avg_cohesion": g.avg_internal_similarity(),
            "segments": g.segments.iter().map(|s| json!({
                "id": s.id.to_string(),
                "index": s.index,
                "start_time": s.start_s,
                "end_time": s.end_s,
                "text": s.text,
                "word_count": s.word_count,
            })).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
    });

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output_path, serde_json::to_string_pretty(&output)?)?;
    info!("[grouping] Exported groups to {}", output_path.display());
    Ok(())
}

/// Load a previously exported groups artifact. Embeddings and neighborhoods
/// are not part of the artifact and come back empty.
pub fn load_groups(input_path: &Path) -> EngineResult<Vec<SegmentGroup>> {
    let raw = fs::read_to_string(input_path)?;
    let data: Value = serde_json::from_str(&raw)?;
    let video_id = data["video_id"].as_str().unwrap_or("").to_string();

    let group_values = data["groups"]
        .as_array()
        .ok_or_else(|| EngineError::Other("groups artifact missing 'groups' list".into()))?;

    let mut groups = Vec::with_capacity(group_values.len());
    for gv in group_values {
        let group_id = gv["group_id"].as_u64().unwrap_or(0) as usize;
        let segment_values = gv["segments"].as_array().cloned().unwrap_or_default();
        let segments: Vec<SegmentNode> = segment_values
            .iter()
            .map(|sv| SegmentNode {
                id: sv["id"]
                    .as_str()
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .unwrap_or(Uuid::nil()),
                video_id: video_id.clone(),
                index: sv["index"].as_u64().unwrap_or(0) as usize,
                text: sv["text"].as_str().unwrap_or("").to_string(),
                start_s: sv["start_time"].as_f64().unwrap_or(0.0),
                end_s: sv["end_time"].as_f64().unwrap_or(0.0),
                word_count: sv["word_count"].as_u64().unwrap_or(0) as usize,
                embedding: None,
                neighbors: Vec::new(),
                group_id: Some(group_id),
            })
            .collect();
        groups.push(SegmentGroup {
            group_id,
            video_id: video_id.clone(),
            segments,
        });
    }
    Ok(groups)
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_groups() -> Vec<SegmentGroup> {
        let make_segment = |index: usize, group_id: usize| SegmentNode {
            id: Uuid::new_v4(),
            video_id: "vid123".to_string(),
            index,
            text: format!("text of segment {}", index),
            start_s: index as f64 * 30.0,
            end_s: (index + 1) as f64 * 30.0,
            word_count: 40 + index,
            embedding: Some(vec![1.0, 0.0]),
            neighbors: vec![],
            group_id: Some(group_id),
        };
        vec![
            SegmentGroup {
                group_id: 0,
                video_id: "vid123".to_string(),
                segments: vec![make_segment(0, 0), make_segment(1, 0)],
            },
            SegmentGroup {
                group_id: 1,
                video_id: "vid123".to_string(),
                segments: vec![make_segment(2, 1)],
            },
        ]
    }

    #[test]
    fn test_stats() {
        let stats = GroupingStats::from_groups(&sample_groups());
        assert_eq!(stats.num_groups, 2);
        assert_eq!(stats.total_segments, 3);
        assert_eq!(stats.words_min, 42);
        assert_eq!(stats.words_max, 81);
        // Fully aligned embeddings: perfect cohesion everywhere
        assert!((stats.cohesion_mean - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_export_load_round_trip() {
        let groups = sample_groups();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups_vid123.json");

        export_groups(&groups, &path).unwrap();
        let loaded = load_groups(&path).unwrap();

        assert_eq!(loaded.len(), groups.len());
        for (orig, restored) in groups.iter().zip(loaded.iter()) {
            assert_eq!(orig.group_id, restored.group_id);
            assert_eq!(orig.video_id, restored.video_id);
            assert_eq!(orig.segments.len(), restored.segments.len());
            assert_eq!(orig.text(), restored.text());
            assert_eq!(orig.total_words(), restored.total_words());
            for (a, b) in orig.segments.iter().zip(restored.segments.iter()) {
                assert_eq!(a.id, b.id);
                assert_eq!(a.index, b.index);
                assert_eq!(a.start_s, b.start_s);
                assert_eq!(a.end_s, b.end_s);
                // Embeddings are not persisted in the artifact
                assert!(b.embedding.is_none());
            }
        }
    }

    #[test]
    fn test_export_shape() {
        let groups = sample_groups();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.json");
        export_groups(&groups, &path).unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["video_id"], "vid123");
        assert_eq!(raw["num_groups"], 2);
        assert_eq!(raw["groups"][0]["num_segments"], 2);
        assert!(raw["groups"][0]["avg_cohesion"].is_number());
        assert_eq!(raw["groups"][0]["segments"][0]["index"], 0);
    }
}
