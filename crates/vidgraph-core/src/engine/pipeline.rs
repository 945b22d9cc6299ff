// Vidgraph Engine — Pipeline Orchestrator
//
// Sequences one video end-to-end:
//   segments → vector store → grouping → Pass-1/Pass-2 concepts → graph
//   store → relationship detection → graph store + JSON artifacts
//
// Stage gating via PipelineConfig flags; a disabled stage short-circuits the
// remainder. Failures after segmentation are reported, not rolled back:
// every store write is an idempotent MERGE, so a re-run converges to the
// same terminal state.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{error, info, warn};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::graph_types::{Concept, ExtractedConcepts, SegmentGroup, TranscriptInput};
use crate::atoms::types::AppConfig;
use crate::engine::concepts::{ConceptConsolidator, ConceptExtractor};
use crate::engine::graphstore::ConceptGraph;
use crate::engine::grouping::{self, GroupingEngine};
use crate::engine::http::{CancelToken, RateGate};
use crate::engine::llm::LlmClient;
use crate::engine::relationships::{self, RelationshipEngine};
use crate::engine::segmenter;
use crate::engine::vectorstore::SegmentStore;

// ── Run options & reports ──────────────────────────────────────────────────

/// Per-invocation switches, separate from the durable configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Reuse concepts already in the graph store instead of re-extracting.
    pub skip_existing: bool,
    /// Delete a video's relationships before upserting the fresh set.
    pub overwrite_relationships: bool,
    /// Write transcript/groups/relationships JSON artifacts.
    pub save_artifacts: bool,
}

impl RunOptions {
    pub fn with_artifacts() -> Self {
        Self {
            save_artifacts: true,
            ..Self::default()
        }
    }
}

/// Summary of the concept stages for one video.
#[derive(Debug, Default, Clone)]
pub struct ConceptStats {
    pub groups_processed: usize,
    pub groups_failed: usize,
    pub candidates_extracted: usize,
    pub final_concepts: usize,
    pub concepts_uploaded: usize,
    pub avg_importance: f64,
    pub avg_confidence: f64,
    pub extraction_secs: f64,
}

/// Summary of the relationship stage for one video.
#[derive(Debug, Default, Clone)]
pub struct RelationshipStats {
    pub detected: usize,
    pub uploaded: usize,
    pub skipped: usize,
    pub avg_confidence: f64,
    pub type_distribution: HashMap<&'static str, usize>,
}

/// Outcome of one pipeline invocation. `success == false` carries the first
/// stage error; earlier stages' persisted side effects remain in place.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub video_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub segment_count: usize,
    pub group_count: usize,
    pub concept_stats: Option<ConceptStats>,
    pub relationship_stats: Option<RelationshipStats>,
}

impl PipelineReport {
    fn empty(video_id: &str) -> Self {
        Self {
            video_id: video_id.to_string(),
            success: true,
            error: None,
            segment_count: 0,
            group_count: 0,
            concept_stats: None,
            relationship_stats: None,
        }
    }
}

// ── Pipeline ───────────────────────────────────────────────────────────────

pub struct Pipeline {
    config: AppConfig,
    store: SegmentStore,
    graph: ConceptGraph,
    llm: Arc<LlmClient>,
    grouping: GroupingEngine,
    rate_gate: RateGate,
    cancel: CancelToken,
}

impl Pipeline {
    /// Build every component, verify the stores are reachable, and bootstrap
    /// schema constraints. Fails fast on configuration problems.
    pub async fn connect(config: AppConfig) -> EngineResult<Self> {
        let store = SegmentStore::new(&config.vector_store);
        store.is_ready().await?;
        store.ensure_schema().await?;

        let graph = ConceptGraph::new(&config.graph_store);
        graph.ensure_constraints().await?;

        let llm = Arc::new(LlmClient::new(&config.llm));
        let grouping = GroupingEngine::new(config.grouping);
        let rate_gate = RateGate::from_secs_f64(config.pipeline.concept_delay_seconds);

        info!("[pipeline] Connected to vector store, graph store, and LLM endpoint");
        Ok(Self {
            config,
            store,
            graph,
            llm,
            grouping,
            rate_gate,
            cancel: CancelToken::new(),
        })
    }

    /// Token that cancels this pipeline cooperatively from another task.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    pub fn graph(&self) -> &ConceptGraph {
        &self.graph
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // ── Artifact paths ─────────────────────────────────────────────────────

    fn transcript_path(&self, video_id: &str) -> PathBuf {
        self.config
            .pipeline
            .transcripts_dir()
            .join(format!("transcript_{}.txt", video_id))
    }

    fn groups_path(&self, video_id: &str) -> PathBuf {
        self.config
            .pipeline
            .groups_dir()
            .join(format!("groups_{}.json", video_id))
    }

    fn relationships_path(&self, video_id: &str) -> PathBuf {
        self.config
            .pipeline
            .relationships_dir()
            .join(format!("relationships_{}.json", video_id))
    }

    // ── End-to-end processing ──────────────────────────────────────────────

    /// Process one transcript end-to-end. Never panics or returns Err; the
    /// outcome (including the first stage error) lands in the report.
    pub async fn process_transcript(
        &self,
        input: &TranscriptInput,
        options: &RunOptions,
    ) -> PipelineReport {
        info!("[pipeline] Processing video {}", input.video_id);
        let mut report = PipelineReport::empty(&input.video_id);
        if let Err(e) = self.run_stages(input, options, &mut report).await {
            error!("[pipeline] Video {} failed: {}", input.video_id, e);
            report.success = false;
            report.error = Some(e.to_string());
        }
        report
    }

    /// Process a list of transcripts serially, logging a batch summary.
    pub async fn process_many(
        &self,
        inputs: &[TranscriptInput],
        options: &RunOptions,
    ) -> Vec<PipelineReport> {
        let mut reports = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            info!("[pipeline] Video {}/{}", i + 1, inputs.len());
            reports.push(self.process_transcript(input, options).await);
            if self.cancel.is_cancelled() {
                warn!("[pipeline] Batch cancelled after {} videos", reports.len());
                break;
            }
        }

        let succeeded = reports.iter().filter(|r| r.success).count();
        let total_segments: usize = reports.iter().map(|r| r.segment_count).sum();
        let total_groups: usize = reports.iter().map(|r| r.group_count).sum();
        info!(
            "[pipeline] Batch complete: {}/{} videos, {} segments, {} groups",
            succeeded,
            inputs.len(),
            total_segments,
            total_groups
        );
        reports
    }

    async fn run_stages(
        &self,
        input: &TranscriptInput,
        options: &RunOptions,
        report: &mut PipelineReport,
    ) -> EngineResult<()> {
        let video_id = &input.video_id;

        // Stage 1: segment assembly (pure, in-process)
        let segments = segmenter::assemble_segments(input, &self.config.segmenter)?;
        info!("[pipeline] Assembled {} segments", segments.len());
        if options.save_artifacts {
            let path = self.transcript_path(video_id);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, segmenter::render_transcript(&segments))?;
            info!("[pipeline] Transcript saved to {}", path.display());
        }

        // Stage 2: vector store upsert
        report.segment_count = self.store.upsert_segments(&segments, &self.cancel).await?;

        // Stage 3: grouping
        if !self.config.pipeline.enable_grouping {
            info!("[pipeline] Grouping disabled; stopping after segment upload");
            return Ok(());
        }
        let groups = self.grouping.run(&self.store, video_id, &self.cancel).await?;
        report.group_count = groups.len();
        if groups.is_empty() {
            warn!("[pipeline] No groups produced; downstream stages skipped");
            return Ok(());
        }
        if options.save_artifacts {
            grouping::export_groups(&groups, &self.groups_path(video_id))?;
        }

        // Stages 4-6: concepts
        let extractions = if self.config.pipeline.enable_concepts {
            let (extractions, stats) =
                self.run_concept_stages(video_id, &groups, options).await?;
            report.concept_stats = Some(stats);
            extractions
        } else if self.config.pipeline.enable_relationships {
            // Relationship stage still needs concepts; reuse what the graph
            // store already holds.
            self.load_extractions_from_graph(video_id, &groups).await?
        } else {
            Vec::new()
        };

        // Stages 7-8: relationships
        if self.config.pipeline.enable_relationships {
            if extractions.is_empty() {
                warn!("[pipeline] No concepts available; relationship stage skipped");
                return Ok(());
            }
            let stats = self
                .run_relationship_stage(video_id, &extractions, options)
                .await?;
            report.relationship_stats = Some(stats);
        }

        info!("[pipeline] Video {} complete", video_id);
        Ok(())
    }

    // ── Concept stages ─────────────────────────────────────────────────────

    /// Pass 1 + Pass 2 + persistence. Returns per-group extractions carrying
    /// the FINAL concept set (for the relationship stage) and stage stats.
    async fn run_concept_stages(
        &self,
        video_id: &str,
        groups: &[SegmentGroup],
        options: &RunOptions,
    ) -> EngineResult<(Vec<ExtractedConcepts>, ConceptStats)> {
        let mut stats = ConceptStats::default();
        let group_texts: HashMap<usize, String> =
            groups.iter().map(|g| (g.group_id, g.text())).collect();

        // Replay path: concepts already persisted are the consolidated set,
        // so neither extraction pass re-runs.
        if options.skip_existing {
            let existing = self.graph.get_concepts_for_video(video_id).await?;
            if !existing.is_empty() {
                info!(
                    "[pipeline] {} concepts already exist for {}; skipping re-extraction",
                    existing.len(),
                    video_id
                );
                let extractions = regroup_concepts(existing, video_id, &group_texts);
                stats.groups_processed = extractions.len();
                stats.final_concepts = extractions.iter().map(|e| e.concepts.len()).sum();
                fill_score_averages(&mut stats, &extractions);
                return Ok((extractions, stats));
            }
        }

        // Pass 1: candidate extraction per group, rate-gated
        info!("[pipeline] Pass 1: extracting candidate concepts from {} groups", groups.len());
        let extractor = ConceptExtractor::new(self.llm.clone());
        let started = Instant::now();
        let mut candidates: Vec<ExtractedConcepts> = Vec::new();

        for group in groups {
            self.cancel.checkpoint("concept extraction")?;
            let text = group.text();
            if text.trim().is_empty() {
                warn!("[pipeline] Group {}: no text, skipping extraction", group.group_id);
                stats.groups_failed += 1;
                continue;
            }

            self.rate_gate.wait().await;
            match extractor
                .extract_from_group(
                    video_id,
                    group.group_id,
                    &text,
                    group.start_time(),
                    group.end_time(),
                )
                .await
            {
                Ok(extracted) => {
                    let (valid, issues) = extracted.validate();
                    if !valid {
                        for issue in &issues {
                            warn!("[pipeline] Group {}: {}", group.group_id, issue);
                        }
                    }
                    info!(
                        "[pipeline] Group {}: {} candidate concepts",
                        group.group_id,
                        extracted.concepts.len()
                    );
                    stats.groups_processed += 1;
                    stats.candidates_extracted += extracted.concepts.len();
                    candidates.push(extracted);
                }
                Err(e) => {
                    warn!("[pipeline] Group {} extraction failed: {}", group.group_id, e);
                    stats.groups_failed += 1;
                }
            }
        }
        info!(
            "[pipeline] Pass 1 complete: {} candidates from {} groups",
            stats.candidates_extracted, stats.groups_processed
        );

        // Pass 2: consolidation, falling back to the candidate union
        self.cancel.checkpoint("concept consolidation")?;
        let consolidator = ConceptConsolidator::new(self.llm.clone());
        let final_concepts = match consolidator.consolidate(&candidates, video_id).await {
            Ok(finals) => finals,
            Err(e) => {
                warn!(
                    "[pipeline] Consolidation failed ({}); falling back to unconsolidated candidates",
                    e
                );
                candidates
                    .iter()
                    .flat_map(|ec| ec.concepts.iter().cloned())
                    .collect()
            }
        };
        stats.final_concepts = final_concepts.len();
        stats.extraction_secs = started.elapsed().as_secs_f64();

        // Persistence
        stats.concepts_uploaded = self.graph.upsert_concepts(&final_concepts).await?;
        let mentions: Vec<_> = candidates
            .iter()
            .flat_map(|ec| ec.mentions.iter().cloned())
            .collect();
        if !mentions.is_empty() {
            self.graph.upsert_mentions(&mentions).await?;
        }

        let extractions = regroup_concepts(final_concepts, video_id, &group_texts);
        fill_score_averages(&mut stats, &extractions);
        info!(
            "[pipeline] Concepts complete: {} final across {} groups",
            stats.final_concepts,
            extractions.len()
        );
        Ok((extractions, stats))
    }

    /// Reconstruct per-group extractions from the graph store (used when the
    /// concept stage is disabled but relationships still need inputs).
    async fn load_extractions_from_graph(
        &self,
        video_id: &str,
        groups: &[SegmentGroup],
    ) -> EngineResult<Vec<ExtractedConcepts>> {
        let records = self.graph.get_concepts_for_video(video_id).await?;
        if records.is_empty() {
            warn!("[pipeline] No concepts in graph store for {}", video_id);
            return Ok(Vec::new());
        }
        let group_texts: HashMap<usize, String> =
            groups.iter().map(|g| (g.group_id, g.text())).collect();
        Ok(regroup_concepts(records, video_id, &group_texts))
    }

    // ── Relationship stage ─────────────────────────────────────────────────

    async fn run_relationship_stage(
        &self,
        video_id: &str,
        extractions: &[ExtractedConcepts],
        options: &RunOptions,
    ) -> EngineResult<RelationshipStats> {
        if options.overwrite_relationships {
            self.graph.delete_relationships_for_video(video_id).await?;
        }

        let engine = RelationshipEngine::new(
            self.config.pipeline.min_relationship_confidence,
            &self.config.detectors,
            self.detector_embedder(),
        );
        let result = engine
            .extract_from_video(extractions, video_id, &self.cancel)
            .await?;

        let (valid, issues) = result.validate();
        if !valid {
            for issue in &issues {
                warn!("[pipeline] Relationship validation: {}", issue);
            }
        }

        let upsert = self.graph.upsert_relationships(&result, None).await?;
        if options.save_artifacts {
            relationships::save_to_file(&result, &self.relationships_path(video_id))?;
        }

        Ok(RelationshipStats {
            detected: result.len(),
            uploaded: upsert.uploaded,
            skipped: upsert.skipped,
            avg_confidence: result.avg_confidence(),
            type_distribution: result.type_distribution(),
        })
    }

    /// Embedding fallbacks run only against the stock endpoint; custom
    /// bindings frequently lack the embeddings route and would fail every
    /// pair.
    fn detector_embedder(&self) -> Option<Arc<dyn crate::atoms::traits::Embedder>> {
        if self.config.llm.base_url == crate::atoms::constants::DEFAULT_LLM_BASE_URL {
            Some(self.llm.clone())
        } else {
            None
        }
    }

    // ── Stage-level entry points (CLI subcommands) ─────────────────────────

    /// Grouping only: fetch, group, and optionally export the artifact.
    pub async fn group_video(
        &self,
        video_id: &str,
        save: bool,
    ) -> EngineResult<Vec<SegmentGroup>> {
        let groups = self.grouping.run(&self.store, video_id, &self.cancel).await?;
        if save && !groups.is_empty() {
            grouping::export_groups(&groups, &self.groups_path(video_id))?;
        }
        Ok(groups)
    }

    /// Two-pass concept extraction for an already-grouped video. Requires
    /// the groups artifact from a previous run.
    pub async fn extract_concepts_for_video(
        &self,
        video_id: &str,
        options: &RunOptions,
    ) -> EngineResult<ConceptStats> {
        let groups = grouping::load_groups(&self.groups_path(video_id))?;
        if groups.is_empty() {
            return Err(EngineError::Other(format!(
                "groups artifact for {} is empty; run grouping first",
                video_id
            )));
        }
        let (_, stats) = self.run_concept_stages(video_id, &groups, options).await?;
        Ok(stats)
    }

    /// Relationship replay: concepts from the graph store, group texts from
    /// the groups artifact when available.
    pub async fn extract_relationships_for_video(
        &self,
        video_id: &str,
        options: &RunOptions,
    ) -> EngineResult<RelationshipStats> {
        let groups = match grouping::load_groups(&self.groups_path(video_id)) {
            Ok(groups) => groups,
            Err(e) => {
                warn!(
                    "[pipeline] Groups artifact unavailable ({}); pattern detection will see empty texts",
                    e
                );
                Vec::new()
            }
        };
        let extractions = self.load_extractions_from_graph(video_id, &groups).await?;
        if extractions.is_empty() {
            return Err(EngineError::Other(format!(
                "no concepts in graph store for {}; run concept extraction first",
                video_id
            )));
        }
        self.run_relationship_stage(video_id, &extractions, options)
            .await
    }

    /// Remove a video's data from both stores.
    pub async fn delete_video(
        &self,
        video_id: &str,
        segments: bool,
        concepts: bool,
        relationships: bool,
    ) -> EngineResult<()> {
        if relationships {
            self.graph.delete_relationships_for_video(video_id).await?;
        }
        if concepts {
            self.graph.delete_concepts_for_video(video_id).await?;
        }
        if segments {
            self.store.delete_by_video(video_id).await?;
        }
        Ok(())
    }
}

// ── Free helpers ───────────────────────────────────────────────────────────

/// Group a flat concept list back into per-group extractions, attaching
/// group texts where known.
fn regroup_concepts(
    concepts: Vec<Concept>,
    video_id: &str,
    group_texts: &HashMap<usize, String>,
) -> Vec<ExtractedConcepts> {
    let mut grouped: HashMap<usize, Vec<Concept>> = HashMap::new();
    for concept in concepts {
        grouped.entry(concept.group_id).or_default().push(concept);
    }

    let mut group_ids: Vec<usize> = grouped.keys().copied().collect();
    group_ids.sort_unstable();

    group_ids
        .into_iter()
        .filter_map(|group_id| grouped.remove(&group_id).map(|concepts| (group_id, concepts)))
        .map(|(group_id, concepts)| {
            let group_text = group_texts.get(&group_id).cloned().unwrap_or_default();
            if group_text.is_empty() {
                warn!("[pipeline] No text available for group {}", group_id);
            }
            ExtractedConcepts {
                video_id: video_id.to_string(),
                group_id,
                group_text,
                concepts,
                mentions: Vec::new(),
                extraction_time: Utc::now(),
                model_used: None,
            }
        })
        .collect()
}

fn fill_score_averages(stats: &mut ConceptStats, extractions: &[ExtractedConcepts]) {
    let all: Vec<&Concept> = extractions.iter().flat_map(|e| e.concepts.iter()).collect();
    if all.is_empty() {
        return;
    }
    stats.avg_importance = all.iter().map(|c| c.importance).sum::<f64>() / all.len() as f64;
    stats.avg_confidence = all.iter().map(|c| c.confidence).sum::<f64>() / all.len() as f64;
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════
