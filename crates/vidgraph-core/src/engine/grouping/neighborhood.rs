// ── Grouping: k-NN Neighborhood Construction ───────────────────────────────
//
// Queries the vector store for each embedded segment's nearest neighbors
// within the same video. Queries run concurrently with a bounded in-flight
// cap; cancellation is checked between batches.

use std::collections::HashMap;

use futures::future::try_join_all;
use log::info;
use uuid::Uuid;

use crate::atoms::constants::MAX_INFLIGHT_KNN;
use crate::atoms::error::EngineResult;
use crate::atoms::graph_types::{Neighbor, SegmentNode};
use crate::atoms::types::GroupingConfig;
use crate::engine::http::CancelToken;
use crate::engine::vectorstore::SegmentStore;

/// Populate each embedded segment's `neighbors` field.
///
/// Fetches k+1 rows per query (the query vector's own row comes back),
/// drops the self row, keeps rows clearing `neighbor_threshold`, and
/// resolves each neighbor's position in the fetched sequence.
pub async fn build_neighborhoods(
    store: &SegmentStore,
    segments: &mut [SegmentNode],
    config: &GroupingConfig,
    cancel: &CancelToken,
) -> EngineResult<()> {
    let index_by_id: HashMap<Uuid, usize> =
        segments.iter().map(|s| (s.id, s.index)).collect();

    let embedded: Vec<(usize, String, Vec<f32>)> = segments
        .iter()
        .enumerate()
        .filter_map(|(pos, s)| {
            s.embedding
                .as_ref()
                .map(|emb| (pos, s.video_id.clone(), emb.clone()))
        })
        .collect();

    info!(
        "[grouping] Building k-NN neighborhoods (k={}) for {} embedded segments",
        config.k_neighbors,
        embedded.len()
    );

    for chunk in embedded.chunks(MAX_INFLIGHT_KNN) {
        cancel.checkpoint("neighborhood construction")?;

        let queries = chunk.iter().map(|(pos, video_id, embedding)| async move {
            store
                .knn(embedding, video_id, config.k_neighbors + 1)
                .await
                .map(|neighbors| (*pos, neighbors))
        });

        for (pos, raw_neighbors) in try_join_all(queries).await? {
            let self_id = segments[pos].id;
            let kept: Vec<Neighbor> = raw_neighbors
                .into_iter()
                .filter(|n| n.segment_id != self_id)
                .filter(|n| n.similarity >= config.neighbor_threshold)
                .map(|mut n| {
                    n.index = index_by_id.get(&n.segment_id).copied();
                    n
                })
                .collect();
            segments[pos].neighbors = kept;
        }
    }

    if !segments.is_empty() {
        let total_neighbors: usize = segments.iter().map(|s| s.neighbors.len()).sum();
        info!(
            "[grouping] Built neighborhoods (avg {:.1} neighbors per segment)",
            total_neighbors as f64 / segments.len() as f64
        );
    }
    Ok(())
}
