// ── Grouping: Centroid Merge Pass ──────────────────────────────────────────
//
// Single-sweep pass over adjacent group pairs. A pair merges when the
// combined word count stays within 1.25x the cap AND the centroid cosine
// similarity clears the threshold. The pass does not reconsider a merged
// group against its new neighbor.

use log::info;

use crate::atoms::graph_types::{cosine_similarity, SegmentGroup};
use crate::atoms::types::GroupingConfig;

/// Merge adjacent groups with high centroid similarity, then renumber
/// densely and propagate ids to member segments.
pub fn merge_adjacent_groups(
    groups: Vec<SegmentGroup>,
    config: &GroupingConfig,
) -> Vec<SegmentGroup> {
    let word_limit = (config.max_group_words as f64 * 1.25) as usize;
    let mut merged: Vec<SegmentGroup> = Vec::with_capacity(groups.len());
    let mut iter = groups.into_iter().peekable();

    while let Some(mut current) = iter.next() {
        let should_merge = match iter.peek() {
            Some(next) => {
                let combined_words = current.total_words() + next.total_words();
                combined_words <= word_limit
                    && centroid_cosine(&current, next) >= config.merge_centroid_threshold
            }
            None => false,
        };
        if should_merge {
            if let Some(next) = iter.next() {
                current.segments.extend(next.segments);
            }
        }
        merged.push(current);
    }

    // Renumber groups and propagate ids
    for (idx, group) in merged.iter_mut().enumerate() {
        group.group_id = idx;
        for seg in group.segments.iter_mut() {
            seg.group_id = Some(idx);
        }
    }

    info!("[grouping] After merging: {} groups", merged.len());
    merged
}

/// Cosine similarity of two group centroids; 0.0 when either group has no
/// embedded members.
fn centroid_cosine(a: &SegmentGroup, b: &SegmentGroup) -> f64 {
    match (a.centroid_embedding(), b.centroid_embedding()) {
        (Some(ca), Some(cb)) => cosine_similarity(&ca, &cb),
        _ => 0.0,
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════
