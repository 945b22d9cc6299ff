// ── Grouping: Boundary Detection & Group Formation ─────────────────────────
//
// Pure functions over segments with populated neighborhoods. A boundary is
// inserted between adjacent segments when their effective similarity dips
// below the threshold, or when the nascent group's word count crosses the
// hard cap (forced split).

use log::info;

use crate::atoms::graph_types::{SegmentGroup, SegmentNode};
use crate::atoms::types::GroupingConfig;

/// Detect topic boundaries in temporal order.
///
/// Returns the indices that start a new group; index 0 is always present.
pub fn detect_boundaries(segments: &[SegmentNode], config: &GroupingConfig) -> Vec<usize> {
    let mut boundaries = vec![0];
    let mut current_word_count = 0usize;

    for i in 0..segments.len().saturating_sub(1) {
        current_word_count += segments[i].word_count;

        // Cohesion between this segment and the next: the next segment's
        // entry in this segment's neighborhood, decayed to this segment's
        // start time. Absent entry means zero cohesion.
        let next_id = segments[i + 1].id;
        let cohesion = segments[i]
            .neighbors
            .iter()
            .find(|n| n.segment_id == next_id)
            .map(|n| n.effective_similarity(segments[i].start_s, config.temporal_tau))
            .unwrap_or(0.0);

        let should_split =
            cohesion < config.adjacent_threshold || current_word_count >= config.max_group_words;

        if should_split {
            boundaries.push(i + 1);
            current_word_count = 0;
        }
    }

    info!("[grouping] Detected {} boundaries", boundaries.len());
    boundaries
}

/// Convert boundaries into groups with densely assigned ids.
///
/// A group smaller than `min_group_segments` is folded into its predecessor
/// when the combined word count stays within 1.2x the cap; the final group
/// is always accepted as-is.
pub fn form_groups(segments: Vec<SegmentNode>, config: &GroupingConfig) -> Vec<SegmentGroup> {
    if segments.is_empty() {
        return Vec::new();
    }
    let video_id = segments[0].video_id.clone();
    let boundaries = detect_boundaries(&segments, config);

    let mut groups: Vec<SegmentGroup> = Vec::new();
    let mut remaining = segments;

    // Walk boundary windows back-to-front so each group can be split off the
    // tail of the owned vector without reshuffling.
    let mut slices: Vec<Vec<SegmentNode>> = Vec::with_capacity(boundaries.len());
    for window_idx in (0..boundaries.len()).rev() {
        let start = boundaries[window_idx];
        slices.push(remaining.split_off(start));
    }
    slices.reverse();

    let last_window = slices.len() - 1;
    for (window_idx, group_segments) in slices.into_iter().enumerate() {
        if group_segments.is_empty() {
            continue;
        }

        if group_segments.len() < config.min_group_segments && window_idx < last_window {
            // Undersized non-final group: fold into the previous group when
            // the merged size stays within tolerance.
            if let Some(prev) = groups.last_mut() {
                let extra_words: usize = group_segments.iter().map(|s| s.word_count).sum();
                let limit = (config.max_group_words as f64 * 1.2) as usize;
                if prev.total_words() + extra_words <= limit {
                    let prev_id = prev.group_id;
                    for mut seg in group_segments {
                        seg.group_id = Some(prev_id);
                        prev.segments.push(seg);
                    }
                    continue;
                }
            }
        }

        let group_id = groups.len();
        let mut group = SegmentGroup {
            group_id,
            video_id: video_id.clone(),
            segments: group_segments,
        };
        for seg in group.segments.iter_mut() {
            seg.group_id = Some(group_id);
        }
        groups.push(group);
    }

    info!("[grouping] Formed {} initial groups", groups.len());
    groups
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════
