// End-to-end grouping scenarios over synthetic embeddings, exercising the
// pure path: neighborhoods (built locally the way the vector store would
// return them) → boundary detection → group formation → centroid merge.

use uuid::Uuid;

use vidgraph_core::atoms::graph_types::{cosine_similarity, Neighbor, SegmentNode};
use vidgraph_core::atoms::types::GroupingConfig;
use vidgraph_core::engine::grouping::boundary::form_groups;
use vidgraph_core::engine::grouping::merge::merge_adjacent_groups;
use vidgraph_core::engine::grouping::GroupingStats;

/// Build segments 30 seconds apart with the given embeddings (None = the
/// segment has no embedding).
fn make_segments(embeddings: Vec<Option<Vec<f32>>>, words_each: usize) -> Vec<SegmentNode> {
    embeddings
        .into_iter()
        .enumerate()
        .map(|(i, embedding)| SegmentNode {
            id: Uuid::new_v4(),
            video_id: "vid123".to_string(),
            index: i,
            text: format!("spoken content of segment number {}", i),
            start_s: i as f64 * 30.0,
            end_s: i as f64 * 30.0 + 30.0,
            word_count: words_each,
            embedding,
            neighbors: vec![],
            group_id: None,
        })
        .collect()
}

/// Populate neighborhoods the way the k-NN store would: for each embedded
/// segment, the top-k most similar other embedded segments, filtered by the
/// raw-similarity threshold.
fn build_synthetic_neighborhoods(segments: &mut [SegmentNode], config: &GroupingConfig) {
    let snapshot: Vec<(usize, Uuid, f64, f64, Option<Vec<f32>>)> = segments
        .iter()
        .map(|s| (s.index, s.id, s.start_s, s.end_s, s.embedding.clone()))
        .collect();

    for segment in segments.iter_mut() {
        let own = match &segment.embedding {
            Some(e) => e.clone(),
            None => continue,
        };
        let mut scored: Vec<Neighbor> = snapshot
            .iter()
            .filter(|(_, id, _, _, emb)| *id != segment.id && emb.is_some())
            .map(|(index, id, start_s, end_s, emb)| {
                let similarity =
                    cosine_similarity(&own, emb.as_ref().map(|e| e.as_slice()).unwrap_or(&[]));
                Neighbor {
                    segment_id: *id,
                    index: Some(*index),
                    similarity,
                    start_s: *start_s,
                    end_s: *end_s,
                    embedding: emb.clone(),
                }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(config.k_neighbors);
        scored.retain(|n| n.similarity >= config.neighbor_threshold);
        segment.neighbors = scored;
    }
}

/// Two-cluster embedding layout: indices below `shift` point one way,
/// the rest another, with a slight index-distance falloff so nearest
/// neighbors are temporal neighbors (cosine across clusters ~0.3).
fn two_cluster_embeddings(n: usize, shift: usize) -> Vec<Option<Vec<f32>>> {
    (0..n)
        .map(|i| {
            let base: [f32; 2] = if i < shift {
                [1.0, 0.0]
            } else {
                [0.3, (1.0_f32 - 0.09).sqrt()]
            };
            // Tiny per-index rotation keeps neighbor ordering stable
            let jitter = i as f32 * 1e-4;
            Some(vec![base[0] - jitter * base[1], base[1] + jitter * base[0]])
        })
        .collect()
}

#[test]
fn topic_shift_produces_boundary_at_shift_point() {
    let config = GroupingConfig {
        max_group_words: usize::MAX,
        ..GroupingConfig::default()
    };
    let mut segments = make_segments(two_cluster_embeddings(50, 25), 40);
    build_synthetic_neighborhoods(&mut segments, &config);

    let groups = form_groups(segments, &config);
    let groups = merge_adjacent_groups(groups, &config);

    assert_eq!(groups.len(), 2, "one semantic boundary expected");
    assert_eq!(groups[0].segments.len(), 25);
    assert_eq!(groups[1].segments.len(), 25);
    assert_eq!(groups[0].segments.last().map(|s| s.index), Some(24));
    assert_eq!(groups[1].segments.first().map(|s| s.index), Some(25));

    // Both halves are internally cohesive
    for group in &groups {
        assert!(group.avg_internal_similarity() > 0.95);
    }
}

#[test]
fn forced_split_on_word_cap() {
    // Every adjacent pair is cohesive; the only splits come from the cap
    let config = GroupingConfig {
        max_group_words: 50,
        min_group_segments: 1,
        temporal_tau: 1e9,
        ..GroupingConfig::default()
    };
    let embeddings: Vec<Option<Vec<f32>>> = (0..9).map(|_| Some(vec![1.0, 0.0])).collect();
    let mut segments = make_segments(embeddings, 20);
    build_synthetic_neighborhoods(&mut segments, &config);

    let groups = form_groups(segments, &config);
    // A new group starts as soon as cumulative words reach 50 (three
    // 20-word segments -> 60 >= 50)
    assert_eq!(groups.len(), 3);
    for group in &groups {
        assert_eq!(group.segments.len(), 3);
    }

    // The merge pass cannot undo forced splits: any combination exceeds
    // 1.25x the cap
    let merged = merge_adjacent_groups(groups, &config);
    assert_eq!(merged.len(), 3);
}

#[test]
fn missing_embedding_does_not_crash() {
    let config = GroupingConfig {
        max_group_words: usize::MAX,
        ..GroupingConfig::default()
    };
    let mut embeddings = two_cluster_embeddings(20, 20);
    embeddings[10] = None;
    let mut segments = make_segments(embeddings, 30);
    let expected_ids: Vec<Uuid> = segments.iter().map(|s| s.id).collect();
    build_synthetic_neighborhoods(&mut segments, &config);

    let groups = form_groups(segments, &config);
    let groups = merge_adjacent_groups(groups, &config);

    // Every segment, including the unembedded one, lands in exactly one group
    let mut seen: Vec<Uuid> = groups
        .iter()
        .flat_map(|g| g.segments.iter().map(|s| s.id))
        .collect();
    assert_eq!(seen.len(), expected_ids.len());
    seen.sort();
    let mut expected = expected_ids;
    expected.sort();
    assert_eq!(seen, expected);
}

#[test]
fn partition_order_and_word_cap_invariants() {
    let config = GroupingConfig::default();
    let mut segments = make_segments(two_cluster_embeddings(60, 30), 80);
    build_synthetic_neighborhoods(&mut segments, &config);
    let total_segments = segments.len();

    let groups = form_groups(segments, &config);
    let groups = merge_adjacent_groups(groups, &config);

    // Partition: every segment in exactly one group
    assert_eq!(
        groups.iter().map(|g| g.segments.len()).sum::<usize>(),
        total_segments
    );

    // Ordered, non-overlapping intervals with dense ids
    for (expected_id, group) in groups.iter().enumerate() {
        assert_eq!(group.group_id, expected_id);
        assert!(group.segments.iter().all(|s| s.group_id == Some(expected_id)));
    }
    for pair in groups.windows(2) {
        assert!(pair[0].end_time() <= pair[1].start_time() + 1e-9);
    }

    // Adjacent pairs inside a group are cohesive unless the split was
    // forced by the word cap
    for group in &groups {
        let mut words = 0usize;
        for pair in group.segments.windows(2) {
            words += pair[0].word_count;
            let cohesion = pair[0]
                .neighbors
                .iter()
                .find(|n| n.segment_id == pair[1].id)
                .map(|n| n.effective_similarity(pair[0].start_s, config.temporal_tau))
                .unwrap_or(0.0);
            assert!(
                cohesion >= config.adjacent_threshold || words >= config.max_group_words,
                "pair ({}, {}) lacks cohesion without a forced split",
                pair[0].index,
                pair[1].index
            );
        }
    }

    let stats = GroupingStats::from_groups(&groups);
    assert_eq!(stats.total_segments, total_segments);
    assert!(stats.num_groups >= 2);
}

#[test]
fn adjacent_threshold_extremes() {
    // Threshold 0 with an unbounded cap: everything is one group
    let permissive = GroupingConfig {
        adjacent_threshold: 0.0,
        max_group_words: usize::MAX,
        ..GroupingConfig::default()
    };
    let mut segments = make_segments(two_cluster_embeddings(30, 15), 40);
    build_synthetic_neighborhoods(&mut segments, &permissive);
    let groups = form_groups(segments, &permissive);
    assert_eq!(groups.len(), 1);

    // Threshold 1: every segment is its own group (similarities with decay
    // are strictly below 1)
    let strict = GroupingConfig {
        adjacent_threshold: 1.0,
        min_group_segments: 1,
        merge_centroid_threshold: 1.1,
        max_group_words: usize::MAX,
        ..GroupingConfig::default()
    };
    let mut segments = make_segments(two_cluster_embeddings(10, 5), 40);
    build_synthetic_neighborhoods(&mut segments, &strict);
    let groups = form_groups(segments, &strict);
    assert_eq!(groups.len(), 10);
}
