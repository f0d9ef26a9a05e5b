//! Score normalization and the two fusion strategies.

use std::collections::HashMap;

/// Min-max scale values to [0, 1] over the given map. All-equal inputs
/// (including a single candidate) map to all 1.0.
pub fn min_max_normalize(scores: &HashMap<i64, f64>) -> HashMap<i64, f64> {
    if scores.is_empty() {
        return HashMap::new();
    }
    let min = scores.values().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.values().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    scores
        .iter()
        .map(|(&id, &v)| {
            let norm = if range > 0.0 { (v - min) / range } else { 1.0 };
            (id, norm)
        })
        .collect()
}

/// Rank-derived scores for an ordered candidate list: position 0 is
/// best. Inverted so that higher is better, then min-max scaled.
pub fn normalize_ranks(ordered_ids: &[i64]) -> HashMap<i64, f64> {
    let raw: HashMap<i64, f64> = ordered_ids
        .iter()
        .enumerate()
        .map(|(pos, &id)| (id, -(pos as f64)))
        .collect();
    min_max_normalize(&raw)
}

/// Weighted-average fusion; an id missing from a channel contributes 0
/// from that channel.
pub fn fuse_weighted(
    fts: &HashMap<i64, f64>,
    vec: &HashMap<i64, f64>,
    w_fts: f64,
    w_vec: f64,
) -> HashMap<i64, f64> {
    let mut out: HashMap<i64, f64> = HashMap::new();
    for (&id, &score) in fts {
        *out.entry(id).or_default() += w_fts * score;
    }
    for (&id, &score) in vec {
        *out.entry(id).or_default() += w_vec * score;
    }
    out
}

/// Reciprocal Rank Fusion: `Σ 1/(k + rank)` over the channels an id
/// appears in, with 1-based ranks.
pub fn fuse_rrf(fts_order: &[i64], vec_order: &[i64], k: u32) -> HashMap<i64, f64> {
    let mut out: HashMap<i64, f64> = HashMap::new();
    for (pos, &id) in fts_order.iter().enumerate() {
        *out.entry(id).or_default() += 1.0 / (k as f64 + (pos + 1) as f64);
    }
    for (pos, &id) in vec_order.iter().enumerate() {
        *out.entry(id).or_default() += 1.0 / (k as f64 + (pos + 1) as f64);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_spans_unit_interval() {
        let scores = HashMap::from([(1, 0.2), (2, 0.6), (3, 1.0)]);
        let norm = min_max_normalize(&scores);
        assert_eq!(norm[&1], 0.0);
        assert!((norm[&2] - 0.5).abs() < 1e-9);
        assert_eq!(norm[&3], 1.0);
    }

    #[test]
    fn all_equal_normalizes_to_ones() {
        let scores = HashMap::from([(1, 0.4), (2, 0.4)]);
        let norm = min_max_normalize(&scores);
        assert!(norm.values().all(|&v| v == 1.0));
    }

    #[test]
    fn rank_normalization_is_order_preserving() {
        let norm = normalize_ranks(&[7, 3, 9]);
        assert_eq!(norm[&7], 1.0);
        assert!((norm[&3] - 0.5).abs() < 1e-9);
        assert_eq!(norm[&9], 0.0);
    }

    #[test]
    fn single_candidate_rank_is_one() {
        let norm = normalize_ranks(&[42]);
        assert_eq!(norm[&42], 1.0);
    }

    #[test]
    fn weighted_fusion_counts_missing_channels_as_zero() {
        let fts = HashMap::from([(1, 1.0)]);
        let vec = HashMap::from([(2, 1.0)]);
        let fused = fuse_weighted(&fts, &vec, 0.6, 0.4);
        assert!((fused[&1] - 0.6).abs() < 1e-9);
        assert!((fused[&2] - 0.4).abs() < 1e-9);
    }

    #[test]
    fn rrf_rewards_presence_in_both_channels() {
        let fused = fuse_rrf(&[1, 2], &[1], 60);
        // id 1: 1/61 + 1/61; id 2: 1/62.
        assert!((fused[&1] - 2.0 / 61.0).abs() < 1e-12);
        assert!((fused[&2] - 1.0 / 62.0).abs() < 1e-12);
        assert!(fused[&1] > fused[&2]);
    }
}
