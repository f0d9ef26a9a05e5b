//! Property tests for normalization and weight invariants.

use std::collections::HashMap;

use bme_retrieval::fusion::{fuse_rrf, min_max_normalize, normalize_ranks};
use bme_retrieval::query_weights::adjust_weights;
use proptest::prelude::*;

proptest! {
    /// Normalized channel scores lie in [0, 1]; all-equal inputs yield
    /// all ones.
    #[test]
    fn min_max_bounds(values in proptest::collection::vec(0.0f64..100.0, 1..40)) {
        let scores: HashMap<i64, f64> = values.iter().enumerate().map(|(i, &v)| (i as i64, v)).collect();
        let norm = min_max_normalize(&scores);
        prop_assert_eq!(norm.len(), scores.len());
        for v in norm.values() {
            prop_assert!((0.0..=1.0).contains(v));
        }
        let first = values[0];
        if values.iter().all(|&v| (v - first).abs() < f64::EPSILON) {
            prop_assert!(norm.values().all(|&v| v == 1.0));
        }
    }

    /// Rank normalization is monotone in list order.
    #[test]
    fn rank_normalization_is_monotone(n in 1usize..50) {
        let ids: Vec<i64> = (0..n as i64).collect();
        let norm = normalize_ranks(&ids);
        for pair in ids.windows(2) {
            prop_assert!(norm[&pair[0]] >= norm[&pair[1]]);
        }
        prop_assert_eq!(norm[&0], 1.0);
    }

    /// After query-aware adjustment the weights sum to 1 and stay in
    /// [0.1, 0.9], for any query and any base weights.
    #[test]
    fn adjusted_weights_stay_normalized(
        query in ".{0,60}",
        w_fts in 0.0f64..2.0,
        w_vec in 0.0f64..2.0,
    ) {
        let (fts, vec) = adjust_weights(&query, w_fts, w_vec);
        prop_assert!((fts + vec - 1.0).abs() < 1e-9);
        prop_assert!((0.1..=0.9).contains(&fts));
        prop_assert!((0.1..=0.9).contains(&vec));
    }

    /// RRF scores are positive and bounded by channel count / k.
    #[test]
    fn rrf_scores_are_bounded(n in 1usize..30, k in 1u32..200) {
        let ids: Vec<i64> = (0..n as i64).collect();
        let fused = fuse_rrf(&ids, &ids, k);
        for score in fused.values() {
            prop_assert!(*score > 0.0);
            prop_assert!(*score <= 2.0 / (k as f64 + 1.0) + 1e-12);
        }
    }
}
