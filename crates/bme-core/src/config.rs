//! Shared configuration structs.
//!
//! These are mutated in place by the config managers (hot reload) and
//! snapshotted by readers at the top of each operation, so an in-flight
//! retrieval sees one consistent view.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How FTS and vector candidate lists are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    #[default]
    Weighted,
    Rrf,
}

/// Retrieval tuning, loaded from `kernel.yaml` `retrieval.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridRetrievalConfig {
    /// Candidate pool size for the FTS pull.
    pub fts_candidates: usize,
    /// Candidate pool size for the vector pull.
    pub vec_candidates: usize,
    /// Default result count when the caller does not specify one.
    pub default_top_k: usize,
    pub fusion_mode: FusionMode,
    pub weight_fts: f64,
    pub weight_vec: f64,
    /// RRF smoothing constant.
    pub rrf_k: u32,
    /// Recency half-life; `0.0` disables the recency boost.
    pub half_life_hours: f64,
    /// Per-kind score multipliers; unknown kinds get 1.0.
    pub kind_boosts: HashMap<String, f64>,
    /// Adapt fusion weights to query syntax when no caller override.
    pub query_aware: bool,
    pub fts_tokenizer: String,
}

impl Default for HybridRetrievalConfig {
    fn default() -> Self {
        Self {
            fts_candidates: 200,
            vec_candidates: 200,
            default_top_k: 20,
            fusion_mode: FusionMode::Weighted,
            weight_fts: 0.6,
            weight_vec: 0.4,
            rrf_k: 60,
            half_life_hours: 7.0 * 24.0,
            kind_boosts: HashMap::new(),
            query_aware: true,
            fts_tokenizer: "porter".to_string(),
        }
    }
}

impl HybridRetrievalConfig {
    /// Renormalize fusion weights to sum to 1. A non-positive sum
    /// resets both to 0.5.
    pub fn normalize_weights(&mut self) {
        let sum = self.weight_fts + self.weight_vec;
        if sum > 0.0 {
            self.weight_fts /= sum;
            self.weight_vec /= sum;
        } else {
            self.weight_fts = 0.5;
            self.weight_vec = 0.5;
        }
    }
}

/// Chunking tuning, loaded from `kernel.yaml` `chunking.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub enabled: bool,
    /// Window size in whitespace tokens.
    pub target_tokens: usize,
    pub overlap_tokens: usize,
    /// Content longer than this is chunked regardless of kind.
    pub threshold_chars: usize,
    /// Kinds that are always chunked.
    pub chunk_kinds: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_tokens: 640,
            overlap_tokens: 64,
            threshold_chars: 2000,
            chunk_kinds: vec![
                "conversation.transcript".to_string(),
                "recording.transcript".to_string(),
                "article.ingested".to_string(),
                "code.diff".to_string(),
            ],
        }
    }
}

/// Embedding provider selection, loaded from `embeddings.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub dim: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local-sbert".to_string(),
            model: "BAAI/bge-small-en-v1.5".to_string(),
            dim: 384,
        }
    }
}

/// Global indexing policy, loaded from `policy.yaml`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingPolicy {
    /// When true, memories whose evaluated encryption strength is
    /// `strong` are excluded from FTS and vector indexes.
    pub disallow_strong_only: bool,
}

/// Whether embeddings are globally enabled (`BARTHO_EMBED_ENABLED=1`).
pub fn embeddings_enabled() -> bool {
    std::env::var("BARTHO_EMBED_ENABLED").map(|v| v == "1").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_normalization_sums_to_one() {
        let mut cfg = HybridRetrievalConfig {
            weight_fts: 3.0,
            weight_vec: 1.0,
            ..Default::default()
        };
        cfg.normalize_weights();
        assert!((cfg.weight_fts + cfg.weight_vec - 1.0).abs() < 1e-9);
        assert!((cfg.weight_fts - 0.75).abs() < 1e-9);
    }

    #[test]
    fn zero_weights_reset_to_even_split() {
        let mut cfg = HybridRetrievalConfig {
            weight_fts: 0.0,
            weight_vec: 0.0,
            ..Default::default()
        };
        cfg.normalize_weights();
        assert_eq!(cfg.weight_fts, 0.5);
        assert_eq!(cfg.weight_vec, 0.5);
    }
}
