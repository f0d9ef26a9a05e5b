//! The hybrid retriever: dual candidate pulls, consent filtering,
//! normalization, boosting, fusion, deterministic ranking, snippets,
//! and an opt-in debug trace.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use bme_core::config::{FusionMode, HybridRetrievalConfig};
use bme_core::errors::KernelResult;
use bme_core::memory::{MemoryRecord, ResultFeatures, RetrievedItem};
use bme_core::metrics::metrics;
use bme_core::traits::EmbeddingBackend;
use bme_storage::vector::SearchFilter;
use bme_storage::MemoryStore;
use chrono::Utc;
use tracing::{debug, error, info};

use crate::boosts::{kind_boost, recency_boost, recency_epoch};
use crate::consent_gate::{ConsentGate, GatePolicy};
use crate::fusion::{fuse_rrf, fuse_weighted, min_max_normalize, normalize_ranks};
use crate::query_weights;

const SNIPPET_CHARS: usize = 200;

/// Timings and per-result features from the last retrieval.
#[derive(Debug, Clone, Default)]
pub struct RetrievalDebug {
    pub fusion_mode: FusionMode,
    /// `(w_fts, w_vec)` actually used; `None` under RRF.
    pub weights_used: Option<(f64, f64)>,
    pub fts_ms: f64,
    pub vec_ms: f64,
    pub fusion_ms: f64,
    /// Feature breakdown per returned result, rank order.
    pub per_result: Vec<(i64, ResultFeatures)>,
}

/// Privacy-aware hybrid retrieval over one store.
pub struct HybridRetriever {
    store: Arc<MemoryStore>,
    config: Arc<RwLock<HybridRetrievalConfig>>,
    debug_enabled: AtomicBool,
    last_debug: Mutex<Option<RetrievalDebug>>,
    fts_missing_logged: AtomicBool,
}

impl HybridRetriever {
    /// A retriever with its own (non-reloading) config.
    pub fn new(store: Arc<MemoryStore>, config: HybridRetrievalConfig) -> Self {
        Self::with_shared_config(store, Arc::new(RwLock::new(config)))
    }

    /// A retriever observing a shared config owned by a config manager;
    /// hot reloads become visible at the next retrieval.
    pub fn with_shared_config(
        store: Arc<MemoryStore>,
        config: Arc<RwLock<HybridRetrievalConfig>>,
    ) -> Self {
        Self {
            store,
            config,
            debug_enabled: AtomicBool::new(false),
            last_debug: Mutex::new(None),
            fts_missing_logged: AtomicBool::new(false),
        }
    }

    /// Record timings and per-result features on every retrieval.
    pub fn set_debug(&self, enabled: bool) {
        self.debug_enabled.store(enabled, Ordering::SeqCst);
    }

    /// The trace from the most recent retrieval, if debug is on.
    pub fn last_debug(&self) -> Option<RetrievalDebug> {
        self.last_debug.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run the full hybrid pipeline. `use_rrf` overrides the configured
    /// fusion strategy for this call only.
    pub fn retrieve(
        &self,
        query: &str,
        top_k: Option<usize>,
        use_rrf: Option<bool>,
    ) -> KernelResult<Vec<RetrievedItem>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        // Snapshot the config so one retrieval sees one consistent view
        // even while the manager hot-reloads underneath.
        let cfg = self
            .config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let top_k = top_k.unwrap_or(cfg.default_top_k);
        let now = Utc::now();

        // FTS candidate pull. An absent FTS5 module downgrades the
        // lexical channel to empty, once, with a log.
        let fts_start = Instant::now();
        let fts_hits = if cfg.fts_candidates > 0 {
            if !self.store.fts_available() {
                if !self.fts_missing_logged.swap(true, Ordering::SeqCst) {
                    info!("FTS5 unavailable; hybrid retrieval continues vector-only");
                }
                Vec::new()
            } else {
                self.store.fts_search(query, cfg.fts_candidates)?
            }
        } else {
            Vec::new()
        };
        let fts_ms = fts_start.elapsed().as_secs_f64() * 1000.0;

        // Vector candidate pull with strict provider/model/dim matching.
        let vec_start = Instant::now();
        let vec_hits: Vec<(i64, f64)> = match (self.store.embedder(), cfg.vec_candidates) {
            (Some(embedder), candidates) if candidates > 0 => {
                match embedder.embed_texts(&[query.to_string()]) {
                    Ok(mut vecs) if !vecs.is_empty() => {
                        let qvec = vecs.remove(0);
                        let emb_cfg = embedder.config();
                        self.store.vector_search(
                            &qvec,
                            candidates,
                            &SearchFilter {
                                provider: Some(&emb_cfg.provider),
                                model: Some(&emb_cfg.model),
                                dim: Some(emb_cfg.dim),
                                source: None,
                                allow_mismatch: false,
                            },
                        )?
                    }
                    Ok(_) => Vec::new(),
                    Err(e) => {
                        error!("failed to embed query: {e}");
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };
        let vec_ms = vec_start.elapsed().as_secs_f64() * 1000.0;

        // Consent filter; the union of survivors is the eligible set.
        let gate = ConsentGate::new(&self.store);
        let mut all_ids: Vec<i64> = fts_hits.iter().map(|h| h.memory_id).collect();
        all_ids.extend(vec_hits.iter().map(|(id, _)| *id));
        all_ids.sort_unstable();
        all_ids.dedup();
        let policies = gate.filter_memory_ids(&all_ids, None)?;

        let fts_order: Vec<i64> = fts_hits
            .iter()
            .map(|h| h.memory_id)
            .filter(|id| policies.get(id).map(|p| p.include).unwrap_or(false))
            .collect();
        let vec_eligible: HashMap<i64, f64> = vec_hits
            .iter()
            .filter(|(id, _)| policies.get(id).map(|p| p.include).unwrap_or(false))
            .map(|&(id, score)| (id, score))
            .collect();
        let vec_order: Vec<i64> = {
            let mut ordered: Vec<(i64, f64)> = vec_hits
                .iter()
                .filter(|(id, _)| vec_eligible.contains_key(id))
                .cloned()
                .collect();
            ordered.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            ordered.into_iter().map(|(id, _)| id).collect()
        };

        let eligible: Vec<i64> = {
            let mut ids: Vec<i64> = fts_order.iter().chain(vec_order.iter()).copied().collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        if eligible.is_empty() {
            self.store_debug(RetrievalDebug {
                fusion_mode: cfg.fusion_mode,
                weights_used: None,
                fts_ms,
                vec_ms,
                fusion_ms: 0.0,
                per_result: Vec::new(),
            });
            return Ok(Vec::new());
        }

        let records = self.store.load_plaintext_many(&eligible)?;

        // Normalize each channel over the eligible set, then boost.
        let fusion_start = Instant::now();
        let fts_norm = normalize_ranks(&fts_order);
        let vec_norm = min_max_normalize(&vec_eligible);

        let mut recency: HashMap<i64, f64> = HashMap::new();
        let mut kind_mult: HashMap<i64, f64> = HashMap::new();
        let mut boost: HashMap<i64, f64> = HashMap::new();
        for &id in &eligible {
            let record = records.get(&id);
            let ts = record.map(|r| r.ts.as_str());
            let kind = record.map(|r| r.kind.as_str()).unwrap_or_default();
            let r = recency_boost(ts, cfg.half_life_hours, now);
            let k = kind_boost(&cfg.kind_boosts, kind);
            let rule = policies.get(&id).map(|p| p.boost).unwrap_or(1.0);
            recency.insert(id, r);
            kind_mult.insert(id, k);
            boost.insert(id, r * k * rule);
        }

        // Fuse.
        let mode = match use_rrf {
            Some(true) => FusionMode::Rrf,
            Some(false) => FusionMode::Weighted,
            None => cfg.fusion_mode,
        };
        let mut weights_used = None;
        let fused: HashMap<i64, f64> = match mode {
            FusionMode::Weighted => {
                let (w_fts, w_vec) = if cfg.query_aware && use_rrf.is_none() {
                    query_weights::adjust_weights(query, cfg.weight_fts, cfg.weight_vec)
                } else {
                    query_weights::clamp_and_normalize(cfg.weight_fts, cfg.weight_vec)
                };
                weights_used = Some((w_fts, w_vec));
                let boosted_fts: HashMap<i64, f64> = fts_norm
                    .iter()
                    .map(|(&id, &v)| (id, v * boost.get(&id).copied().unwrap_or(1.0)))
                    .collect();
                let boosted_vec: HashMap<i64, f64> = vec_norm
                    .iter()
                    .map(|(&id, &v)| (id, v * boost.get(&id).copied().unwrap_or(1.0)))
                    .collect();
                fuse_weighted(&boosted_fts, &boosted_vec, w_fts, w_vec)
            }
            FusionMode::Rrf => {
                // Boost multipliers apply after the RRF summation.
                fuse_rrf(&fts_order, &vec_order, cfg.rrf_k)
                    .into_iter()
                    .map(|(id, score)| (id, score * boost.get(&id).copied().unwrap_or(1.0)))
                    .collect()
            }
        };

        // Deterministic ranking: score desc, recency desc, id asc.
        let mut ranked: Vec<(i64, f64)> = fused.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ea = records.get(&a.0).map(|r| recency_epoch(Some(&r.ts)));
                    let eb = records.get(&b.0).map(|r| recency_epoch(Some(&r.ts)));
                    eb.cmp(&ea)
                })
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);
        let fusion_ms = fusion_start.elapsed().as_secs_f64() * 1000.0;

        // Materialize results.
        let mut items = Vec::with_capacity(ranked.len());
        let mut per_result = Vec::new();
        for (id, score) in &ranked {
            let record = records.get(id);
            let policy = policies.get(id).cloned().unwrap_or_default();
            let snippet = self.build_snippet(*id, query, record);

            let mut policy_flags = BTreeSet::new();
            if policy.context_only {
                policy_flags.insert("context_only".to_string());
            }

            let features = ResultFeatures {
                bm25_norm: fts_norm.get(id).copied().unwrap_or(0.0),
                vec_norm: vec_norm.get(id).copied().unwrap_or(0.0),
                recency: recency.get(id).copied().unwrap_or(1.0),
                kind_boost: kind_mult.get(id).copied().unwrap_or(1.0),
                final_score: *score,
            };
            let debug_on = self.debug_enabled.load(Ordering::SeqCst);
            if debug_on {
                per_result.push((*id, features));
            }

            items.push(RetrievedItem {
                memory_id: *id,
                score: *score,
                snippet,
                kind: record.map(|r| r.kind.clone()),
                recall_policy: policy.recall_policy,
                context_only: policy.context_only,
                policy_flags,
                features: debug_on.then_some(features),
            });
        }

        self.store_debug(RetrievalDebug {
            fusion_mode: mode,
            weights_used,
            fts_ms,
            vec_ms,
            fusion_ms,
            per_result,
        });

        debug!(
            query,
            candidates = eligible.len(),
            returned = items.len(),
            ?mode,
            "hybrid retrieval complete"
        );
        let m = metrics();
        m.inc(&m.retrievals);
        Ok(items)
    }

    fn build_snippet(&self, id: i64, query: &str, record: Option<&MemoryRecord>) -> String {
        if let Some(snippet) = self.store.fts_snippet(id, query) {
            return snippet;
        }
        // Fallback: an excerpt of the summary, else the value.
        let Some(record) = record else {
            return String::new();
        };
        let text = record.summary.as_deref().unwrap_or(&record.value);
        html_escape(&excerpt(text, SNIPPET_CHARS))
    }

    fn store_debug(&self, dbg: RetrievalDebug) {
        if self.debug_enabled.load(Ordering::SeqCst) {
            *self.last_debug.lock().unwrap_or_else(|e| e.into_inner()) = Some(dbg);
        }
    }
}

/// Truncate at a word boundary with an ellipsis.
fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    let cut = match truncated.rfind(' ') {
        Some(pos) if pos > max_chars / 2 => &truncated[..pos],
        _ => truncated.as_str(),
    };
    format!("{cut}...")
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_cuts_on_word_boundary() {
        let text = "alpha beta gamma delta epsilon zeta";
        let e = excerpt(text, 20);
        assert!(e.ends_with("..."));
        assert!(!e.contains("epsilon"));
        assert!(e.len() <= 23);
    }

    #[test]
    fn excerpt_keeps_short_text() {
        assert_eq!(excerpt("short", 200), "short");
    }

    #[test]
    fn html_is_escaped() {
        assert_eq!(html_escape("<b>&"), "&lt;b&gt;&amp;");
    }
}
