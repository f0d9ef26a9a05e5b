//! Read-time policy enforcement.
//!
//! Every candidate id is re-evaluated against the current rules before
//! it may appear in results: `never_store` matches are dropped (they
//! should have no rows at all, but rules change), consent-gated
//! memories are dropped unless a consent record exists, and
//! `context_only` survivors are marked rather than removed.

use std::collections::{HashMap, HashSet};

use bme_core::errors::KernelResult;
use bme_core::evaluated::RecallPolicy;
use bme_rules::MemoryInput;
use bme_storage::fts::FtsHit;
use bme_storage::vector::SearchFilter;
use bme_storage::MemoryStore;
use tracing::debug;

/// Per-memory gate decision.
#[derive(Debug, Clone, Default)]
pub struct GatePolicy {
    pub include: bool,
    pub context_only: bool,
    pub recall_policy: Option<RecallPolicy>,
    pub privacy_class: Option<String>,
    /// Rule-supplied retrieval boost multiplier.
    pub boost: f64,
}

/// The consent gate over one store.
pub struct ConsentGate<'a> {
    store: &'a MemoryStore,
}

impl<'a> ConsentGate<'a> {
    pub fn new(store: &'a MemoryStore) -> Self {
        Self { store }
    }

    /// Evaluate gate policy for a set of candidate ids.
    ///
    /// Ids without a backing row are excluded. `consented` can be
    /// supplied to avoid re-reading the consent table per call.
    pub fn filter_memory_ids(
        &self,
        ids: &[i64],
        consented: Option<&HashSet<i64>>,
    ) -> KernelResult<HashMap<i64, GatePolicy>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let loaded;
        let consented = match consented {
            Some(set) => set,
            None => {
                loaded = self.store.consented_ids()?;
                &loaded
            }
        };

        let records = self.store.load_plaintext_many(ids)?;
        let mut out = HashMap::with_capacity(ids.len());

        for &id in ids {
            let Some(record) = records.get(&id) else {
                out.insert(id, GatePolicy::default());
                continue;
            };

            let input = MemoryInput::new(&record.kind, &record.key, &record.value, &record.ts);
            let evaluated = self.store.rules().evaluate(&input);

            let mut include = true;
            if !evaluated.allow_store {
                include = false;
                debug!(memory_id = id, "excluded: storage no longer allowed by rules");
            }
            if evaluated.requires_consent && !consented.contains(&id) {
                include = false;
                debug!(memory_id = id, "excluded: requires consent without a consent record");
            }
            if evaluated.recall_policy == Some(RecallPolicy::Never) {
                include = false;
                debug!(memory_id = id, "excluded: recall_policy = never");
            }

            out.insert(
                id,
                GatePolicy {
                    include,
                    context_only: evaluated.is_context_only(),
                    recall_policy: evaluated.recall_policy,
                    privacy_class: evaluated.privacy_class.clone(),
                    boost: evaluated.retrieval.boost,
                },
            );
        }

        Ok(out)
    }

    /// Drop non-included FTS hits; survivors keep their rank order.
    pub fn apply_to_fts_results(
        &self,
        hits: Vec<FtsHit>,
        consented: Option<&HashSet<i64>>,
    ) -> KernelResult<Vec<FtsHit>> {
        if hits.is_empty() {
            return Ok(hits);
        }
        let ids: Vec<i64> = hits.iter().map(|h| h.memory_id).collect();
        let policies = self.filter_memory_ids(&ids, consented)?;
        let before = hits.len();
        let filtered: Vec<FtsHit> = hits
            .into_iter()
            .filter(|h| policies.get(&h.memory_id).map(|p| p.include).unwrap_or(false))
            .collect();
        debug!(before, after = filtered.len(), "consent gate (fts)");
        Ok(filtered)
    }

    /// Drop non-included `(memory_id, score)` pairs.
    pub fn apply_to_vector_results(
        &self,
        results: Vec<(i64, f64)>,
        consented: Option<&HashSet<i64>>,
    ) -> KernelResult<Vec<(i64, f64)>> {
        if results.is_empty() {
            return Ok(results);
        }
        let ids: Vec<i64> = results.iter().map(|(id, _)| *id).collect();
        let policies = self.filter_memory_ids(&ids, consented)?;
        let before = results.len();
        let filtered: Vec<(i64, f64)> = results
            .into_iter()
            .filter(|(id, _)| policies.get(id).map(|p| p.include).unwrap_or(false))
            .collect();
        debug!(before, after = filtered.len(), "consent gate (vector)");
        Ok(filtered)
    }

    /// Gated vector search: over-fetch, filter, truncate.
    pub fn gated_vector_search(
        &self,
        qvec: &[f32],
        top_k: usize,
        filter: &SearchFilter<'_>,
    ) -> KernelResult<Vec<(i64, f64)>> {
        let raw = self.store.vector_search(qvec, top_k * 3, filter)?;
        let mut gated = self.apply_to_vector_results(raw, None)?;
        gated.truncate(top_k);
        Ok(gated)
    }
}
