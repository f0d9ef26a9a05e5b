//! Core record types shared across the ingest and retrieval pipelines.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The canonical memory row. `value` and `summary` may each hold either
/// plaintext or a serialized encryption envelope; readers detect the
/// envelope form and decrypt transparently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Rowid identity.
    pub id: i64,
    /// Free-form kind, e.g. `fact`, `preference`, `conversation.transcript`.
    pub kind: String,
    /// Free-form key; `(kind, key)` is unique.
    pub key: String,
    /// Stored value (plaintext or envelope JSON).
    pub value: String,
    /// Optional stored summary (plaintext or envelope JSON).
    pub summary: Option<String>,
    /// ISO-8601 timestamp, stored as text.
    pub ts: String,
}

impl MemoryRecord {
    /// Parse the ISO-8601 timestamp. Returns `None` on missing/invalid
    /// timestamps so scoring can fall back to a neutral boost.
    pub fn parsed_ts(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.ts)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Which text a stored embedding was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingSource {
    Summary,
    Full,
}

impl EmbeddingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingSource::Summary => "summary",
            EmbeddingSource::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "summary" => Some(EmbeddingSource::Summary),
            "full" => Some(EmbeddingSource::Full),
            _ => None,
        }
    }
}

/// Whether an upsert created a fresh row or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Result of one memory storage operation.
#[derive(Debug, Clone)]
pub struct StoreResult {
    pub memory_id: Option<i64>,
    pub stored: bool,
    /// Vectors computed under an `embed_store = false` policy: returned
    /// to the caller, never persisted.
    pub ephemeral_embeddings: Vec<(EmbeddingSource, Vec<f32>)>,
    pub outcome: UpsertOutcome,
}

impl StoreResult {
    /// A result for a write the policy refused.
    pub fn not_stored() -> Self {
        Self {
            memory_id: None,
            stored: false,
            ephemeral_embeddings: Vec::new(),
            outcome: UpsertOutcome::Created,
        }
    }
}

/// An ordered slice of redacted plaintext for long content.
/// Token offsets are half-open over the whitespace tokenization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub seq: usize,
    pub token_start: usize,
    pub token_end: usize,
    pub text: String,
}

/// Per-result score breakdown, populated when debug tracing is enabled.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResultFeatures {
    pub bm25_norm: f64,
    pub vec_norm: f64,
    pub recency: f64,
    pub kind_boost: f64,
    pub final_score: f64,
}

/// One hybrid-retrieval hit.
#[derive(Debug, Clone)]
pub struct RetrievedItem {
    pub memory_id: i64,
    pub score: f64,
    pub snippet: String,
    pub kind: Option<String>,
    pub recall_policy: Option<crate::evaluated::RecallPolicy>,
    pub context_only: bool,
    pub policy_flags: BTreeSet<String>,
    pub features: Option<ResultFeatures>,
}
