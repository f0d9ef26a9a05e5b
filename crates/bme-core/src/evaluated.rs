//! Evaluated metadata: the policy record the rules engine produces for
//! one memory input.
//!
//! Encoded as a struct with typed fields for every known policy
//! dimension plus a catch-all map for unknown keys, so user rule files
//! can carry fields this build does not know about yet.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Encryption demanded by policy. YAML accepts `false`, `true`
/// (≡ standard), `"standard"`, `"strong"`, and the legacy spellings
/// `"yes"`/`"true"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptMode {
    #[default]
    None,
    Standard,
    Strong,
}

impl<'de> Deserialize<'de> for EncryptMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        Ok(match v {
            Value::Bool(true) => EncryptMode::Standard,
            Value::Bool(false) | Value::Null => EncryptMode::None,
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "standard" | "yes" | "true" => EncryptMode::Standard,
                "strong" => EncryptMode::Strong,
                _ => EncryptMode::None,
            },
            _ => EncryptMode::None,
        })
    }
}

/// How summarization interacts with the stored value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMode {
    /// Only the summary is stored; the original value is discarded.
    SummaryOnly,
    /// Both the value and a separate summary are stored.
    #[default]
    SummaryAlso,
    /// Never summarize.
    FullAlways,
}

/// Which texts get embedded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedMode {
    None,
    #[default]
    Summary,
    Full,
    Both,
}

/// What the FTS row may contain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FtsIndexMode {
    /// Index the summary when one exists, else the redacted value.
    #[default]
    SummaryPreferred,
    /// Always index the redacted value.
    RedactedOnly,
}

/// Per-memory directive governing whether a hit may be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallPolicy {
    ContextOnly,
    Always,
    Never,
}

impl RecallPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecallPolicy::ContextOnly => "context_only",
            RecallPolicy::Always => "always",
            RecallPolicy::Never => "never",
        }
    }
}

/// Retrieval-specific rule metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalMeta {
    #[serde(default = "default_boost")]
    pub boost: f64,
}

impl Default for RetrievalMeta {
    fn default() -> Self {
        Self { boost: 1.0 }
    }
}

fn default_boost() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// Output of rule evaluation for one memory.
///
/// Fields the pipeline consumes downstream are typed; anything else a
/// rule file supplies lands in `extra` untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatedMetadata {
    pub allow_store: bool,
    pub requires_consent: bool,

    pub redact: bool,
    pub redact_strategy: Option<String>,
    /// Regex the matched rule carried; redaction reuses it.
    pub content: Option<String>,

    pub encrypt: EncryptMode,

    pub summarize: bool,
    pub summary_mode: SummaryMode,

    pub embed: EmbedMode,
    /// `None` means "not set by any rule"; the engine fills the default.
    pub embed_store: Option<bool>,

    #[serde(default = "default_true")]
    pub fts_index: bool,
    pub fts_index_mode: Option<FtsIndexMode>,

    pub recall_policy: Option<RecallPolicy>,
    pub privacy_class: Option<String>,
    /// Duration string such as `"30d"` or `"12h"`; drives the retention sweep.
    pub expires_in: Option<String>,

    pub retrieval: RetrievalMeta,

    /// Unknown keys from user rule files, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,

    /// Categories that matched, in priority order (observability).
    #[serde(skip)]
    pub matched_categories: Vec<String>,
    /// `(category, match clause)` pairs for every matched rule.
    #[serde(skip)]
    pub matched_rules: Vec<(String, Value)>,
}

impl Default for EvaluatedMetadata {
    fn default() -> Self {
        Self {
            allow_store: true,
            requires_consent: false,
            redact: false,
            redact_strategy: None,
            content: None,
            encrypt: EncryptMode::None,
            summarize: false,
            summary_mode: SummaryMode::default(),
            embed: EmbedMode::default(),
            embed_store: None,
            fts_index: true,
            fts_index_mode: None,
            recall_policy: None,
            privacy_class: None,
            expires_in: None,
            retrieval: RetrievalMeta::default(),
            extra: serde_json::Map::new(),
            matched_categories: Vec::new(),
            matched_rules: Vec::new(),
        }
    }
}

impl EvaluatedMetadata {
    /// Whether redaction applies: an explicit strategy, or the `redact`
    /// flag (which defaults the strategy to `mask` during evaluation).
    pub fn wants_redaction(&self) -> bool {
        self.redact_strategy.is_some()
    }

    /// Whether this memory's recall policy marks it context-only.
    pub fn is_context_only(&self) -> bool {
        self.recall_policy == Some(RecallPolicy::ContextOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_mode_accepts_bool_and_strings() {
        let m: EvaluatedMetadata = serde_json::from_value(serde_json::json!({
            "encrypt": true
        }))
        .unwrap();
        assert_eq!(m.encrypt, EncryptMode::Standard);

        let m: EvaluatedMetadata = serde_json::from_value(serde_json::json!({
            "encrypt": "strong"
        }))
        .unwrap();
        assert_eq!(m.encrypt, EncryptMode::Strong);

        let m: EvaluatedMetadata = serde_json::from_value(serde_json::json!({
            "encrypt": false
        }))
        .unwrap();
        assert_eq!(m.encrypt, EncryptMode::None);
    }

    #[test]
    fn unknown_keys_land_in_extra() {
        let m: EvaluatedMetadata = serde_json::from_value(serde_json::json!({
            "allow_store": true,
            "custom_dimension": {"nested": 1}
        }))
        .unwrap();
        assert!(m.extra.contains_key("custom_dimension"));
    }

    #[test]
    fn defaults_are_permissive() {
        let m = EvaluatedMetadata::default();
        assert!(m.allow_store);
        assert!(!m.requires_consent);
        assert!(m.fts_index);
        assert_eq!(m.embed, EmbedMode::Summary);
        assert!((m.retrieval.boost - 1.0).abs() < f64::EPSILON);
    }
}
