//! Regex-driven masking, removal, and replacement of sensitive spans.
//!
//! Failure modes are deliberately soft: an invalid pattern, unknown
//! strategy, or missing pattern returns the input unchanged and logs.
//! Redaction must never make an ingest fail.

use bme_core::evaluated::EvaluatedMetadata;
use regex::RegexBuilder;
use tracing::{error, warn};

const MASK: &str = "****";

fn compile(pattern: &str) -> Option<regex::Regex> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(e) => {
            error!(pattern = %pattern, "invalid redaction pattern: {e}");
            None
        }
    }
}

/// Replace matches with `****`.
pub fn mask_sensitive(text: &str, pattern: &str) -> String {
    match compile(pattern) {
        Some(re) => re.replace_all(text, MASK).into_owned(),
        None => text.to_string(),
    }
}

/// Delete matches entirely.
pub fn remove_sensitive(text: &str, pattern: &str) -> String {
    match compile(pattern) {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// Replace matches with a caller-supplied literal.
pub fn replace_sensitive(text: &str, pattern: &str, replacement: &str) -> String {
    match compile(pattern) {
        // The literal must not be interpreted as a capture-group template.
        Some(re) => re
            .replace_all(text, regex::NoExpand(replacement))
            .into_owned(),
        None => text.to_string(),
    }
}

/// Apply the rule-selected redaction strategy to `text`.
///
/// Strategies: `mask`, `remove`, `replace:<literal>`. The pattern comes
/// from the evaluated metadata's `content` field.
pub fn apply_redaction(text: &str, evaluated: &EvaluatedMetadata) -> String {
    let Some(pattern) = evaluated.content.as_deref() else {
        return text.to_string();
    };

    let strategy = evaluated.redact_strategy.as_deref().unwrap_or("mask");

    if strategy == "mask" {
        mask_sensitive(text, pattern)
    } else if strategy == "remove" {
        remove_sensitive(text, pattern)
    } else if let Some(replacement) = strategy.strip_prefix("replace:") {
        replace_sensitive(text, pattern, replacement)
    } else {
        warn!(strategy = %strategy, "unknown redaction strategy, returning original text");
        text.to_string()
    }
}
