//! Deterministic extractive summarization.
//!
//! Greedy sentence selection up to a target length, with a truncation
//! fallback for degenerate inputs (one giant sentence, or too little
//! extractable text).

use bme_core::evaluated::{EvaluatedMetadata, SummaryMode};
use tracing::debug;

/// Content shorter than this is never worth summarizing.
const MIN_SUMMARIZABLE_CHARS: usize = 300;
/// Auto-summarize threshold for the eligible kinds.
const LENGTH_THRESHOLD: usize = 1000;
/// Target summary length in characters (~100-150 words).
const TARGET_SUMMARY_LENGTH: usize = 900;
/// An extractive result shorter than this falls back to truncation.
const MIN_RESULT_CHARS: usize = 100;

/// Kinds that are summarized automatically when content is long.
const AUTO_SUMMARIZE_KINDS: [&str; 5] = [
    "conversation.transcript",
    "recording.transcript",
    "article.ingested",
    "code.diff",
    "chat",
];

/// Orchestrates summarization decisions and production.
#[derive(Debug, Clone)]
pub struct SummarizationEngine {
    length_threshold: usize,
    target_length: usize,
}

impl Default for SummarizationEngine {
    fn default() -> Self {
        Self {
            length_threshold: LENGTH_THRESHOLD,
            target_length: TARGET_SUMMARY_LENGTH,
        }
    }
}

impl SummarizationEngine {
    pub fn new(length_threshold: usize, target_length: usize) -> Self {
        Self {
            length_threshold,
            target_length,
        }
    }

    /// Whether this content should be summarized:
    /// never under `full_always`; yes on an explicit `summarize: true`;
    /// yes for the auto-summarize kinds once content is long enough.
    pub fn should_summarize(&self, meta: &EvaluatedMetadata, value: &str, kind: &str) -> bool {
        if meta.summary_mode == SummaryMode::FullAlways {
            return false;
        }

        if meta.summarize {
            return true;
        }

        AUTO_SUMMARIZE_KINDS.contains(&kind) && value.chars().count() > self.length_threshold
    }

    /// Produce a summary at the engine's target length.
    pub fn summarize(&self, value: &str) -> String {
        self.summarize_to(value, self.target_length)
    }

    /// Produce a summary with an explicit target length.
    pub fn summarize_to(&self, value: &str, target: usize) -> String {
        if value.is_empty() || value.chars().count() < MIN_SUMMARIZABLE_CHARS {
            return value.to_string();
        }

        // Greedy sentence extraction: split on a terminator followed by
        // whitespace, append sentences while the budget holds.
        let sentences = split_sentences(value);

        let mut summary = String::new();
        for sentence in &sentences {
            if summary.chars().count() + sentence.chars().count() + 1 > target {
                break;
            }
            summary.push_str(sentence);
            summary.push(' ');
        }

        let mut result = summary.trim().to_string();

        let single_giant_sentence = sentences.len() == 1 && value.chars().count() > target;
        if result.chars().count() < MIN_RESULT_CHARS || single_giant_sentence {
            result = truncate_fallback(value, target);
        }

        debug!(
            from = value.chars().count(),
            to = result.chars().count(),
            "summarized content"
        );
        result
    }
}

/// Split on sentence terminators (`.`, `!`, `?`) followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut prev_was_terminator = false;

    for (idx, ch) in text.char_indices() {
        if prev_was_terminator && ch.is_whitespace() {
            out.push(text[start..idx].trim());
            start = idx;
        }
        prev_was_terminator = matches!(ch, '.' | '!' | '?');
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Truncate at the nearest word boundary inside the target window and
/// append an ellipsis.
fn truncate_fallback(value: &str, target: usize) -> String {
    let snippet: String = value.chars().take(target).collect();
    let snippet = snippet.trim_end();

    let cut = match snippet.rfind(' ') {
        Some(pos) if pos > target / 2 => &snippet[..pos],
        _ => snippet,
    };
    format!("{cut}...")
}
