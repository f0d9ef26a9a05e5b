//! Query-aware fusion weight adjustment.
//!
//! Lexical syntax in the query (quoted phrases, boolean operators,
//! field filters) shifts weight toward FTS; natural-language shape
//! (questions, long unmarked runs) shifts it toward the vector channel.
//! If both or neither signal class fires, the base weights stand. The
//! result is always clamped to [0.1, 0.9] and renormalized to sum 1.

use std::sync::OnceLock;

use regex::Regex;

/// Fixed shift applied when exactly one signal class fires.
const WEIGHT_SHIFT: f64 = 0.15;
const WEIGHT_FLOOR: f64 = 0.1;
const WEIGHT_CEIL: f64 = 0.9;
/// Word count above which an unmarked query reads as natural language.
const LONG_QUERY_WORDS: usize = 6;

const INTERROGATIVES: [&str; 6] = ["who", "what", "when", "where", "why", "how"];

fn field_filter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w+:\w+").unwrap())
}

fn has_lexical_signal(query: &str) -> bool {
    if query.contains('"') || query.contains('\'') {
        return true;
    }
    if query
        .split_whitespace()
        .any(|w| matches!(w, "AND" | "OR" | "NOT"))
    {
        return true;
    }
    field_filter_re().is_match(query)
}

fn has_semantic_signal(query: &str) -> bool {
    let trimmed = query.trim();
    if trimmed.ends_with('?') {
        return true;
    }
    if let Some(first) = trimmed.split_whitespace().next() {
        let first = first.to_ascii_lowercase();
        if INTERROGATIVES.contains(&first.as_str()) {
            return true;
        }
    }
    // A long natural-language run with no lexical markers.
    trimmed.split_whitespace().count() > LONG_QUERY_WORDS && !has_lexical_signal(trimmed)
}

/// Adjust `(w_fts, w_vec)` for the query. Exactly one signal class
/// firing shifts the pair by a fixed increment toward that channel.
pub fn adjust_weights(query: &str, w_fts: f64, w_vec: f64) -> (f64, f64) {
    let lexical = has_lexical_signal(query);
    let semantic = has_semantic_signal(query);

    let (mut fts, mut vec) = (w_fts, w_vec);
    if lexical && !semantic {
        fts += WEIGHT_SHIFT;
        vec -= WEIGHT_SHIFT;
    } else if semantic && !lexical {
        fts -= WEIGHT_SHIFT;
        vec += WEIGHT_SHIFT;
    }

    clamp_and_normalize(fts, vec)
}

/// Clamp both weights to [0.1, 0.9] and renormalize to sum 1.
pub fn clamp_and_normalize(w_fts: f64, w_vec: f64) -> (f64, f64) {
    let fts = w_fts.clamp(WEIGHT_FLOOR, WEIGHT_CEIL);
    let vec = w_vec.clamp(WEIGHT_FLOOR, WEIGHT_CEIL);
    let sum = fts + vec;
    let (fts, vec) = (fts / sum, vec / sum);
    // Renormalization cannot push a weight back out of range because
    // both inputs sit in [0.1, 0.9] and the sum is in [0.2, 1.8].
    (fts, vec)
}
