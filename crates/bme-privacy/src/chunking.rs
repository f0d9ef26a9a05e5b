//! Token-window chunking for long content.
//!
//! Whitespace tokens stand in for real tokens. Windows snap to sentence
//! boundaries when one appears in the last 20% of the window, and
//! overlap by a configurable count. Chunking always operates on
//! redacted plaintext, never ciphertext.

use bme_core::config::ChunkingConfig;
use bme_core::memory::Chunk;
use tracing::debug;

/// Splits long memory content into overlapping chunks.
#[derive(Debug, Clone)]
pub struct ChunkingEngine {
    config: ChunkingConfig,
}

impl Default for ChunkingEngine {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

impl ChunkingEngine {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk eligible kinds always, anything else once it is long.
    pub fn should_chunk(&self, kind: &str, text: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        if self.config.chunk_kinds.iter().any(|k| k == kind) {
            return true;
        }
        text.chars().count() > self.config.threshold_chars
    }

    /// Split text into overlapping chunks with contiguous 0-based `seq`
    /// and half-open token offsets.
    pub fn chunk_text(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let tokens: Vec<&str> = text.split_whitespace().collect();
        let target = self.config.target_tokens.max(1);
        let overlap = self.config.overlap_tokens;

        if tokens.len() <= target {
            return vec![Chunk {
                seq: 0,
                token_start: 0,
                token_end: tokens.len(),
                text: text.trim().to_string(),
            }];
        }

        let mut chunks = Vec::new();
        let mut seq = 0usize;
        let mut start = 0usize;

        loop {
            let mut end = (start + target).min(tokens.len());

            // Snap to a sentence boundary in the last 20% of the window,
            // but only mid-document.
            if end < tokens.len() {
                let search_start = start.max(end.saturating_sub(target / 5));
                if let Some(boundary) = find_sentence_boundary(&tokens, search_start, end) {
                    if boundary > start {
                        end = boundary;
                    }
                }
            }

            chunks.push(Chunk {
                seq,
                token_start: start,
                token_end: end,
                text: tokens[start..end].join(" "),
            });

            if end >= tokens.len() {
                break;
            }

            // Overlap, clamped so the window always advances even when
            // overlap >= target.
            start = end.saturating_sub(overlap).max(start + 1).min(end);
            seq += 1;
        }

        debug!(chunks = chunks.len(), tokens = tokens.len(), "chunked text");
        chunks
    }
}

/// Last token in `[start, end)` ending with `.`, `!`, or `?` (runs of
/// terminators count). Returns the index after it.
fn find_sentence_boundary(tokens: &[&str], start: usize, end: usize) -> Option<usize> {
    for i in (start..end).rev() {
        let token = tokens[i];
        let trailing = token
            .chars()
            .rev()
            .take_while(|c| matches!(c, '.' | '!' | '?'))
            .count();
        if trailing > 0 {
            return Some(i + 1);
        }
    }
    None
}
