//! Property tests for the chunking engine.

use bme_core::config::ChunkingConfig;
use bme_privacy::ChunkingEngine;
use proptest::prelude::*;

fn engine(target: usize, overlap: usize) -> ChunkingEngine {
    ChunkingEngine::new(ChunkingConfig {
        target_tokens: target,
        overlap_tokens: overlap,
        ..Default::default()
    })
}

proptest! {
    /// Sequence numbers are contiguous from zero, offsets are half-open
    /// and monotone, and the final chunk ends at the token count.
    #[test]
    fn chunks_are_contiguous_and_cover(
        words in 1usize..400,
        target in 4usize..64,
        overlap in 0usize..16,
    ) {
        let text: String = (0..words).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunks = engine(target, overlap).chunk_text(&text);

        prop_assert!(!chunks.is_empty());
        for (i, c) in chunks.iter().enumerate() {
            prop_assert_eq!(c.seq, i);
            prop_assert!(c.token_end > c.token_start);
        }
        prop_assert_eq!(chunks.last().unwrap().token_end, words);
        // Windows move strictly forward.
        for pair in chunks.windows(2) {
            prop_assert!(pair[1].token_start > pair[0].token_start);
            prop_assert!(pair[1].token_end > pair[0].token_end);
        }
    }

    /// Chunk text is exactly the joined token slice.
    #[test]
    fn chunk_text_matches_offsets(words in 1usize..200, target in 4usize..32) {
        let tokens: Vec<String> = (0..words).map(|i| format!("w{i}")).collect();
        let text = tokens.join(" ");
        for chunk in engine(target, 2).chunk_text(&text) {
            prop_assert_eq!(&chunk.text, &tokens[chunk.token_start..chunk.token_end].join(" "));
        }
    }
}
