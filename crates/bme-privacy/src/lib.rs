//! # bme-privacy
//!
//! The content transforms the ingest pipeline applies before anything
//! touches disk: regex-driven redaction, deterministic extractive
//! summarization, and token-window chunking of long content. All three
//! operate on plaintext; encryption happens after them.

pub mod chunking;
pub mod redaction;
pub mod summarize;

pub use chunking::ChunkingEngine;
pub use redaction::apply_redaction;
pub use summarize::SummarizationEngine;
