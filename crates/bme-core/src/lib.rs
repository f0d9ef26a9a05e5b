//! # bme-core
//!
//! Foundation crate for the Bartholomew memory engine.
//! Defines the shared types, errors, config structs, capability traits,
//! and the file-watcher primitive used by the hot-reload managers.
//! Every other crate in the workspace depends on this.

pub mod config;
pub mod errors;
pub mod evaluated;
pub mod memory;
pub mod metrics;
pub mod traits;
pub mod watch;

// Re-export the most commonly used types at the crate root.
pub use config::{ChunkingConfig, EmbeddingConfig, HybridRetrievalConfig, IndexingPolicy};
pub use errors::{KernelError, KernelResult};
pub use evaluated::{EmbedMode, EncryptMode, EvaluatedMetadata, FtsIndexMode, RecallPolicy, SummaryMode};
pub use memory::{Chunk, MemoryRecord, RetrievedItem, StoreResult};
