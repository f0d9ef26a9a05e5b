//! # bme-storage
//!
//! The durable substrate: a single SQLite database in WAL mode holding
//! memories, their sanitized FTS index, chunks, embeddings, and consent
//! records. [`MemoryStore`] orchestrates the whole
//! redact → summarize → encrypt → index → embed ingest pipeline inside
//! one write transaction per upsert.

pub mod backfill;
pub mod chunks;
pub mod consent;
pub mod fts;
pub mod migrations;
pub mod pool;
pub mod queries;
pub mod store;
pub mod vector;

pub use backfill::{run_backfill, BackfillOptions, BackfillStats};
pub use consent::StdinConsent;
pub use pool::ConnectionPool;
pub use store::MemoryStore;
pub use vector::VectorStore;

pub(crate) use bme_core::errors::to_storage_err;
