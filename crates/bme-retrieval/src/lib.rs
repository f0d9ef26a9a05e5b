//! # bme-retrieval
//!
//! The read side of the engine: a consent gate that re-evaluates
//! governance rules at retrieval time, and a hybrid retriever that
//! fuses FTS and vector candidates with recency/kind/rule boosts under
//! hot-reloadable tuning.

pub mod boosts;
pub mod config;
pub mod consent_gate;
pub mod fusion;
pub mod hybrid;
pub mod query_weights;

pub use config::RetrievalConfigManager;
pub use consent_gate::{ConsentGate, GatePolicy};
pub use hybrid::{HybridRetriever, RetrievalDebug};
