//! # bme-rules
//!
//! Rule-based memory governance: loads `memory_rules.yaml`, evaluates a
//! memory against five priority-ordered rule categories, and produces
//! the evaluated-metadata record the rest of the pipeline consumes.
//! The backing file is hot-reloaded on change.

pub mod engine;
pub mod policy;
pub mod rule;

pub use engine::{MemoryInput, RulesEngine};
pub use policy::PolicyManager;
pub use rule::{MemoryRule, RuleMatch};
