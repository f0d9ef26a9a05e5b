//! Embedding providers.

pub mod hash_fallback;

use bme_core::errors::KernelResult;

pub use hash_fallback::HashFallbackProvider;

/// A concrete embedding backend. Providers return one L2-normalized
/// float32 vector of their declared dimension per input text.
pub trait Provider: Send + Sync {
    fn embed(&self, texts: &[String]) -> KernelResult<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
    fn name(&self) -> &str;
}
