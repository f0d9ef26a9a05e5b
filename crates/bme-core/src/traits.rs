//! Capability traits at the crate seams.

use crate::config::EmbeddingConfig;
use crate::errors::KernelResult;

/// A pluggable embedder. The engine treats embedding as a capability:
/// the storage pipeline and the retriever only see this trait.
///
/// Implementations must return L2-normalized float32 vectors of the
/// configured dimension, one per input text.
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a batch of texts. Returns one vector per input.
    fn embed_texts(&self, texts: &[String]) -> KernelResult<Vec<Vec<f32>>>;

    /// The provider/model/dim tuple vectors are tagged with.
    fn config(&self) -> EmbeddingConfig;
}

/// Asks the user whether a consent-gated memory may be stored.
///
/// The default deployment blocks on a terminal prompt; headless
/// deployments plug in an IPC bridge or auto-deny.
pub trait ConsentProvider: Send + Sync {
    /// Return true if the user grants storage for the given memory.
    fn request_consent(&self, kind: &str, key: &str, preview: &str) -> bool;
}

/// Denies every consent request. The safe default for headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoDeny;

impl ConsentProvider for AutoDeny {
    fn request_consent(&self, _kind: &str, _key: &str, _preview: &str) -> bool {
        false
    }
}

/// Grants every consent request. For tests and trusted pipelines.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoGrant;

impl ConsentProvider for AutoGrant {
    fn request_consent(&self, _kind: &str, _key: &str, _preview: &str) -> bool {
        true
    }
}
