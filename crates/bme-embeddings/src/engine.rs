//! The embedding engine: provider selection and shape validation.

use bme_core::config::EmbeddingConfig;
use bme_core::errors::{EmbeddingError, KernelError, KernelResult};
use bme_core::traits::EmbeddingBackend;
use tracing::warn;

use crate::providers::{HashFallbackProvider, Provider};

/// Orchestrates embedding generation for one configured provider.
pub struct EmbeddingEngine {
    config: EmbeddingConfig,
    provider: Box<dyn Provider>,
    /// True when the configured provider could not be constructed and
    /// the deterministic fallback is standing in.
    fallback: bool,
}

impl EmbeddingEngine {
    /// Build an engine for the given config.
    ///
    /// `local-sbert` (and any other model-backed provider name) has no
    /// in-process model runtime here; it resolves to the deterministic
    /// hash fallback with a warning, preserving shape contracts. An
    /// unknown provider name is an error.
    pub fn new(config: EmbeddingConfig) -> KernelResult<Self> {
        let (provider, fallback): (Box<dyn Provider>, bool) = match config.provider.as_str() {
            "hash-fallback" => (Box::new(HashFallbackProvider::new(config.dim)), false),
            "local-sbert" | "openai" => {
                warn!(
                    provider = %config.provider,
                    model = %config.model,
                    "no runtime for configured provider; using deterministic fallback embedder"
                );
                (Box::new(HashFallbackProvider::new(config.dim)), true)
            }
            other => {
                return Err(KernelError::Embedding(EmbeddingError::UnknownProvider {
                    provider: other.to_string(),
                }))
            }
        };

        Ok(Self {
            config,
            provider,
            fallback,
        })
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }
}

impl EmbeddingBackend for EmbeddingEngine {
    fn embed_texts(&self, texts: &[String]) -> KernelResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.provider.embed(texts)?;

        if vectors.len() != texts.len() {
            return Err(KernelError::Embedding(EmbeddingError::ShapeMismatch {
                got: vectors.len(),
                expected: texts.len(),
            }));
        }
        for v in &vectors {
            if v.len() != self.config.dim {
                return Err(KernelError::Embedding(EmbeddingError::ShapeMismatch {
                    got: v.len(),
                    expected: self.config.dim,
                }));
            }
        }

        let m = bme_core::metrics::metrics();
        m.inc(&m.embeddings_generated);
        Ok(vectors)
    }

    fn config(&self) -> EmbeddingConfig {
        self.config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_an_error() {
        let cfg = EmbeddingConfig {
            provider: "martian".to_string(),
            ..Default::default()
        };
        assert!(EmbeddingEngine::new(cfg).is_err());
    }

    #[test]
    fn sbert_resolves_to_fallback() {
        let engine = EmbeddingEngine::new(EmbeddingConfig::default()).unwrap();
        assert!(engine.is_fallback());
        assert_eq!(engine.provider_name(), "hash-fallback");
    }

    #[test]
    fn batch_shape_matches_inputs() {
        let engine = EmbeddingEngine::new(EmbeddingConfig {
            provider: "hash-fallback".to_string(),
            model: "none".to_string(),
            dim: 64,
        })
        .unwrap();
        let out = engine
            .embed_texts(&["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| v.len() == 64));
    }

    #[test]
    fn empty_batch_is_empty() {
        let engine = EmbeddingEngine::new(EmbeddingConfig::default()).unwrap();
        assert!(engine.embed_texts(&[]).unwrap().is_empty());
    }
}
