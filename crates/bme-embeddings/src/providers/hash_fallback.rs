//! Deterministic hash-based fallback embedder.
//!
//! Fills each dimension from a seeded SHA-256 digest of the text, then
//! L2-normalizes. Not semantically meaningful, but stable across
//! environments: the same text always maps to the same unit vector, so
//! offline builds and tests keep the full shape contract.

use bme_core::errors::KernelResult;
use sha2::{Digest, Sha256};

use super::Provider;

pub struct HashFallbackProvider {
    dimensions: usize,
}

impl HashFallbackProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimensions];

        for (i, slot) in vec.iter_mut().enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(b":");
            hasher.update(i.to_string().as_bytes());
            let digest = hasher.finalize();

            // First 4 digest bytes as a signed integer in [-1, 1).
            let int_val = i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
            *slot = int_val as f32 / 2f32.powi(31);
        }

        // L2 normalize.
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vec {
                *v /= norm;
            }
        }
        vec
    }
}

impl Provider for HashFallbackProvider {
    fn embed(&self, texts: &[String]) -> KernelResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hash-fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_declared_dimensions() {
        let p = HashFallbackProvider::new(384);
        let v = p.embed(&["hello world".to_string()]).unwrap();
        assert_eq!(v[0].len(), 384);
    }

    #[test]
    fn output_is_unit_norm() {
        let p = HashFallbackProvider::new(256);
        let v = &p.embed(&["rust systems programming".to_string()]).unwrap()[0];
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "expected unit norm, got {norm}");
    }

    #[test]
    fn deterministic_across_calls() {
        let p = HashFallbackProvider::new(128);
        let a = p.embed(&["deterministic".to_string()]).unwrap();
        let b = p.embed(&["deterministic".to_string()]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_texts_differ() {
        let p = HashFallbackProvider::new(128);
        let out = p
            .embed(&["alpha".to_string(), "beta".to_string()])
            .unwrap();
        assert_ne!(out[0], out[1]);
    }
}
