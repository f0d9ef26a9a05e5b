//! # bme-crypto
//!
//! Rule-driven encryption for memory content: a self-describing AES-GCM
//! envelope, environment-backed key resolution by strength, and the
//! policy orchestrator that binds ciphertexts to their row identity
//! through additional authenticated data.

pub mod aead;
pub mod engine;
pub mod envelope;
pub mod keys;

pub use engine::{AadContext, EncryptionEngine};
pub use envelope::Envelope;
pub use keys::{EnvKeyProvider, KeyProvider, KeyStrength};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;

/// Base64url encode.
pub(crate) fn b64e(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

/// Base64url decode.
pub(crate) fn b64d(s: &str) -> Option<Vec<u8>> {
    URL_SAFE.decode(s.as_bytes()).ok()
}
