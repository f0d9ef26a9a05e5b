//! Key resolution by strength tag.
//!
//! Production keys come from the environment; absent keys fall back to
//! ephemeral per-process material with a warning. Keys never touch disk.

use std::collections::HashMap;

use bme_core::errors::{CryptoError, KernelError, KernelResult};
use tracing::{error, warn};

use crate::b64d;

/// Encryption strength space. Unknown strengths resolve to standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyStrength {
    Standard,
    Strong,
}

impl KeyStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStrength::Standard => "standard",
            KeyStrength::Strong => "strong",
        }
    }
}

/// Resolves encryption keys by strength tag or key id.
pub trait KeyProvider: Send + Sync {
    /// Key id and key bytes for a strength level.
    fn key_by_strength(&self, strength: KeyStrength) -> (String, [u8; 32]);

    /// Key bytes for a key id, if known.
    fn key(&self, kid: &str) -> KernelResult<[u8; 32]>;
}

/// Loads keys from the process environment.
///
/// * `BME_KEY_STANDARD` / `BME_KEY_STRONG`: base64url 32-byte keys
/// * `BME_KID_STANDARD` / `BME_KID_STRONG`: key id overrides
///   (defaults `std` / `str`)
///
/// Missing keys are replaced by ephemeral random material, with a
/// warning naming the strength.
pub struct EnvKeyProvider {
    cache: HashMap<String, [u8; 32]>,
    standard_kid: String,
    strong_kid: String,
}

impl EnvKeyProvider {
    pub const STANDARD_ENV: &'static str = "BME_KEY_STANDARD";
    pub const STRONG_ENV: &'static str = "BME_KEY_STRONG";

    pub fn new() -> Self {
        let standard_kid = std::env::var("BME_KID_STANDARD").unwrap_or_else(|_| "std".to_string());
        let strong_kid = std::env::var("BME_KID_STRONG").unwrap_or_else(|_| "str".to_string());

        let mut cache = HashMap::new();
        if let Ok(encoded) = std::env::var(Self::STANDARD_ENV) {
            match decode_key(&encoded) {
                Some(key) => {
                    cache.insert(standard_kid.clone(), key);
                }
                None => error!("invalid {}; must be urlsafe base64 32 bytes", Self::STANDARD_ENV),
            }
        }
        if let Ok(encoded) = std::env::var(Self::STRONG_ENV) {
            match decode_key(&encoded) {
                Some(key) => {
                    cache.insert(strong_kid.clone(), key);
                }
                None => error!("invalid {}; must be urlsafe base64 32 bytes", Self::STRONG_ENV),
            }
        }

        // Development fallback: ephemeral per-process keys.
        if !cache.contains_key(&standard_kid) {
            cache.insert(standard_kid.clone(), random_key());
            warn!(
                "using ephemeral dev key for standard; set {} in production",
                Self::STANDARD_ENV
            );
        }
        if !cache.contains_key(&strong_kid) {
            cache.insert(strong_kid.clone(), random_key());
            warn!(
                "using ephemeral dev key for strong; set {} in production",
                Self::STRONG_ENV
            );
        }

        Self {
            cache,
            standard_kid,
            strong_kid,
        }
    }
}

impl Default for EnvKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyProvider for EnvKeyProvider {
    fn key_by_strength(&self, strength: KeyStrength) -> (String, [u8; 32]) {
        let kid = match strength {
            KeyStrength::Strong => &self.strong_kid,
            KeyStrength::Standard => &self.standard_kid,
        };
        (kid.clone(), self.cache[kid])
    }

    fn key(&self, kid: &str) -> KernelResult<[u8; 32]> {
        self.cache
            .get(kid)
            .copied()
            .ok_or_else(|| KernelError::Crypto(CryptoError::UnknownKeyId { kid: kid.to_string() }))
    }
}

fn decode_key(encoded: &str) -> Option<[u8; 32]> {
    let bytes = b64d(encoded)?;
    <[u8; 32]>::try_from(bytes.as_slice()).ok()
}

fn random_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    // No safe fallback exists if the OS RNG is gone.
    getrandom::getrandom(&mut key).expect("OS random number generator unavailable");
    key
}
