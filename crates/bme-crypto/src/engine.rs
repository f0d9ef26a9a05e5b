//! Policy-driven encryption orchestrator.
//!
//! Binds ciphertexts to their row identity: the AAD is the canonical
//! JSON of `{kind, key, ts}` (sorted keys), so a ciphertext moved to a
//! different row fails authentication.

use std::collections::BTreeMap;

use bme_core::errors::KernelResult;
use bme_core::evaluated::{EncryptMode, EvaluatedMetadata};
use tracing::error;

use crate::envelope::Envelope;
use crate::keys::{EnvKeyProvider, KeyProvider, KeyStrength};
use crate::{aead, b64d};

/// Row identity an encrypted cell is bound to.
#[derive(Debug, Clone)]
pub struct AadContext<'a> {
    pub kind: &'a str,
    pub key: &'a str,
    pub ts: &'a str,
}

impl AadContext<'_> {
    /// Canonical JSON with sorted keys.
    fn to_bytes(&self) -> Vec<u8> {
        let mut map = BTreeMap::new();
        map.insert("key", self.key);
        map.insert("kind", self.kind);
        map.insert("ts", self.ts);
        serde_json::to_vec(&map).unwrap_or_default()
    }

    /// Context for the summary cell of the same row: `key + "::summary"`.
    pub fn for_summary(&self) -> AadContextOwned {
        AadContextOwned {
            kind: self.kind.to_string(),
            key: format!("{}::summary", self.key),
            ts: self.ts.to_string(),
        }
    }
}

/// Owned variant used for the derived summary context.
#[derive(Debug, Clone)]
pub struct AadContextOwned {
    pub kind: String,
    pub key: String,
    pub ts: String,
}

impl AadContextOwned {
    pub fn borrowed(&self) -> AadContext<'_> {
        AadContext {
            kind: &self.kind,
            key: &self.key,
            ts: &self.ts,
        }
    }
}

/// Orchestrates encryption according to rule policy.
pub struct EncryptionEngine<P: KeyProvider = EnvKeyProvider> {
    key_provider: P,
}

impl EncryptionEngine<EnvKeyProvider> {
    pub fn new() -> Self {
        Self {
            key_provider: EnvKeyProvider::new(),
        }
    }
}

impl Default for EncryptionEngine<EnvKeyProvider> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: KeyProvider> EncryptionEngine<P> {
    pub fn with_provider(key_provider: P) -> Self {
        Self { key_provider }
    }

    /// Effective strength from evaluated metadata, or `None` when the
    /// policy does not demand encryption.
    fn decide_strength(meta: &EvaluatedMetadata) -> Option<KeyStrength> {
        match meta.encrypt {
            EncryptMode::None => None,
            EncryptMode::Standard => Some(KeyStrength::Standard),
            EncryptMode::Strong => Some(KeyStrength::Strong),
        }
    }

    /// Encrypt plaintext if required by policy. Returns the serialized
    /// envelope, or `None` when the policy does not call for encryption.
    pub fn encrypt_for_policy(
        &self,
        plaintext: &str,
        meta: &EvaluatedMetadata,
        context: &AadContext<'_>,
    ) -> KernelResult<Option<String>> {
        let Some(strength) = Self::decide_strength(meta) else {
            return Ok(None);
        };

        let (kid, key) = self.key_provider.key_by_strength(strength);
        let aad = context.to_bytes();
        let mut envelope = aead::encrypt(plaintext, &key, &aad)?;
        // kid is filled after encryption to keep the cipher generic.
        envelope.kid = kid;
        Ok(Some(envelope.to_json()))
    }

    /// Best-effort decrypt. Non-envelope values pass through verbatim;
    /// a decryption failure is logged and the ciphertext is returned
    /// untouched; retrieval never panics over an unreadable cell.
    pub fn try_decrypt_if_envelope(&self, value: &str) -> String {
        let Some(envelope) = Envelope::from_json(value) else {
            return value.to_string();
        };

        let key = match self.key_provider.key(&envelope.kid) {
            Ok(key) => key,
            Err(e) => {
                error!(kid = %envelope.kid, "failed to resolve envelope key: {e}");
                return value.to_string();
            }
        };

        match aead::decrypt(&envelope, &key) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                error!("failed to decrypt envelope: {e}");
                value.to_string()
            }
        }
    }

    /// Decode an envelope's AAD for inspection (tests, auditing).
    pub fn envelope_aad(value: &str) -> Option<Vec<u8>> {
        Envelope::from_json(value).and_then(|env| env.aad.as_deref().and_then(b64d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bme_core::evaluated::EvaluatedMetadata;

    fn meta_encrypt(mode: EncryptMode) -> EvaluatedMetadata {
        EvaluatedMetadata {
            encrypt: mode,
            ..Default::default()
        }
    }

    fn ctx<'a>() -> AadContext<'a> {
        AadContext {
            kind: "fact",
            key: "alpha",
            ts: "2025-06-01T00:00:00Z",
        }
    }

    #[test]
    fn no_policy_means_no_envelope() {
        let engine = EncryptionEngine::new();
        let out = engine
            .encrypt_for_policy("hello", &meta_encrypt(EncryptMode::None), &ctx())
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn policy_round_trip() {
        let engine = EncryptionEngine::new();
        let stored = engine
            .encrypt_for_policy("hello world", &meta_encrypt(EncryptMode::Standard), &ctx())
            .unwrap()
            .unwrap();
        assert!(Envelope::is_envelope(&stored));
        assert_eq!(engine.try_decrypt_if_envelope(&stored), "hello world");
    }

    #[test]
    fn aad_is_canonical_sorted_json() {
        let engine = EncryptionEngine::new();
        let stored = engine
            .encrypt_for_policy("x", &meta_encrypt(EncryptMode::Standard), &ctx())
            .unwrap()
            .unwrap();
        let aad = EncryptionEngine::<EnvKeyProvider>::envelope_aad(&stored).unwrap();
        assert_eq!(
            String::from_utf8(aad).unwrap(),
            r#"{"key":"alpha","kind":"fact","ts":"2025-06-01T00:00:00Z"}"#
        );
    }

    #[test]
    fn swapped_ciphertext_between_rows_fails_and_passes_through() {
        let engine = EncryptionEngine::new();
        let meta = meta_encrypt(EncryptMode::Standard);

        let a = engine.encrypt_for_policy("payload-a", &meta, &ctx()).unwrap().unwrap();
        let other = AadContext {
            kind: "fact",
            key: "beta",
            ts: "2025-06-01T00:00:00Z",
        };
        let b = engine.encrypt_for_policy("payload-b", &meta, &other).unwrap().unwrap();

        // Graft row B's ciphertext into row A's envelope: the AAD no
        // longer matches what was authenticated, decryption fails, and
        // the best-effort path returns the mangled envelope unchanged.
        let mut env_a = Envelope::from_json(&a).unwrap();
        let env_b = Envelope::from_json(&b).unwrap();
        env_a.ct = env_b.ct;
        env_a.nonce = env_b.nonce;
        let grafted = env_a.to_json();

        assert_eq!(engine.try_decrypt_if_envelope(&grafted), grafted);
    }

    #[test]
    fn summary_context_derives_key_suffix() {
        let summary_ctx = ctx().for_summary();
        assert_eq!(summary_ctx.key, "alpha::summary");
        assert_eq!(summary_ctx.kind, "fact");
    }

    #[test]
    fn non_envelope_passes_through() {
        let engine = EncryptionEngine::new();
        assert_eq!(engine.try_decrypt_if_envelope("plain text"), "plain text");
    }
}
