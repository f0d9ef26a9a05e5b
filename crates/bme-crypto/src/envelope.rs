//! The encryption envelope: exactly one compact JSON object per
//! encrypted cell.
//!
//! Anything that does not parse as an object carrying the expected
//! scheme tag is treated as plaintext by the best-effort decrypt path.

use serde::{Deserialize, Serialize};

/// Version identifier for the envelope wire format.
pub const ENC_SCHEME: &str = "bartholomew.enc.v1";
/// Algorithm tag for AES-GCM-256.
pub const ALG_AESGCM: &str = "AES-GCM";

/// A self-describing ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Scheme tag (`bartholomew.enc.v1`).
    pub scheme: String,
    /// Algorithm tag (`AES-GCM`).
    pub alg: String,
    /// Key identifier; filled by the engine after encryption.
    pub kid: String,
    /// Base64url 96-bit nonce.
    pub nonce: String,
    /// Optional base64url additional authenticated data.
    pub aad: Option<String>,
    /// Base64url ciphertext, AEAD tag included.
    pub ct: String,
}

impl Envelope {
    /// Serialize to the compact JSON wire form.
    pub fn to_json(&self) -> String {
        // Field order in the struct matches the wire format; serde_json
        // emits compact separators by default.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse an envelope. Returns `None` for anything that is not a
    /// JSON object with the expected scheme tag; such values are
    /// plaintext as far as the engine is concerned.
    pub fn from_json(s: &str) -> Option<Self> {
        let env: Envelope = serde_json::from_str(s).ok()?;
        if env.scheme != ENC_SCHEME {
            return None;
        }
        Some(env)
    }

    /// Whether a stored value is in envelope form.
    pub fn is_envelope(s: &str) -> bool {
        Self::from_json(s).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_is_not_an_envelope() {
        assert!(Envelope::from_json("just some text").is_none());
        assert!(Envelope::from_json("{\"scheme\":\"other.v2\"}").is_none());
        assert!(Envelope::from_json("{}").is_none());
        assert!(Envelope::from_json("[1,2,3]").is_none());
    }

    #[test]
    fn round_trips_through_json() {
        let env = Envelope {
            scheme: ENC_SCHEME.to_string(),
            alg: ALG_AESGCM.to_string(),
            kid: "std".to_string(),
            nonce: "AAAA".to_string(),
            aad: None,
            ct: "BBBB".to_string(),
        };
        let parsed = Envelope::from_json(&env.to_json()).unwrap();
        assert_eq!(parsed, env);
    }
}
