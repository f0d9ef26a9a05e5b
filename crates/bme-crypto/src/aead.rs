//! AEAD: AES-256-GCM with 96-bit nonces.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use bme_core::errors::{CryptoError, KernelError, KernelResult};

use crate::envelope::{Envelope, ALG_AESGCM, ENC_SCHEME};
use crate::{b64d, b64e};

/// Generate a random 12-byte nonce. Used during encryption only.
fn nonce() -> KernelResult<[u8; 12]> {
    let mut n = [0u8; 12];
    getrandom::getrandom(&mut n).map_err(|e| {
        KernelError::Crypto(CryptoError::EncryptionUnavailable {
            reason: format!("OS RNG failure: {e}"),
        })
    })?;
    Ok(n)
}

/// Encrypt plaintext into an envelope. The `kid` field is left empty;
/// the engine fills it after key resolution.
pub fn encrypt(plaintext: &str, key: &[u8; 32], aad: &[u8]) -> KernelResult<Envelope> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| {
        KernelError::Crypto(CryptoError::InvalidKey {
            reason: "AES-256 requires a 32-byte key".to_string(),
        })
    })?;
    let n = nonce()?;
    let payload = Payload {
        msg: plaintext.as_bytes(),
        aad,
    };
    let ct = cipher
        .encrypt(Nonce::from_slice(&n), payload)
        .map_err(|_| KernelError::Crypto(CryptoError::AuthenticationFailed))?;

    Ok(Envelope {
        scheme: ENC_SCHEME.to_string(),
        alg: ALG_AESGCM.to_string(),
        kid: String::new(),
        nonce: b64e(&n),
        aad: if aad.is_empty() { None } else { Some(b64e(aad)) },
        ct: b64e(&ct),
    })
}

/// Decrypt an envelope. Rejects unknown algorithm tags; authentication
/// failure is an error for this call.
pub fn decrypt(envelope: &Envelope, key: &[u8; 32]) -> KernelResult<String> {
    if envelope.alg != ALG_AESGCM {
        return Err(KernelError::Crypto(CryptoError::UnsupportedAlgorithm {
            alg: envelope.alg.clone(),
        }));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| {
        KernelError::Crypto(CryptoError::InvalidKey {
            reason: "AES-256 requires a 32-byte key".to_string(),
        })
    })?;

    let nonce_bytes = b64d(&envelope.nonce)
        .ok_or(KernelError::Crypto(CryptoError::AuthenticationFailed))?;
    let ct = b64d(&envelope.ct).ok_or(KernelError::Crypto(CryptoError::AuthenticationFailed))?;
    let aad_bytes = match &envelope.aad {
        Some(aad) => b64d(aad).ok_or(KernelError::Crypto(CryptoError::AuthenticationFailed))?,
        None => Vec::new(),
    };

    let payload = Payload {
        msg: ct.as_slice(),
        aad: aad_bytes.as_slice(),
    };
    let pt = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), payload)
        .map_err(|_| KernelError::Crypto(CryptoError::AuthenticationFailed))?;

    String::from_utf8(pt).map_err(|_| KernelError::Crypto(CryptoError::AuthenticationFailed))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    #[test]
    fn seal_open_round_trip() {
        let env = encrypt("the quick brown fox", &KEY, b"context").unwrap();
        let pt = decrypt(&env, &KEY).unwrap();
        assert_eq!(pt, "the quick brown fox");
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let env = encrypt("secret", &KEY, b"").unwrap();
        let other = [8u8; 32];
        assert!(decrypt(&env, &other).is_err());
    }

    #[test]
    fn tampered_aad_fails_authentication() {
        let mut env = encrypt("secret", &KEY, b"row-a").unwrap();
        env.aad = Some(crate::b64e(b"row-b"));
        assert!(decrypt(&env, &KEY).is_err());
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let mut env = encrypt("secret", &KEY, b"").unwrap();
        env.alg = "ChaCha20".to_string();
        assert!(matches!(
            decrypt(&env, &KEY),
            Err(KernelError::Crypto(CryptoError::UnsupportedAlgorithm { .. }))
        ));
    }

    #[test]
    fn empty_aad_serializes_as_null() {
        let env = encrypt("x", &KEY, b"").unwrap();
        assert!(env.aad.is_none());
    }
}
