//! Property tests: envelope transparency and AAD binding.

use bme_crypto::{aead, Envelope};
use proptest::prelude::*;

const KEY: [u8; 32] = [42u8; 32];

proptest! {
    /// decrypt(encrypt(pt, key, aad), key) == pt for any text and AAD.
    #[test]
    fn envelope_transparency(pt in ".{0,512}", aad in proptest::collection::vec(any::<u8>(), 0..64)) {
        let env = aead::encrypt(&pt, &KEY, &aad).unwrap();
        let out = aead::decrypt(&env, &KEY).unwrap();
        prop_assert_eq!(out, pt);
    }

    /// The serialized envelope survives a JSON round trip and still decrypts.
    #[test]
    fn wire_form_round_trip(pt in ".{1,256}") {
        let env = aead::encrypt(&pt, &KEY, b"ctx").unwrap();
        let wire = env.to_json();
        let parsed = Envelope::from_json(&wire).unwrap();
        prop_assert_eq!(aead::decrypt(&parsed, &KEY).unwrap(), pt);
    }

    /// Flipping any ciphertext byte breaks authentication.
    #[test]
    fn tampering_is_detected(pt in ".{1,128}", flip in any::<u8>()) {
        let env = aead::encrypt(&pt, &KEY, b"ctx").unwrap();
        let mut ct = base64::Engine::decode(
            &base64::engine::general_purpose::URL_SAFE, env.ct.as_bytes()
        ).unwrap();
        let idx = (flip as usize) % ct.len();
        ct[idx] ^= 0x01;
        let tampered = Envelope {
            ct: base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE, &ct),
            ..env
        };
        prop_assert!(aead::decrypt(&tampered, &KEY).is_err());
    }
}
