//! ECDSA-P256 signature verification over SHA-256.
//!
//! Signatures are the raw concatenation of 32-byte big-endian `r` then `s`
//! (no DER). Verification is total: a length mismatch, zero scalar, or any
//! parsing failure returns `false`; nothing escapes as a panic or error.

#![forbid(unsafe_code)]

use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_FIXED};

/// Raw `r ‖ s` signature length.
pub const SIGNATURE_LEN: usize = 64;

/// Uncompressed SEC1 point length (`0x04 ‖ x ‖ y`).
pub const PUBLIC_KEY_LEN: usize = 65;

/// The snapshot-signing public key embedded in the host binary. Lives in
/// `.rodata`; never written, never exposed to guest code.
pub const HOST_PUBLIC_KEY: [u8; PUBLIC_KEY_LEN] = [
    0x04, // uncompressed point
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
    0x0F, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1C, 0x1D,
    0x1E, 0x1F, // x
    0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2A, 0x2B, 0x2C, 0x2D, 0x2E,
    0x2F, 0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3A, 0x3B, 0x3C, 0x3D,
    0x3E, 0x3F, // y
];

/// Verify `signature` (raw 64-byte `r ‖ s`) over `data` with the given
/// uncompressed P-256 public key. The SHA-256 of `data` is computed inside
/// the fixed-width verifier; callers pass the raw signed region.
pub fn verify(data: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    if signature.len() != SIGNATURE_LEN || public_key.len() != PUBLIC_KEY_LEN {
        return false;
    }
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, public_key)
        .verify(data, signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;
    use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};

    fn test_keypair() -> (EcdsaKeyPair, Vec<u8>) {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
        let pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .unwrap();
        let public = pair.public_key().as_ref().to_vec();
        (pair, public)
    }

    #[test]
    fn valid_signature_verifies() {
        let (pair, public) = test_keypair();
        let rng = SystemRandom::new();
        let data = b"MSQS signed region";
        let sig = pair.sign(&rng, data).unwrap();
        assert_eq!(sig.as_ref().len(), SIGNATURE_LEN);
        assert!(verify(data, sig.as_ref(), &public));
    }

    #[test]
    fn flipped_byte_fails() {
        let (pair, public) = test_keypair();
        let rng = SystemRandom::new();
        let data = b"MSQS signed region".to_vec();
        let sig = pair.sign(&rng, &data).unwrap();

        let mut bad_data = data.clone();
        bad_data[0] ^= 0x01;
        assert!(!verify(&bad_data, sig.as_ref(), &public));

        let mut bad_sig = sig.as_ref().to_vec();
        bad_sig[10] ^= 0x01;
        assert!(!verify(&data, &bad_sig, &public));
    }

    #[test]
    fn malformed_inputs_return_false() {
        let (_, public) = test_keypair();
        assert!(!verify(b"data", &[0u8; 63], &public)); // short signature
        assert!(!verify(b"data", &[0u8; SIGNATURE_LEN], &public)); // zero scalars
        assert!(!verify(b"data", &[0u8; SIGNATURE_LEN], &[0u8; 10])); // bad key
        assert!(!verify(b"data", &[0u8; SIGNATURE_LEN], &HOST_PUBLIC_KEY));
    }
}
