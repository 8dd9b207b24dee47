//! SHA-256 and FNV-1a 64 primitives.
//!
//! SHA-256 backs every cross-request / cross-host identifier (seed, snapshot
//! hash, effect cache key, response digest) and is always computed over
//! canonical encodings. FNV-1a is for in-process interning and cache
//! pre-hashing only; it never leaves the process.
//!
//! Deterministic: same canonical bytes ⇒ same digest across OS/arch.

#![forbid(unsafe_code)]

use digest::Digest;
use sha2::Sha256;

/// Raw 32-byte SHA-256.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Lowercase 64-hex SHA-256.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256(bytes))
}

/// SHA-256 over a sequence of segments, avoiding an intermediate copy.
pub fn sha256_concat(segments: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for seg in segments {
        hasher.update(seg);
    }
    hasher.finalize().into()
}

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// FNV-1a 64.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vectors() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            sha256_hex(b"42"),
            "73475cb40a568e8da8a045ced110137e159f890ac4da883b6b17dc651b3a8049"
        );
    }

    #[test]
    fn concat_equals_single_buffer() {
        assert_eq!(sha256_concat(&[b"ab", b"c"]), sha256(b"abc"));
    }

    #[test]
    fn fnv_known_vectors() {
        assert_eq!(fnv1a64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a64(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a64(b"foobar"), 0x85944171f73967e8);
    }
}
