//! Per-request seed derivation.
//!
//! `seed = SHA-256(Req_Id ‖ Acc_Id ‖ Version ‖ "mtpscript-v5.1" ‖ SnapHash ‖
//! decimal_ascii(GasLimit))`. Identical inputs produce identical seeds on
//! every platform. The version tag is append-only: once published it never
//! changes, so seeds stay domain-separated across protocol revisions.
//!
//! The seed roots every effect cache key and is never exposed to guest code
//! as a readable value; anything that needs determinism derives from it via
//! sub-hashes.

#![forbid(unsafe_code)]

use digest::Digest;
use sha2::Sha256;

use msq_core::Request;

/// Versioned domain-separation tag baked into every seed.
pub const SEED_DOMAIN_TAG: &str = "mtpscript-v5.1";

/// Derive the 32-byte execution seed for one request.
pub fn derive_seed(request: &Request, snap_hash: &[u8; 32], gas_limit: u64) -> [u8; 32] {
    derive_seed_parts(
        request.request_id(),
        request.account_id(),
        request.caller_version(),
        snap_hash,
        gas_limit,
    )
}

/// Derivation from raw identity parts. The gas limit is appended in decimal
/// ASCII with no leading zeros (`u64` formatting guarantees that).
pub fn derive_seed_parts(
    request_id: &str,
    account_id: &str,
    caller_version: &str,
    snap_hash: &[u8; 32],
    gas_limit: u64,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(request_id.as_bytes());
    hasher.update(account_id.as_bytes());
    hasher.update(caller_version.as_bytes());
    hasher.update(SEED_DOMAIN_TAG.as_bytes());
    hasher.update(snap_hash);
    hasher.update(gas_limit.to_string().as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use msq_core::Method;

    #[test]
    fn identical_inputs_identical_seed() {
        let snap = [7u8; 32];
        let a = derive_seed_parts("r-1", "acct-9", "1.2.0", &snap, 10_000);
        let b = derive_seed_parts("r-1", "acct-9", "1.2.0", &snap, 10_000);
        assert_eq!(a, b);
    }

    #[test]
    fn every_component_separates() {
        let snap = [7u8; 32];
        let base = derive_seed_parts("r-1", "acct-9", "1.2.0", &snap, 10_000);
        assert_ne!(base, derive_seed_parts("r-2", "acct-9", "1.2.0", &snap, 10_000));
        assert_ne!(base, derive_seed_parts("r-1", "acct-8", "1.2.0", &snap, 10_000));
        assert_ne!(base, derive_seed_parts("r-1", "acct-9", "1.2.1", &snap, 10_000));
        assert_ne!(base, derive_seed_parts("r-1", "acct-9", "1.2.0", &[8u8; 32], 10_000));
        assert_ne!(base, derive_seed_parts("r-1", "acct-9", "1.2.0", &snap, 10_001));
    }

    #[test]
    fn request_headers_feed_derivation() {
        let req = Request::new(Method::Get, "/")
            .with_header("X-Request-Id", "r-1")
            .with_header("X-Account-Id", "acct-9")
            .with_header("X-Caller-Version", "1.2.0");
        let snap = [7u8; 32];
        assert_eq!(
            derive_seed(&req, &snap, 500),
            derive_seed_parts("r-1", "acct-9", "1.2.0", &snap, 500)
        );
        // Absent headers degrade to empty strings, not a different layout.
        let bare = Request::new(Method::Get, "/");
        assert_eq!(
            derive_seed(&bare, &snap, 500),
            derive_seed_parts("", "", "", &snap, 500)
        );
    }
}
