//! Build provenance record attached to snapshot metadata for audit.
//! Emitted once per compilation; the digest is SHA-256 over the canonical
//! CBOR form so it is stable across hosts.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use msq_core::json::JsonValue;

use crate::canonical_cbor;
use crate::canonical_json;
use crate::hasher;
use crate::IoError;

/// Environment tag for this protocol revision.
pub const BUILD_ENVIRONMENT: &str = "mtpscript-v5.1";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub build_id: String,
    /// RFC 3339 UTC; supplied by the build host, never read from a clock
    /// inside the engine.
    pub timestamp: String,
    pub source_sha256: String,
    pub compiler_version: String,
    pub environment: String,
    /// Hex of the 64-byte build signature (empty until signed).
    pub signature: String,
}

impl BuildInfo {
    pub fn new(
        build_id: impl Into<String>,
        timestamp: impl Into<String>,
        source_sha256: impl Into<String>,
        compiler_version: impl Into<String>,
    ) -> Self {
        BuildInfo {
            build_id: build_id.into(),
            timestamp: timestamp.into(),
            source_sha256: source_sha256.into(),
            compiler_version: compiler_version.into(),
            environment: BUILD_ENVIRONMENT.to_string(),
            signature: String::new(),
        }
    }

    fn to_json(&self) -> Result<JsonValue, IoError> {
        let v = serde_json::to_value(self).map_err(|e| IoError::Serde(e.to_string()))?;
        canonical_json::from_serde(&v).map_err(IoError::Json)
    }

    /// Canonical JSON bytes (what gets embedded in snapshot metadata).
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, IoError> {
        Ok(canonical_json::to_canonical_bytes(&self.to_json()?))
    }

    /// SHA-256 over the canonical CBOR form, lowercase hex.
    pub fn digest_hex(&self) -> Result<String, IoError> {
        let mut cbor = Vec::new();
        canonical_cbor::encode_json(&self.to_json()?, &mut cbor);
        Ok(hasher::sha256_hex(&cbor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BuildInfo {
        BuildInfo::new(
            "build-1f3a",
            "2025-04-01T12:00:00Z",
            "aa".repeat(32),
            "msqc 5.1.0",
        )
    }

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(sample().digest_hex().unwrap(), sample().digest_hex().unwrap());
    }

    #[test]
    fn digest_tracks_every_field() {
        let base = sample().digest_hex().unwrap();
        let mut other = sample();
        other.compiler_version = "msqc 5.1.1".to_string();
        assert_ne!(base, other.digest_hex().unwrap());
    }

    #[test]
    fn canonical_bytes_have_sorted_keys() {
        let bytes = sample().to_canonical_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let build_id = text.find("build_id").unwrap();
        let timestamp = text.find("timestamp").unwrap();
        assert!(build_id < timestamp);
        assert!(text.starts_with('{') && !text.contains(": "));
    }
}
