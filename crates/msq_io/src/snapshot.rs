//! `.msqs` snapshot codec.
//!
//! Little-endian container:
//!
//! ```text
//! offset  size           field
//! 0       4              magic = "MSQS"
//! 4       4              version (current: 1)
//! 8       4              metadata_len
//! 12      4              program_len
//! 16      4              signature_len
//! 20      metadata_len   metadata bytes  (canonical JSON)
//! …       program_len    program bytes   (opaque to this crate)
//! …       signature_len  signature bytes (ECDSA r ‖ s, 64)
//! ```
//!
//! The signed region is `magic ‖ version ‖ metadata ‖ program` (length fields
//! excluded). Verification runs before a single program byte is consulted;
//! the snapshot hash (SHA-256 of the signed region) is computed once on load
//! and cached. Dropping a snapshot wipes the program region.

use crate::canonical_json;
use crate::hasher;
use crate::sig;
use crate::wipe::secure_wipe;
use crate::IoError;

use msq_core::json::JsonValue;

pub const SNAPSHOT_MAGIC: [u8; 4] = *b"MSQS";
pub const SNAPSHOT_VERSION: u32 = 1;

const HEADER_LEN: usize = 20;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SnapshotHeader {
    pub version: u32,
    pub metadata_len: u32,
    pub program_len: u32,
    pub signature_len: u32,
}

/// A loaded, signature-verified snapshot. Owned by the host; request
/// contexts borrow it and never copy the program region.
#[derive(Debug)]
pub struct Snapshot {
    header: SnapshotHeader,
    metadata: String,
    program: Vec<u8>,
    signature: Vec<u8>,
    hash: [u8; 32],
}

impl Snapshot {
    /// Parse and verify a `.msqs` byte buffer against `public_key`.
    ///
    /// Order of checks: container shape → signature → metadata canonicality.
    /// A failed signature aborts before metadata or program bytes are
    /// interpreted.
    pub fn load(bytes: &[u8], public_key: &[u8]) -> Result<Snapshot, IoError> {
        if bytes.len() < HEADER_LEN {
            return Err(IoError::Container("truncated header".to_string()));
        }
        if bytes[0..4] != SNAPSHOT_MAGIC {
            return Err(IoError::Container("bad magic".to_string()));
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().expect("fixed slice"));
        if version != SNAPSHOT_VERSION {
            return Err(IoError::Container(format!("unsupported version {version}")));
        }
        let metadata_len = u32::from_le_bytes(bytes[8..12].try_into().expect("fixed slice")) as usize;
        let program_len = u32::from_le_bytes(bytes[12..16].try_into().expect("fixed slice")) as usize;
        let signature_len =
            u32::from_le_bytes(bytes[16..20].try_into().expect("fixed slice")) as usize;

        let total = HEADER_LEN
            .checked_add(metadata_len)
            .and_then(|n| n.checked_add(program_len))
            .and_then(|n| n.checked_add(signature_len))
            .ok_or_else(|| IoError::Container("length overflow".to_string()))?;
        if bytes.len() != total {
            return Err(IoError::Container(format!(
                "container is {} bytes, header declares {total}",
                bytes.len()
            )));
        }

        let metadata_bytes = &bytes[HEADER_LEN..HEADER_LEN + metadata_len];
        let program = &bytes[HEADER_LEN + metadata_len..HEADER_LEN + metadata_len + program_len];
        let signature = &bytes[HEADER_LEN + metadata_len + program_len..];

        // Signature gate: verify over the signed region first.
        let signed = signed_region(metadata_bytes, program);
        if !sig::verify(&signed, signature, public_key) {
            return Err(IoError::Signature);
        }
        let hash = hasher::sha256(&signed);

        // Metadata must be canonical JSON (duplicate keys rejected here).
        let metadata = std::str::from_utf8(metadata_bytes)
            .map_err(|_| IoError::Container("metadata is not UTF-8".to_string()))?
            .to_string();
        canonical_json::parse(&metadata).map_err(IoError::Json)?;

        Ok(Snapshot {
            header: SnapshotHeader {
                version,
                metadata_len: metadata_len as u32,
                program_len: program_len as u32,
                signature_len: signature_len as u32,
            },
            metadata,
            program: program.to_vec(),
            signature: signature.to_vec(),
            hash,
        })
    }

    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    /// Metadata as received (canonical JSON text).
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Metadata parsed into the ADT.
    pub fn metadata_json(&self) -> Result<JsonValue, IoError> {
        canonical_json::parse(&self.metadata).map_err(IoError::Json)
    }

    /// The compiled program; opaque at this layer.
    pub fn program(&self) -> &[u8] {
        &self.program
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// SHA-256 of the signed region, cached at load.
    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        secure_wipe(&mut self.program);
    }
}

/// The byte region a snapshot signature covers.
pub fn signed_region(metadata: &[u8], program: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + metadata.len() + program.len());
    out.extend_from_slice(&SNAPSHOT_MAGIC);
    out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    out.extend_from_slice(metadata);
    out.extend_from_slice(program);
    out
}

/// Assemble a `.msqs` container from its parts. The signature must already
/// cover `signed_region(metadata, program)`; packaging tools and tests sign,
/// this crate only verifies.
pub fn encode(metadata: &str, program: &[u8], signature: &[u8]) -> Vec<u8> {
    let metadata = metadata.as_bytes();
    let mut out =
        Vec::with_capacity(HEADER_LEN + metadata.len() + program.len() + signature.len());
    out.extend_from_slice(&SNAPSHOT_MAGIC);
    out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    out.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
    out.extend_from_slice(&(program.len() as u32).to_le_bytes());
    out.extend_from_slice(&(signature.len() as u32).to_le_bytes());
    out.extend_from_slice(metadata);
    out.extend_from_slice(program);
    out.extend_from_slice(signature);
    out
}
