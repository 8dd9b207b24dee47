//! msq_io — canonical encodings, hashing, signatures, and the snapshot codec.
//!
//! - No inline implementations: the **file modules** are the single source
//!   of truth and this root only carries the shared error type + prelude.
//! - Shared error type (`IoError`) with `From` conversions used across
//!   modules.
//! - Strictly offline: nothing here performs network I/O; the only file I/O
//!   is reading snapshot bytes handed in by the caller.

use msq_core::errors::ErrorKind;
use thiserror::Error;

/// Unified error for msq_io (canonical_json / snapshot / sig / build_info).
#[derive(Debug, Error)]
pub enum IoError {
    /// Malformed snapshot container (magic, lengths, truncation).
    #[error("snapshot container error: {0}")]
    Container(String),

    /// Snapshot signature verification failed.
    #[error("snapshot signature verification failed")]
    Signature,

    /// Canonical JSON parse/emit errors.
    #[error(transparent)]
    Json(#[from] canonical_json::JsonError),

    /// serde_json bridging errors (host metadata structs).
    #[error("serde error: {0}")]
    Serde(String),

    /// Filesystem / path errors.
    #[error("io/path error: {0}")]
    Path(String),
}

impl IoError {
    /// Wire-level kind carried by the response envelope when this error
    /// terminates a request. An unacceptable container is an authentication
    /// failure of the artifact as a whole.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IoError::Container(_) | IoError::Signature => ErrorKind::InvalidSignature,
            IoError::Json(e) => e.kind(),
            IoError::Serde(_) | IoError::Path(_) => ErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        IoError::Path(e.to_string())
    }
}

pub type IoResult<T> = Result<T, IoError>;

/* ---------------- Public modules (single source of truth) ----------------
   IMPORTANT: These correspond to files:
     - src/canonical_json.rs
     - src/canonical_cbor.rs
     - src/hasher.rs
     - src/seed.rs
     - src/sig.rs
     - src/snapshot.rs
     - src/build_info.rs
     - src/wipe.rs
------------------------------------------------------------------------- */

pub mod build_info;
pub mod canonical_cbor;
pub mod canonical_json;
pub mod hasher;
pub mod seed;
pub mod sig;
pub mod snapshot;
pub mod wipe;

/* ---------------- Public prelude ----------------
   Lightweight re-exports so downstream crates can do:
     use msq_io::prelude::*;
------------------------------------------------- */

pub mod prelude {
    pub use crate::{IoError, IoResult};

    pub use crate::build_info::BuildInfo;
    pub use crate::canonical_json::{parse as parse_json, to_canonical_bytes, to_canonical_string};
    pub use crate::hasher::{fnv1a64, sha256, sha256_hex};
    pub use crate::seed::derive_seed;
    pub use crate::sig::{verify, HOST_PUBLIC_KEY};
    pub use crate::snapshot::Snapshot;
    pub use crate::wipe::secure_wipe;
}
