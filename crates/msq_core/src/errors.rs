//! Closed error taxonomy. Kind strings are part of the wire contract:
//! the response envelope carries exactly these names, and adding or renaming
//! a kind is a protocol version change.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Every way a request can fail, end to end. Closed set; no other kind may
/// reach the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    GasExhausted,
    MemoryLimitExceeded,
    InvalidDecimal,
    IntegerOverflow,
    InvalidEffect,
    UndeclaredEffect,
    InvalidSignature,
    ForbiddenSyntax,
    DecimalDivByZero,
    JsonDuplicateKey,
    DbReadFailed,
    DbWriteFailed,
    HttpTransportError,
    HttpResponseTooLarge,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Wire name, exactly as it appears in the error envelope.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::GasExhausted => "GasExhausted",
            ErrorKind::MemoryLimitExceeded => "MemoryLimitExceeded",
            ErrorKind::InvalidDecimal => "InvalidDecimal",
            ErrorKind::IntegerOverflow => "IntegerOverflow",
            ErrorKind::InvalidEffect => "InvalidEffect",
            ErrorKind::UndeclaredEffect => "UndeclaredEffect",
            ErrorKind::InvalidSignature => "InvalidSignature",
            ErrorKind::ForbiddenSyntax => "ForbiddenSyntax",
            ErrorKind::DecimalDivByZero => "DecimalDivByZero",
            ErrorKind::JsonDuplicateKey => "JsonDuplicateKey",
            ErrorKind::DbReadFailed => "DbReadFailed",
            ErrorKind::DbWriteFailed => "DbWriteFailed",
            ErrorKind::HttpTransportError => "HttpTransportError",
            ErrorKind::HttpResponseTooLarge => "HttpResponseTooLarge",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        }
    }

    /// HTTP status carried by the response envelope when this kind surfaces.
    /// Value-level validation errors map to 400; every other trap is 500.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidDecimal
            | ErrorKind::IntegerOverflow
            | ErrorKind::DecimalDivByZero
            | ErrorKind::JsonDuplicateKey => 400,
            _ => 500,
        }
    }

    /// True for kinds that terminate the context (no further opcode runs).
    /// Effect-level kinds are recoverable: they are cached and surfaced to
    /// guest code as typed `err` values.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ErrorKind::DbReadFailed
                | ErrorKind::DbWriteFailed
                | ErrorKind::HttpTransportError
                | ErrorKind::HttpResponseTooLarge
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal context failure: kind + human message + optional string details
/// (e.g. `gasLimit` / `gasUsed` on exhaustion). Details are flat string pairs
/// so the envelope stays canonically encodable without escaping surprises.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Trap {
    pub kind: ErrorKind,
    pub message: String,
    pub details: BTreeMap<String, String>,
}

impl Trap {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Trap {
            kind,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Gas exhaustion with the budget echo the host expects in `details`.
    pub fn gas_exhausted(gas_limit: u64, gas_used: u64) -> Self {
        Trap::new(ErrorKind::GasExhausted, "computation gas limit exceeded")
            .with_detail("gasLimit", gas_limit.to_string())
            .with_detail("gasUsed", gas_used.to_string())
    }
}
