//! msq_effects — the closed effect runtime.
//!
//! A context owns one `Registry`, one `DeterminismCache`, and one
//! `EffectContext` (database pool, HTTP backend, async resolvers). Handlers
//! take the context explicitly; there is no process-wide mutable state and
//! no thread-local anywhere in this crate.
//!
//! Error posture: handler failures become typed outcomes and are **cached
//! like successes**, so a replay observes the same error. Only
//! undeclared/unknown effects are fatal to the context.

use std::collections::BTreeMap;

use msq_core::errors::ErrorKind;
use msq_core::json::JsonValue;
use msq_core::value::Value;

pub mod asynceff;
pub mod cache;
pub mod db;
pub mod http;
pub mod log;
pub mod registry;

pub use cache::{cache_key, DeterminismCache};
pub use db::DbPool;
pub use http::{
    HttpBackend, HttpRequestSpec, HttpResponseData, ReqwestBackend, StubHttpBackend, StubState,
};
pub use registry::Registry;

/// Failures raised inside effect handlers.
#[derive(Debug, thiserror::Error)]
pub enum EffectError {
    #[error("database read failed: {0}")]
    DbRead(String),
    #[error("database write failed: {0}")]
    DbWrite(String),
    #[error("http transport failed: {0}")]
    HttpTransport(String),
    #[error("http response exceeds {0} bytes")]
    HttpTooLarge(u64),
    /// Effect unknown to the registry, or arguments of an impossible shape.
    #[error("invalid effect: {0}")]
    Invalid(String),
    /// Effect invoked outside the calling function's declared set.
    #[error("undeclared effect: {0}")]
    Undeclared(String),
}

impl EffectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EffectError::DbRead(_) => ErrorKind::DbReadFailed,
            EffectError::DbWrite(_) => ErrorKind::DbWriteFailed,
            EffectError::HttpTransport(_) => ErrorKind::HttpTransportError,
            EffectError::HttpTooLarge(_) => ErrorKind::HttpResponseTooLarge,
            EffectError::Invalid(_) => ErrorKind::InvalidEffect,
            EffectError::Undeclared(_) => ErrorKind::UndeclaredEffect,
        }
    }

    /// Recoverable errors are cached and surfaced to guest code as `err`
    /// values; fatal ones trap the context.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EffectError::Invalid(_) | EffectError::Undeclared(_))
    }
}

/// The canonical outcome of one effect invocation. This is what enters the
/// determinism cache (as canonical JSON bytes) and what guest code receives
/// (as an ok/err value).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EffectOutcome {
    Ok(JsonValue),
    Err { kind: ErrorKind, message: String },
}

impl EffectOutcome {
    /// Canonical JSON projection: `{"ok": v}` or
    /// `{"err": {"error": kind, "message": m}}`.
    pub fn to_json(&self) -> JsonValue {
        match self {
            EffectOutcome::Ok(v) => {
                JsonValue::object_unchecked(vec![("ok".to_string(), v.clone())])
            }
            EffectOutcome::Err { kind, message } => JsonValue::object_unchecked(vec![(
                "err".to_string(),
                JsonValue::object_unchecked(vec![
                    ("error".to_string(), JsonValue::Str(kind.as_str().to_string())),
                    ("message".to_string(), JsonValue::Str(message.clone())),
                ]),
            )]),
        }
    }

    /// Rebuild from the cached canonical form. Anything that does not match
    /// the envelope shape indicates cache corruption.
    pub fn from_json(v: &JsonValue) -> Option<EffectOutcome> {
        if let Some(ok) = v.get("ok") {
            return Some(EffectOutcome::Ok(ok.clone()));
        }
        let err = v.get("err")?;
        let kind = match err.get("error")? {
            JsonValue::Str(s) => parse_kind(s)?,
            _ => return None,
        };
        let message = match err.get("message")? {
            JsonValue::Str(s) => s.clone(),
            _ => return None,
        };
        Some(EffectOutcome::Err { kind, message })
    }

    /// Guest-space projection: `Ok(value)` / `Err(record)`.
    pub fn to_value(&self) -> Value {
        match self {
            EffectOutcome::Ok(v) => Value::Ok(Box::new(Value::from_json(v))),
            EffectOutcome::Err { kind, message } => Value::Err(Box::new(Value::Record(vec![
                ("error".to_string(), Value::str(kind.as_str())),
                ("message".to_string(), Value::str(message.clone())),
            ]))),
        }
    }
}

fn parse_kind(s: &str) -> Option<ErrorKind> {
    // Only recoverable kinds are ever cached.
    match s {
        "DbReadFailed" => Some(ErrorKind::DbReadFailed),
        "DbWriteFailed" => Some(ErrorKind::DbWriteFailed),
        "HttpTransportError" => Some(ErrorKind::HttpTransportError),
        "HttpResponseTooLarge" => Some(ErrorKind::HttpResponseTooLarge),
        _ => None,
    }
}

/// Resolver for generic cached async work, keyed by the compiler-assigned
/// promise hash.
pub type AsyncResolver = Box<dyn FnMut(&[Value]) -> Result<JsonValue, EffectError>>;

/// Everything the effect handlers may touch. Owned by one request context;
/// single-threaded by construction, so nothing in here is locked.
pub struct EffectContext {
    /// Execution seed; roots cache keys and the log correlation id.
    pub seed: [u8; 32],
    pub db: DbPool,
    pub http: Box<dyn HttpBackend>,
    pub async_resolvers: BTreeMap<String, AsyncResolver>,
    /// Default TLS posture for `HttpOut` when the call does not override it.
    pub verify_tls: bool,
}

impl EffectContext {
    pub fn new(seed: [u8; 32], db_path: &str, verify_tls: bool) -> EffectContext {
        EffectContext {
            seed,
            db: DbPool::new(db_path),
            http: Box::new(ReqwestBackend::new()),
            async_resolvers: BTreeMap::new(),
            verify_tls,
        }
    }

    /// Register a resolver for an awaited construct. Packaging assigns the
    /// promise hash; hosts bind it to real I/O here.
    pub fn register_async(&mut self, promise_hash: impl Into<String>, resolver: AsyncResolver) {
        self.async_resolvers.insert(promise_hash.into(), resolver);
    }

    /// Close the pool and wipe the seed copy. Called by the context wipe
    /// stage; the struct is unusable afterwards.
    pub fn teardown(&mut self) {
        self.db.close_all();
        msq_io::wipe::secure_wipe(&mut self.seed);
    }
}
