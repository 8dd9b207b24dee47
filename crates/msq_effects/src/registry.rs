//! Effect registry and dispatch.
//!
//! Registration is one-shot per context during bootstrap; re-registration
//! fails. Every dispatch enforces the invoking function's declared-effects
//! set, consults the determinism cache, and only on a miss runs the handler
//! and canonicalises its outcome into the cache. Handler errors are cached
//! exactly like successes.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use msq_core::errors::{ErrorKind, Trap};
use msq_core::value::Value;
use msq_io::canonical_json;

use crate::cache::{cache_key, DeterminismCache};
use crate::{asynceff, db, http, log as log_eff, EffectContext, EffectError, EffectOutcome};

pub type Handler = fn(&mut EffectContext, &[Value]) -> Result<msq_core::json::JsonValue, EffectError>;

#[derive(Default)]
pub struct Registry {
    handlers: BTreeMap<String, Handler>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// The closed builtin set: `DbRead`, `DbWrite`, `HttpOut`, `Log`,
    /// `Async`.
    pub fn with_builtins() -> Registry {
        let mut r = Registry::new();
        r.register("DbRead", db::db_read).expect("fresh registry");
        r.register("DbWrite", db::db_write).expect("fresh registry");
        r.register("HttpOut", http::http_out).expect("fresh registry");
        r.register("Log", log_eff::log_effect).expect("fresh registry");
        r.register("Async", asynceff::async_effect).expect("fresh registry");
        r
    }

    /// One-shot registration; a second registration under the same name is
    /// an error rather than a replacement.
    pub fn register(&mut self, name: &str, handler: Handler) -> Result<(), EffectError> {
        if self.handlers.contains_key(name) {
            return Err(EffectError::Invalid(format!(
                "effect {name} is already registered"
            )));
        }
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Dispatch one effect invocation.
    ///
    /// Fatal conditions (undeclared effect, unknown effect) trap the
    /// context. Everything else, success or typed handler failure alike, is
    /// canonicalised, cached under the deterministic key, and returned as a
    /// guest `ok`/`err` value. On a cache hit the handler is not invoked and
    /// no backend I/O occurs.
    pub fn dispatch(
        &mut self,
        ctx: &mut EffectContext,
        cache: &mut DeterminismCache,
        name: &str,
        cont_id: u32,
        args: &[Value],
        declared: &BTreeSet<String>,
    ) -> Result<Value, Trap> {
        if !declared.contains(name) {
            return Err(Trap::new(ErrorKind::UndeclaredEffect, name));
        }
        let handler = match self.handlers.get(name) {
            Some(h) => *h,
            None => {
                return Err(Trap::new(
                    ErrorKind::InvalidEffect,
                    format!("unknown effect: {name}"),
                ))
            }
        };

        let key = cache_key(&ctx.seed, cont_id, name, args);
        if let Some(bytes) = cache.get(&key) {
            let text = std::str::from_utf8(bytes)
                .map_err(|_| Trap::new(ErrorKind::Internal, "corrupt cache entry"))?;
            let json = canonical_json::parse(text)
                .map_err(|e| Trap::new(ErrorKind::Internal, e.to_string()))?;
            let outcome = EffectOutcome::from_json(&json)
                .ok_or_else(|| Trap::new(ErrorKind::Internal, "corrupt cache envelope"))?;
            return Ok(outcome.to_value());
        }

        let outcome = match handler(ctx, args) {
            Ok(v) => EffectOutcome::Ok(v),
            Err(e) if e.is_fatal() => return Err(Trap::new(e.kind(), e.to_string())),
            Err(e) => EffectOutcome::Err {
                kind: e.kind(),
                message: e.to_string(),
            },
        };
        let bytes = canonical_json::to_canonical_bytes(&outcome.to_json());
        cache.insert(key, bytes);
        Ok(outcome.to_value())
    }
}
