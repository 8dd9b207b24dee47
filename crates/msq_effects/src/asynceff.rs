//! `Async(promise_hash, args…)`: generic cached async work.
//!
//! The promise hash is the compiler-assigned digest of the awaited
//! construct; hosts bind it to real I/O by registering a resolver on the
//! context. A cache miss blocks synchronously on the resolver; a hit never
//! reaches it (the registry short-circuits on the cached outcome, whose key
//! covers the hash through the argument list).

#![forbid(unsafe_code)]

use msq_core::json::JsonValue;
use msq_core::value::Value;

use crate::{EffectContext, EffectError};

/// `Async` handler.
pub fn async_effect(ctx: &mut EffectContext, args: &[Value]) -> Result<JsonValue, EffectError> {
    let promise_hash = match args.first() {
        Some(Value::Str(s)) => s.clone(),
        _ => {
            return Err(EffectError::Invalid(
                "Async requires a promise hash string".to_string(),
            ))
        }
    };
    let rest = &args[1..];
    match ctx.async_resolvers.get_mut(&promise_hash) {
        Some(resolver) => resolver(rest),
        None => Err(EffectError::Invalid(format!(
            "no resolver for promise hash {promise_hash}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_to_registered_resolver() {
        let mut ctx = EffectContext::new([0u8; 32], ":memory:", true);
        ctx.register_async(
            "p-123",
            Box::new(|args| {
                assert_eq!(args.len(), 1);
                Ok(JsonValue::Str("resolved".to_string()))
            }),
        );
        let v = async_effect(&mut ctx, &[Value::str("p-123"), Value::Int(1)]).unwrap();
        assert_eq!(v, JsonValue::Str("resolved".to_string()));
    }

    #[test]
    fn unknown_hash_is_fatal() {
        let mut ctx = EffectContext::new([0u8; 32], ":memory:", true);
        let err = async_effect(&mut ctx, &[Value::str("p-unknown")]).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.kind(), msq_core::ErrorKind::InvalidEffect);
    }
}
