//! `Log(level, message, data?)`: one structured record per call, emitted
//! through `tracing`. The correlation id is the hex of the execution seed;
//! the timestamp is attached by the subscriber on the host side and never
//! re-enters the sandbox. The cached *result* of a `Log` call is JSON
//! `null`, so replays never depend on wall-clock.

#![forbid(unsafe_code)]

use msq_core::json::JsonValue;
use msq_core::value::Value;
use msq_io::canonical_json;

use crate::{EffectContext, EffectError};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<LogLevel> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// `Log` handler.
pub fn log_effect(ctx: &mut EffectContext, args: &[Value]) -> Result<JsonValue, EffectError> {
    let level = match args.first() {
        Some(Value::Str(s)) => LogLevel::parse(s)
            .ok_or_else(|| EffectError::Invalid(format!("unknown log level {s}")))?,
        _ => return Err(EffectError::Invalid("Log requires a level string".to_string())),
    };
    let message = match args.get(1) {
        Some(Value::Str(s)) => s.clone(),
        _ => return Err(EffectError::Invalid("Log requires a message string".to_string())),
    };
    let data = match args.get(2) {
        None | Some(Value::None) => None,
        Some(v) => Some(canonical_json::to_canonical_string(&v.to_json())),
    };

    let correlation_id = hex::encode(ctx.seed);
    emit(level, &message, &correlation_id, data.as_deref());

    // Deterministic cached result: null.
    Ok(JsonValue::Null)
}

fn emit(level: LogLevel, message: &str, correlation_id: &str, data: Option<&str>) {
    match level {
        LogLevel::Debug => {
            tracing::debug!(target: "msq_guest", %correlation_id, data, "{message}")
        }
        LogLevel::Info => {
            tracing::info!(target: "msq_guest", %correlation_id, data, "{message}")
        }
        LogLevel::Warn => {
            tracing::warn!(target: "msq_guest", %correlation_id, data, "{message}")
        }
        LogLevel::Error => {
            tracing::error!(target: "msq_guest", %correlation_id, data, "{message}")
        }
    }
}
