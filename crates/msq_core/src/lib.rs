//! msq_core — Core types for the MSQ deterministic execution engine.
//!
//! This crate is **I/O-free**. It defines the stable types/APIs used across
//! the engine (`msq_io`, `msq_vm`, `msq_effects`, `msq_pipeline`, `msq_cli`):
//!
//! - Closed wire-level error taxonomy (`ErrorKind`, `Trap`)
//! - Exact decimal arithmetic (big significand, scale 0..=28)
//! - Guest value model with structural equality and canonical map ordering
//! - JSON ADT with the parser-only `null` rule
//! - Frozen gas cost table and budget meter
//! - Request/method domains and engine configuration
//!
//! Determinism contract: nothing in this crate reads the clock, the
//! environment, or any OS randomness source.

#![forbid(unsafe_code)]

pub mod config;
pub mod decimal;
pub mod errors;
pub mod gas;
pub mod json;
pub mod request;
pub mod value;

pub use config::EngineConfig;
pub use decimal::{Decimal, DecimalError};
pub use errors::{ErrorKind, Trap};
pub use gas::{GasClass, GasMeter, MAX_GAS_LIMIT, MIN_GAS_LIMIT};
pub use json::JsonValue;
pub use request::{Method, Request};
pub use value::{MapKey, Value, MAX_SAFE_INT};
