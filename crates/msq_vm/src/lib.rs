//! msq_vm — interpreter layer: program decoding, static verification, and
//! resumable metered execution.
//!
//! This crate performs **no I/O**: effects surface as suspensions
//! (`Step::Effect`) that the sandbox controller services and resumes. The
//! canonical codecs from `msq_io` back the `JsonParse` / `JsonStringify` /
//! `Sha256Hex` builtins; everything else depends only on `msq_core`.
//!
//! Guest language posture enforced here:
//! - no loops (backward branches are rejected at verification)
//! - no implicit coercion (mixed-type operators trap)
//! - no floating point, no clock, no randomness, no reference identity

#![forbid(unsafe_code)]

pub mod interp;
pub mod opcode;
pub mod program;

pub use interp::{EffectRequest, Machine, Step};
pub use opcode::{decode_ops, effect_gas_class, encode_ops, Op};
pub use program::{Const, Function, Program, ProgramError};
