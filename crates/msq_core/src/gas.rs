//! Gas discipline: the frozen per-class cost table and the budget meter.
//!
//! The table is part of protocol version 1; changing any cost is a protocol
//! version change. Exhaustion is deterministic: for a fixed (program, inputs,
//! limit) the opcode at which the meter trips is a pure function.

use crate::errors::{ErrorKind, Trap};

/// Host-facing gas limit bounds; validated before any execution.
pub const MIN_GAS_LIMIT: u64 = 1;
pub const MAX_GAS_LIMIT: u64 = 2_000_000_000;

/// Cost classes for every metered operation. Opcodes map onto classes; the
/// class carries the cost.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GasClass {
    Base,
    Arith,
    Compare,
    Load,
    Store,
    Branch,
    Call,
    TailCall,
    Return,
    Alloc,
    StrCreate,
    StrConcat,
    StrCompare,
    ArrayCreate,
    ArrayAccess,
    ArrayPush,
    ObjCreate,
    ObjGet,
    ObjSet,
    JsonParse,
    JsonStringify,
    CryptoSha256,
    CryptoVerify,
    EffectLog,
    EffectDbRead,
    EffectDbWrite,
    EffectHttp,
    EffectAsync,
}

impl GasClass {
    /// Frozen v1 cost table.
    pub const fn cost(self) -> u64 {
        match self {
            GasClass::Base => 1,
            GasClass::Arith => 2,
            GasClass::Compare => 1,
            GasClass::Load => 1,
            GasClass::Store => 2,
            GasClass::Branch => 2,
            GasClass::Call => 5,
            GasClass::TailCall => 0,
            GasClass::Return => 1,
            GasClass::Alloc => 3,
            GasClass::StrCreate => 5,
            GasClass::StrConcat => 3,
            GasClass::StrCompare => 2,
            GasClass::ArrayCreate => 10,
            GasClass::ArrayAccess => 2,
            GasClass::ArrayPush => 5,
            GasClass::ObjCreate => 10,
            GasClass::ObjGet => 3,
            GasClass::ObjSet => 5,
            GasClass::JsonParse => 20,
            GasClass::JsonStringify => 15,
            GasClass::CryptoSha256 => 10,
            GasClass::CryptoVerify => 30,
            GasClass::EffectLog => 20,
            GasClass::EffectDbRead => 50,
            GasClass::EffectDbWrite => 100,
            GasClass::EffectHttp => 100,
            GasClass::EffectAsync => 50,
        }
    }
}

/// Reject host-supplied limits outside `[MIN_GAS_LIMIT, MAX_GAS_LIMIT]`.
pub fn validate_gas_limit(limit: u64) -> Result<(), Trap> {
    if !(MIN_GAS_LIMIT..=MAX_GAS_LIMIT).contains(&limit) {
        return Err(Trap::new(
            ErrorKind::Internal,
            format!("gas limit {limit} outside [{MIN_GAS_LIMIT}, {MAX_GAS_LIMIT}]"),
        ));
    }
    Ok(())
}

/// 64-bit down-counter charged before each opcode. Underflow poisons the
/// meter; once poisoned every further charge keeps failing, so the machine
/// surfaces `GasExhausted` at its next tick and never executes past it.
#[derive(Clone, Debug)]
pub struct GasMeter {
    limit: u64,
    remaining: u64,
    poisoned: bool,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        GasMeter {
            limit,
            remaining: limit,
            poisoned: false,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn gas_used(&self) -> u64 {
        self.limit - self.remaining
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Charge one operation. On underflow the remaining budget is drained to
    /// zero (so `gas_used == limit`) and the meter is poisoned.
    pub fn charge(&mut self, class: GasClass) -> Result<(), Trap> {
        if self.poisoned {
            return Err(Trap::gas_exhausted(self.limit, self.limit));
        }
        let cost = class.cost();
        if cost > self.remaining {
            self.remaining = 0;
            self.poisoned = true;
            return Err(Trap::gas_exhausted(self.limit, self.limit));
        }
        self.remaining -= cost;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_calls_are_free() {
        let mut m = GasMeter::new(10);
        for _ in 0..1000 {
            m.charge(GasClass::TailCall).unwrap();
        }
        assert_eq!(m.gas_used(), 0);
    }

    #[test]
    fn exhaustion_poisons() {
        let mut m = GasMeter::new(3);
        m.charge(GasClass::Arith).unwrap(); // 2
        let err = m.charge(GasClass::Arith).unwrap_err(); // needs 2, has 1
        assert_eq!(err.kind, ErrorKind::GasExhausted);
        assert!(m.is_poisoned());
        // Poisoned meters refuse even free operations' successors.
        assert!(m.charge(GasClass::Compare).is_err());
        assert_eq!(m.gas_used(), m.limit());
    }

    #[test]
    fn limits_validated() {
        assert!(validate_gas_limit(0).is_err());
        assert!(validate_gas_limit(1).is_ok());
        assert!(validate_gas_limit(MAX_GAS_LIMIT).is_ok());
        assert!(validate_gas_limit(MAX_GAS_LIMIT + 1).is_err());
    }

    #[test]
    fn costs_match_protocol_v1() {
        assert_eq!(GasClass::Call.cost(), 5);
        assert_eq!(GasClass::JsonParse.cost(), 20);
        assert_eq!(GasClass::CryptoVerify.cost(), 30);
        assert_eq!(GasClass::EffectDbWrite.cost(), 100);
    }
}
