//! Program container: constant pool, functions with declared-effect sets,
//! and an entry point. Decoding is followed by **static verification**;
//! nothing executes out of an unverified program. Verification failures are
//! `ForbiddenSyntax` at the wire level: the program uses a construct the
//! language does not admit.
//!
//! Layout (little-endian):
//!
//! ```text
//! magic "MSQB", version u32 (1)
//! consts:  count u32, entries
//!          0x01 int i64 | 0x02 string (len u32 + utf8) |
//!          0x03 decimal (scale u32, sign u8, mag_len u32, magnitude be) |
//!          0x04 bool u8
//! funcs:   count u32, each:
//!          name const u32, effects (count u8, const u32 each),
//!          param_count u8, local_count u8, code_len u32, code bytes
//! entry:   function index u32
//! ```

use std::collections::{BTreeMap, BTreeSet};

use num_bigint::{BigInt, Sign};

use msq_core::decimal::Decimal;
use msq_core::errors::ErrorKind;

use crate::opcode::{self, CodecError, Op};

pub const PROGRAM_MAGIC: [u8; 4] = *b"MSQB";
pub const PROGRAM_VERSION: u32 = 1;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Const {
    Int(i64),
    Str(String),
    Dec(Decimal),
    Bool(bool),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Function {
    pub name: String,
    /// Effects this function may invoke; enforced on every dispatch.
    pub declared_effects: BTreeSet<String>,
    pub param_count: u8,
    pub local_count: u8,
    pub ops: Vec<Op>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Program {
    pub consts: Vec<Const>,
    pub funcs: Vec<Function>,
    pub entry: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ProgramError {
    #[error("program container: {0}")]
    Malformed(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("function {func} at op {at}: {msg}")]
    Verify { func: usize, at: usize, msg: String },
}

impl ProgramError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ForbiddenSyntax
    }
}

/* ------------------------------ Decoding ------------------------------ */

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ProgramError> {
        let s = self
            .bytes
            .get(self.pos..self.pos + n)
            .ok_or_else(|| ProgramError::Malformed(format!("truncated at byte {}", self.pos)))?;
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, ProgramError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, ProgramError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("fixed")))
    }

    fn i64(&mut self) -> Result<i64, ProgramError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().expect("fixed")))
    }
}

impl Program {
    /// Decode and verify. This is the only way the engine accepts program
    /// bytes.
    pub fn load(bytes: &[u8]) -> Result<Program, ProgramError> {
        let program = Program::decode(bytes)?;
        program.verify()?;
        Ok(program)
    }

    fn decode(bytes: &[u8]) -> Result<Program, ProgramError> {
        let mut cur = Cursor { bytes, pos: 0 };
        if cur.take(4)? != PROGRAM_MAGIC {
            return Err(ProgramError::Malformed("bad magic".to_string()));
        }
        let version = cur.u32()?;
        if version != PROGRAM_VERSION {
            return Err(ProgramError::Malformed(format!(
                "unsupported version {version}"
            )));
        }

        let const_count = cur.u32()? as usize;
        let mut consts = Vec::with_capacity(const_count.min(1024));
        for _ in 0..const_count {
            let c = match cur.u8()? {
                0x01 => Const::Int(cur.i64()?),
                0x02 => {
                    let len = cur.u32()? as usize;
                    let raw = cur.take(len)?;
                    Const::Str(
                        std::str::from_utf8(raw)
                            .map_err(|_| ProgramError::Malformed("non-UTF-8 string".into()))?
                            .to_string(),
                    )
                }
                0x03 => {
                    let scale = cur.u32()?;
                    let sign = cur.u8()?;
                    let mag_len = cur.u32()? as usize;
                    let mag = cur.take(mag_len)?;
                    let sig = match sign {
                        0 => BigInt::from_bytes_be(Sign::Plus, mag),
                        1 => BigInt::from_bytes_be(Sign::Minus, mag),
                        other => {
                            return Err(ProgramError::Malformed(format!(
                                "bad decimal sign {other}"
                            )))
                        }
                    };
                    Const::Dec(
                        Decimal::new(sig, scale)
                            .map_err(|e| ProgramError::Malformed(e.to_string()))?,
                    )
                }
                0x04 => Const::Bool(cur.u8()? != 0),
                tag => return Err(ProgramError::Malformed(format!("bad const tag 0x{tag:02x}"))),
            };
            consts.push(c);
        }

        let func_count = cur.u32()? as usize;
        let mut funcs = Vec::with_capacity(func_count.min(256));
        for _ in 0..func_count {
            let name_idx = cur.u32()? as usize;
            let name = match consts.get(name_idx) {
                Some(Const::Str(s)) => s.clone(),
                _ => {
                    return Err(ProgramError::Malformed(format!(
                        "function name const {name_idx} is not a string"
                    )))
                }
            };
            let effect_count = cur.u8()? as usize;
            let mut declared_effects = BTreeSet::new();
            for _ in 0..effect_count {
                let idx = cur.u32()? as usize;
                match consts.get(idx) {
                    Some(Const::Str(s)) => {
                        declared_effects.insert(s.clone());
                    }
                    _ => {
                        return Err(ProgramError::Malformed(format!(
                            "declared effect const {idx} is not a string"
                        )))
                    }
                }
            }
            let param_count = cur.u8()?;
            let local_count = cur.u8()?;
            let code_len = cur.u32()? as usize;
            let code = cur.take(code_len)?;
            funcs.push(Function {
                name,
                declared_effects,
                param_count,
                local_count,
                ops: opcode::decode_ops(code)?,
            });
        }

        let entry = cur.u32()?;
        if cur.pos != bytes.len() {
            return Err(ProgramError::Malformed("trailing bytes".to_string()));
        }
        Ok(Program {
            consts,
            funcs,
            entry,
        })
    }

    /// Encode back to bytes (packaging tools and tests).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&PROGRAM_MAGIC);
        out.extend_from_slice(&PROGRAM_VERSION.to_le_bytes());

        out.extend_from_slice(&(self.consts.len() as u32).to_le_bytes());
        for c in &self.consts {
            match c {
                Const::Int(n) => {
                    out.push(0x01);
                    out.extend_from_slice(&n.to_le_bytes());
                }
                Const::Str(s) => {
                    out.push(0x02);
                    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
                Const::Dec(d) => {
                    out.push(0x03);
                    out.extend_from_slice(&d.scale().to_le_bytes());
                    let (sign, mag) = d.significand().to_bytes_be();
                    out.push(if sign == Sign::Minus { 1 } else { 0 });
                    out.extend_from_slice(&(mag.len() as u32).to_le_bytes());
                    out.extend_from_slice(&mag);
                }
                Const::Bool(b) => {
                    out.push(0x04);
                    out.push(u8::from(*b));
                }
            }
        }

        out.extend_from_slice(&(self.funcs.len() as u32).to_le_bytes());
        for f in &self.funcs {
            let name_idx = self
                .consts
                .iter()
                .position(|c| matches!(c, Const::Str(s) if *s == f.name))
                .expect("function name must be in the constant pool");
            out.extend_from_slice(&(name_idx as u32).to_le_bytes());
            out.push(f.declared_effects.len() as u8);
            for eff in &f.declared_effects {
                let idx = self
                    .consts
                    .iter()
                    .position(|c| matches!(c, Const::Str(s) if s == eff))
                    .expect("declared effect must be in the constant pool");
                out.extend_from_slice(&(idx as u32).to_le_bytes());
            }
            out.push(f.param_count);
            out.push(f.local_count);
            let code = opcode::encode_ops(&f.ops);
            out.extend_from_slice(&(code.len() as u32).to_le_bytes());
            out.extend_from_slice(&code);
        }

        out.extend_from_slice(&self.entry.to_le_bytes());
        out
    }

    /* ---------------------------- Verification ---------------------------- */

    fn verify(&self) -> Result<(), ProgramError> {
        if self.entry as usize >= self.funcs.len() {
            return Err(ProgramError::Malformed(format!(
                "entry {} out of range",
                self.entry
            )));
        }
        for (fi, f) in self.funcs.iter().enumerate() {
            self.verify_function(fi, f)?;
        }
        Ok(())
    }

    fn verify_function(&self, fi: usize, f: &Function) -> Result<(), ProgramError> {
        let fail = |at: usize, msg: String| ProgramError::Verify { func: fi, at, msg };
        if f.ops.is_empty() {
            return Err(fail(0, "empty function body".to_string()));
        }
        match f.ops.last() {
            Some(Op::Return | Op::TailCall { .. }) => {}
            _ => {
                return Err(fail(
                    f.ops.len() - 1,
                    "function must end with return or tail call".to_string(),
                ))
            }
        }

        let locals = usize::from(f.param_count) + usize::from(f.local_count);
        // Recorded stack depth at every forward-jump target.
        let mut targets: BTreeMap<usize, usize> = BTreeMap::new();
        // `None` marks unreachable positions (after return/jump) until a
        // recorded target re-enters.
        let mut depth: Option<usize> = Some(0);

        for (at, op) in f.ops.iter().enumerate() {
            if let Some(expected) = targets.get(&at) {
                match depth {
                    None => depth = Some(*expected),
                    Some(d) if d == *expected => {}
                    Some(d) => {
                        return Err(fail(
                            at,
                            format!("stack depth mismatch at join: {d} vs {expected}"),
                        ))
                    }
                }
            }
            let d = match depth {
                Some(d) => d,
                // Dead code after an unconditional exit that no branch
                // re-enters: reject rather than carry unverified ops.
                None => return Err(fail(at, "unreachable code".to_string())),
            };

            // Operand range checks.
            match *op {
                Op::LoadConst(i) | Op::RecordGet(i) => {
                    if usize::from(i) >= self.consts.len() {
                        return Err(fail(at, format!("const {i} out of range")));
                    }
                    if matches!(op, Op::RecordGet(_))
                        && !matches!(self.consts[usize::from(i)], Const::Str(_))
                    {
                        return Err(fail(at, "record field const must be a string".to_string()));
                    }
                }
                Op::LoadLocal(i) | Op::StoreLocal(i) => {
                    if usize::from(i) >= locals {
                        return Err(fail(at, format!("local {i} out of range")));
                    }
                }
                Op::Jump(t) | Op::JumpIfFalse(t) => {
                    let t = usize::from(t);
                    if t <= at {
                        // Backward branches are the bytecode shape of a loop.
                        return Err(fail(at, "backward branch".to_string()));
                    }
                    if t >= f.ops.len() {
                        return Err(fail(at, format!("branch target {t} out of range")));
                    }
                }
                Op::Call { func, argc } | Op::TailCall { func, argc } => {
                    let callee = self
                        .funcs
                        .get(usize::from(func))
                        .ok_or_else(|| fail(at, format!("function {func} out of range")))?;
                    if callee.param_count != argc {
                        return Err(fail(
                            at,
                            format!(
                                "call passes {argc} args, {} takes {}",
                                callee.name, callee.param_count
                            ),
                        ));
                    }
                }
                Op::Effect { name, .. } => {
                    if !matches!(
                        self.consts.get(usize::from(name)),
                        Some(Const::Str(_))
                    ) {
                        return Err(fail(at, "effect name const must be a string".to_string()));
                    }
                }
                _ => {}
            }

            // Stack effect.
            let (pops, pushes): (usize, usize) = match *op {
                Op::Nop => (0, 0),
                Op::LoadConst(_) | Op::LoadLocal(_) | Op::MakeNone => (0, 1),
                Op::StoreLocal(_) | Op::Pop => (1, 0),
                Op::Dup => (1, 2),
                Op::Add | Op::Sub | Op::Mul | Op::Div => (2, 1),
                Op::Neg => (1, 1),
                Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => (2, 1),
                Op::Jump(_) => (0, 0),
                Op::JumpIfFalse(_) => (1, 0),
                Op::Call { argc, .. } => (usize::from(argc), 1),
                Op::TailCall { argc, .. } => (usize::from(argc), 0),
                Op::Return => (1, 0),
                Op::MakeSome | Op::MakeOk | Op::MakeErr => (1, 1),
                Op::StrConcat => (2, 1),
                Op::ListNew(n) => (usize::from(n), 1),
                Op::ListGet | Op::ListPush => (2, 1),
                Op::MapNew(n) => (2 * usize::from(n), 1),
                Op::MapGet => (2, 1),
                Op::MapSet => (3, 1),
                Op::RecordNew(n) => (2 * usize::from(n), 1),
                Op::RecordGet(_) => (1, 1),
                Op::JsonParse | Op::JsonStringify | Op::Sha256Hex => (1, 1),
                Op::Effect { argc, .. } => (usize::from(argc), 1),
            };
            if d < pops {
                return Err(fail(at, format!("stack underflow: have {d}, need {pops}")));
            }
            let after = d - pops + pushes;

            match *op {
                Op::Jump(t) => {
                    record_target(&mut targets, usize::from(t), after, at, fi)?;
                    depth = None;
                }
                Op::JumpIfFalse(t) => {
                    record_target(&mut targets, usize::from(t), after, at, fi)?;
                    depth = Some(after);
                }
                Op::Return | Op::TailCall { .. } => {
                    depth = None;
                }
                _ => depth = Some(after),
            }
        }
        Ok(())
    }
}

fn record_target(
    targets: &mut BTreeMap<usize, usize>,
    target: usize,
    depth: usize,
    at: usize,
    func: usize,
) -> Result<(), ProgramError> {
    match targets.get(&target) {
        Some(existing) if *existing != depth => Err(ProgramError::Verify {
            func,
            at,
            msg: format!("conflicting stack depth for target {target}: {existing} vs {depth}"),
        }),
        _ => {
            targets.insert(target, depth);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_func(ops: Vec<Op>) -> Program {
        Program {
            consts: vec![Const::Str("main".to_string()), Const::Int(42)],
            funcs: vec![Function {
                name: "main".to_string(),
                declared_effects: BTreeSet::new(),
                param_count: 0,
                local_count: 0,
                ops,
            }],
            entry: 0,
        }
    }

    #[test]
    fn encode_load_round_trip() {
        let p = single_func(vec![Op::LoadConst(1), Op::Return]);
        let loaded = Program::load(&p.encode()).unwrap();
        assert_eq!(loaded, p);
    }

    #[test]
    fn backward_branch_is_forbidden() {
        let p = single_func(vec![Op::Nop, Op::Jump(0), Op::LoadConst(1), Op::Return]);
        let err = Program::load(&p.encode()).unwrap_err();
        assert!(matches!(err, ProgramError::Verify { .. }), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::ForbiddenSyntax);
    }

    #[test]
    fn forward_branch_verifies() {
        let p = single_func(vec![
            Op::LoadConst(1),
            Op::LoadConst(1),
            Op::Eq,
            Op::JumpIfFalse(6),
            Op::LoadConst(1),
            Op::Return,
            Op::MakeNone,
            Op::Return,
        ]);
        assert!(Program::load(&p.encode()).is_ok());
    }

    #[test]
    fn stack_underflow_caught() {
        let p = single_func(vec![Op::Add, Op::Return]);
        assert!(matches!(
            Program::load(&p.encode()),
            Err(ProgramError::Verify { .. })
        ));
    }

    #[test]
    fn join_depth_mismatch_caught() {
        // The fallthrough path reaches the target with one extra value.
        let p = single_func(vec![
            Op::LoadConst(1),
            Op::LoadConst(1),
            Op::Eq,
            Op::JumpIfFalse(6),
            Op::LoadConst(1),
            Op::LoadConst(1), // depth 2 at target 6; branch recorded depth 0
            Op::Return,
        ]);
        assert!(matches!(
            Program::load(&p.encode()),
            Err(ProgramError::Verify { .. })
        ));
    }

    #[test]
    fn call_arity_checked() {
        let mut p = single_func(vec![Op::Call { func: 0, argc: 2 }, Op::Return]);
        p.funcs[0].param_count = 0;
        assert!(matches!(
            Program::load(&p.encode()),
            Err(ProgramError::Verify { .. })
        ));
    }

    #[test]
    fn out_of_range_entry_rejected() {
        let mut p = single_func(vec![Op::LoadConst(1), Op::Return]);
        p.entry = 9;
        assert!(matches!(
            Program::load(&p.encode()),
            Err(ProgramError::Malformed(_))
        ));
    }

    #[test]
    fn decimal_consts_round_trip() {
        let mut p = single_func(vec![Op::LoadConst(2), Op::Return]);
        p.consts.push(Const::Dec(Decimal::parse("-10.50").unwrap()));
        let loaded = Program::load(&p.encode()).unwrap();
        assert_eq!(loaded.consts[2], Const::Dec(Decimal::parse("-10.5").unwrap()));
    }
}
