//! Opcode set and byte-level codec.
//!
//! One opcode byte followed by fixed-width little-endian operands. Branch
//! operands are **instruction indices** (not byte offsets) into the decoded
//! sequence; the verifier enforces that every target is strictly forward.

use msq_core::gas::GasClass;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Op {
    Nop,
    /// Push constant-pool entry.
    LoadConst(u16),
    LoadLocal(u8),
    StoreLocal(u8),
    Pop,
    Dup,

    Add,
    Sub,
    Mul,
    Div,
    Neg,

    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    /// Unconditional forward branch to an instruction index.
    Jump(u16),
    /// Branch if the popped bool is false.
    JumpIfFalse(u16),

    Call { func: u16, argc: u8 },
    /// Costs zero gas; reuses the current frame.
    TailCall { func: u16, argc: u8 },
    Return,

    MakeSome,
    MakeNone,
    MakeOk,
    MakeErr,

    StrConcat,

    ListNew(u16),
    ListGet,
    ListPush,

    MapNew(u16),
    MapGet,
    MapSet,

    /// Pop `n` (name, value) pairs into an ordered record.
    RecordNew(u16),
    /// Project the field named by the constant-pool string.
    RecordGet(u16),

    JsonParse,
    JsonStringify,

    Sha256Hex,

    /// Suspension point. `name` indexes the constant pool; `cont_id` is the
    /// compiler-assigned continuation id (source-encounter order).
    Effect { name: u16, cont_id: u32, argc: u8 },
}

impl Op {
    /// Gas class charged before this opcode executes. Effects are charged by
    /// category at dispatch (the class depends on the effect name).
    pub fn gas_class(&self) -> GasClass {
        match self {
            Op::Nop | Op::Pop | Op::Dup => GasClass::Base,
            Op::LoadConst(_) | Op::LoadLocal(_) => GasClass::Load,
            Op::StoreLocal(_) => GasClass::Store,
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Neg => GasClass::Arith,
            Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => GasClass::Compare,
            Op::Jump(_) | Op::JumpIfFalse(_) => GasClass::Branch,
            Op::Call { .. } => GasClass::Call,
            Op::TailCall { .. } => GasClass::TailCall,
            Op::Return => GasClass::Return,
            Op::MakeSome | Op::MakeNone | Op::MakeOk | Op::MakeErr => GasClass::Alloc,
            Op::StrConcat => GasClass::StrConcat,
            Op::ListNew(_) => GasClass::ArrayCreate,
            Op::ListGet => GasClass::ArrayAccess,
            Op::ListPush => GasClass::ArrayPush,
            Op::MapNew(_) | Op::RecordNew(_) => GasClass::ObjCreate,
            Op::MapGet | Op::RecordGet(_) => GasClass::ObjGet,
            Op::MapSet => GasClass::ObjSet,
            Op::JsonParse => GasClass::JsonParse,
            Op::JsonStringify => GasClass::JsonStringify,
            Op::Sha256Hex => GasClass::CryptoSha256,
            Op::Effect { .. } => GasClass::Base, // category charge at dispatch
        }
    }
}

/// Gas class for an effect invocation, by declared effect name. Names
/// outside the builtin set meter like `Async` (the registry still decides
/// whether they exist at all).
pub fn effect_gas_class(name: &str) -> GasClass {
    match name {
        "DbRead" => GasClass::EffectDbRead,
        "DbWrite" => GasClass::EffectDbWrite,
        "HttpOut" => GasClass::EffectHttp,
        "Log" => GasClass::EffectLog,
        _ => GasClass::EffectAsync,
    }
}

mod bytes {
    pub const NOP: u8 = 0x00;
    pub const LOAD_CONST: u8 = 0x01;
    pub const LOAD_LOCAL: u8 = 0x02;
    pub const STORE_LOCAL: u8 = 0x03;
    pub const POP: u8 = 0x04;
    pub const DUP: u8 = 0x05;
    pub const ADD: u8 = 0x10;
    pub const SUB: u8 = 0x11;
    pub const MUL: u8 = 0x12;
    pub const DIV: u8 = 0x13;
    pub const NEG: u8 = 0x14;
    pub const EQ: u8 = 0x18;
    pub const NE: u8 = 0x19;
    pub const LT: u8 = 0x1A;
    pub const LE: u8 = 0x1B;
    pub const GT: u8 = 0x1C;
    pub const GE: u8 = 0x1D;
    pub const JUMP: u8 = 0x20;
    pub const JUMP_IF_FALSE: u8 = 0x21;
    pub const CALL: u8 = 0x28;
    pub const TAIL_CALL: u8 = 0x29;
    pub const RETURN: u8 = 0x2A;
    pub const MAKE_SOME: u8 = 0x30;
    pub const MAKE_NONE: u8 = 0x31;
    pub const MAKE_OK: u8 = 0x32;
    pub const MAKE_ERR: u8 = 0x33;
    pub const STR_CONCAT: u8 = 0x38;
    pub const LIST_NEW: u8 = 0x40;
    pub const LIST_GET: u8 = 0x41;
    pub const LIST_PUSH: u8 = 0x42;
    pub const MAP_NEW: u8 = 0x48;
    pub const MAP_GET: u8 = 0x49;
    pub const MAP_SET: u8 = 0x4A;
    pub const RECORD_NEW: u8 = 0x50;
    pub const RECORD_GET: u8 = 0x51;
    pub const JSON_PARSE: u8 = 0x58;
    pub const JSON_STRINGIFY: u8 = 0x59;
    pub const SHA256_HEX: u8 = 0x60;
    pub const EFFECT: u8 = 0x70;
}

/// Codec errors; surfaced to callers as `ForbiddenSyntax`.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("unknown opcode 0x{0:02x} at byte {1}")]
    UnknownOpcode(u8, usize),
    #[error("truncated operand at byte {0}")]
    Truncated(usize),
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn u8(&mut self) -> Result<u8, CodecError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or(CodecError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let hi = self
            .bytes
            .get(self.pos..self.pos + 2)
            .ok_or(CodecError::Truncated(self.pos))?;
        self.pos += 2;
        Ok(u16::from_le_bytes(hi.try_into().expect("fixed slice")))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let hi = self
            .bytes
            .get(self.pos..self.pos + 4)
            .ok_or(CodecError::Truncated(self.pos))?;
        self.pos += 4;
        Ok(u32::from_le_bytes(hi.try_into().expect("fixed slice")))
    }
}

/// Decode a function body into its instruction sequence.
pub fn decode_ops(code: &[u8]) -> Result<Vec<Op>, CodecError> {
    use bytes::*;
    let mut cur = Cursor {
        bytes: code,
        pos: 0,
    };
    let mut ops = Vec::new();
    while cur.pos < code.len() {
        let at = cur.pos;
        let op = match cur.u8()? {
            NOP => Op::Nop,
            LOAD_CONST => Op::LoadConst(cur.u16()?),
            LOAD_LOCAL => Op::LoadLocal(cur.u8()?),
            STORE_LOCAL => Op::StoreLocal(cur.u8()?),
            POP => Op::Pop,
            DUP => Op::Dup,
            ADD => Op::Add,
            SUB => Op::Sub,
            MUL => Op::Mul,
            DIV => Op::Div,
            NEG => Op::Neg,
            EQ => Op::Eq,
            NE => Op::Ne,
            LT => Op::Lt,
            LE => Op::Le,
            GT => Op::Gt,
            GE => Op::Ge,
            JUMP => Op::Jump(cur.u16()?),
            JUMP_IF_FALSE => Op::JumpIfFalse(cur.u16()?),
            CALL => Op::Call {
                func: cur.u16()?,
                argc: cur.u8()?,
            },
            TAIL_CALL => Op::TailCall {
                func: cur.u16()?,
                argc: cur.u8()?,
            },
            RETURN => Op::Return,
            MAKE_SOME => Op::MakeSome,
            MAKE_NONE => Op::MakeNone,
            MAKE_OK => Op::MakeOk,
            MAKE_ERR => Op::MakeErr,
            STR_CONCAT => Op::StrConcat,
            LIST_NEW => Op::ListNew(cur.u16()?),
            LIST_GET => Op::ListGet,
            LIST_PUSH => Op::ListPush,
            MAP_NEW => Op::MapNew(cur.u16()?),
            MAP_GET => Op::MapGet,
            MAP_SET => Op::MapSet,
            RECORD_NEW => Op::RecordNew(cur.u16()?),
            RECORD_GET => Op::RecordGet(cur.u16()?),
            JSON_PARSE => Op::JsonParse,
            JSON_STRINGIFY => Op::JsonStringify,
            SHA256_HEX => Op::Sha256Hex,
            EFFECT => Op::Effect {
                name: cur.u16()?,
                cont_id: cur.u32()?,
                argc: cur.u8()?,
            },
            other => return Err(CodecError::UnknownOpcode(other, at)),
        };
        ops.push(op);
    }
    Ok(ops)
}

/// Encode an instruction sequence (packaging tools and tests).
pub fn encode_ops(ops: &[Op]) -> Vec<u8> {
    use bytes::*;
    let mut out = Vec::with_capacity(ops.len() * 2);
    for op in ops {
        match *op {
            Op::Nop => out.push(NOP),
            Op::LoadConst(i) => {
                out.push(LOAD_CONST);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Op::LoadLocal(i) => {
                out.push(LOAD_LOCAL);
                out.push(i);
            }
            Op::StoreLocal(i) => {
                out.push(STORE_LOCAL);
                out.push(i);
            }
            Op::Pop => out.push(POP),
            Op::Dup => out.push(DUP),
            Op::Add => out.push(ADD),
            Op::Sub => out.push(SUB),
            Op::Mul => out.push(MUL),
            Op::Div => out.push(DIV),
            Op::Neg => out.push(NEG),
            Op::Eq => out.push(EQ),
            Op::Ne => out.push(NE),
            Op::Lt => out.push(LT),
            Op::Le => out.push(LE),
            Op::Gt => out.push(GT),
            Op::Ge => out.push(GE),
            Op::Jump(t) => {
                out.push(JUMP);
                out.extend_from_slice(&t.to_le_bytes());
            }
            Op::JumpIfFalse(t) => {
                out.push(JUMP_IF_FALSE);
                out.extend_from_slice(&t.to_le_bytes());
            }
            Op::Call { func, argc } => {
                out.push(CALL);
                out.extend_from_slice(&func.to_le_bytes());
                out.push(argc);
            }
            Op::TailCall { func, argc } => {
                out.push(TAIL_CALL);
                out.extend_from_slice(&func.to_le_bytes());
                out.push(argc);
            }
            Op::Return => out.push(RETURN),
            Op::MakeSome => out.push(MAKE_SOME),
            Op::MakeNone => out.push(MAKE_NONE),
            Op::MakeOk => out.push(MAKE_OK),
            Op::MakeErr => out.push(MAKE_ERR),
            Op::StrConcat => out.push(STR_CONCAT),
            Op::ListNew(n) => {
                out.push(LIST_NEW);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Op::ListGet => out.push(LIST_GET),
            Op::ListPush => out.push(LIST_PUSH),
            Op::MapNew(n) => {
                out.push(MAP_NEW);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Op::MapGet => out.push(MAP_GET),
            Op::MapSet => out.push(MAP_SET),
            Op::RecordNew(n) => {
                out.push(RECORD_NEW);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Op::RecordGet(i) => {
                out.push(RECORD_GET);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Op::JsonParse => out.push(JSON_PARSE),
            Op::JsonStringify => out.push(JSON_STRINGIFY),
            Op::Sha256Hex => out.push(SHA256_HEX),
            Op::Effect { name, cont_id, argc } => {
                out.push(EFFECT);
                out.extend_from_slice(&name.to_le_bytes());
                out.extend_from_slice(&cont_id.to_le_bytes());
                out.push(argc);
            }
        }
    }
    out
}
