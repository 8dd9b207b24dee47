//! Resumable stack machine.
//!
//! Single-threaded, cooperative: the only suspension points are `Effect`
//! opcodes, where control returns to the host with an `EffectRequest`; the
//! host resumes the machine with the (cached or fresh) result value. Gas is
//! charged before every opcode; memory is charged on every allocation.
//! Traps are deterministic: for fixed (program, input, limit) the opcode at
//! which a trap fires is a pure function.
//!
//! No RNG, no I/O, no clock. Inputs are validated upstream; this module
//! still enforces the invariants defensively and returns structured traps
//! (no silent fixes).

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use msq_core::decimal::Decimal;
use msq_core::errors::{ErrorKind, Trap};
use msq_core::gas::{GasClass, GasMeter};
use msq_core::value::{check_int, MapKey, Value};

use msq_io::canonical_json;
use msq_io::hasher;

use crate::opcode::{effect_gas_class, Op};
use crate::program::{Const, Function, Program};

/// One suspended effect invocation, handed to the host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EffectRequest {
    pub name: String,
    /// Compiler-assigned continuation id (source-encounter order).
    pub cont_id: u32,
    pub args: Vec<Value>,
    /// Declared-effects set of the invoking function; the registry enforces
    /// membership before any handler runs.
    pub declared: BTreeSet<String>,
}

/// Outcome of driving the machine until it yields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Step {
    Done(Value),
    Effect(EffectRequest),
}

struct Frame {
    func: usize,
    ip: usize,
    locals: Vec<Value>,
}

pub struct Machine<'p> {
    program: &'p Program,
    frames: Vec<Frame>,
    stack: Vec<Value>,
    meter: GasMeter,
    mem_used: u64,
    mem_budget: u64,
    cancelled: bool,
    /// Host-set flag polled between opcodes (adapter timeouts).
    cancel_flag: Option<Arc<AtomicBool>>,
    awaiting_effect: bool,
}

impl<'p> Machine<'p> {
    /// Build a machine over a verified program. The entry function receives
    /// `input` as its first parameter when it declares one.
    pub fn new(program: &'p Program, input: Value, gas_limit: u64, mem_budget: u64) -> Machine<'p> {
        let entry = &program.funcs[program.entry as usize];
        let mut locals = Vec::with_capacity(usize::from(entry.param_count) + usize::from(entry.local_count));
        if entry.param_count >= 1 {
            locals.push(input);
        }
        while locals.len() < usize::from(entry.param_count) + usize::from(entry.local_count) {
            locals.push(Value::None);
        }
        Machine {
            program,
            frames: vec![Frame {
                func: program.entry as usize,
                ip: 0,
                locals,
            }],
            stack: Vec::new(),
            meter: GasMeter::new(gas_limit),
            mem_used: 0,
            mem_budget,
            cancelled: false,
            cancel_flag: None,
            awaiting_effect: false,
        }
    }

    /// Attach a flag another thread (the host adapter) may set; observed
    /// only between opcodes, never tearing an allocation.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel_flag = Some(flag);
    }

    pub fn gas_used(&self) -> u64 {
        self.meter.gas_used()
    }

    pub fn mem_used(&self) -> u64 {
        self.mem_used
    }

    /// Host-initiated cancellation; observed between opcodes only.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Resume after an effect suspension with the effect's result value.
    pub fn resume(&mut self, result: Value) -> Result<Step, Trap> {
        if !self.awaiting_effect {
            return Err(Trap::new(
                ErrorKind::Internal,
                "resume without a pending effect",
            ));
        }
        self.awaiting_effect = false;
        self.charge_mem(&result)?;
        self.stack.push(result);
        self.run()
    }

    /// Drive the machine until it completes, suspends on an effect, or traps.
    pub fn run(&mut self) -> Result<Step, Trap> {
        if self.awaiting_effect {
            return Err(Trap::new(ErrorKind::Internal, "run while awaiting effect"));
        }
        loop {
            if self.cancelled
                || self
                    .cancel_flag
                    .as_ref()
                    .is_some_and(|f| f.load(Ordering::Relaxed))
            {
                return Err(Trap::new(ErrorKind::Cancelled, "cancelled by host"));
            }
            let frame = self
                .frames
                .last()
                .ok_or_else(|| Trap::new(ErrorKind::Internal, "run after completion"))?;
            let func = &self.program.funcs[frame.func];
            let op = func.ops[frame.ip];

            let class = self.gas_class_for(op);
            self.meter.charge(class)?;
            self.frames.last_mut().expect("frame checked above").ip += 1;

            if let Some(step) = self.exec(op)? {
                return Ok(step);
            }
        }
    }

    /// Gas class resolution that inspects operands where the table says the
    /// cost depends on them (string consts, string comparison, effects).
    fn gas_class_for(&self, op: Op) -> GasClass {
        match op {
            Op::LoadConst(i) => match self.program.consts.get(usize::from(i)) {
                Some(Const::Str(_)) => GasClass::StrCreate,
                _ => GasClass::Load,
            },
            Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                let n = self.stack.len();
                if n >= 2
                    && matches!(self.stack[n - 1], Value::Str(_))
                    && matches!(self.stack[n - 2], Value::Str(_))
                {
                    GasClass::StrCompare
                } else {
                    op.gas_class()
                }
            }
            Op::Effect { name, .. } => match self.program.consts.get(usize::from(name)) {
                Some(Const::Str(s)) => effect_gas_class(s),
                _ => GasClass::EffectAsync,
            },
            other => other.gas_class(),
        }
    }

    fn pop(&mut self) -> Result<Value, Trap> {
        self.stack
            .pop()
            .ok_or_else(|| Trap::new(ErrorKind::Internal, "stack underflow"))
    }

    fn charge_mem(&mut self, v: &Value) -> Result<(), Trap> {
        self.mem_used = self.mem_used.saturating_add(v.approx_size());
        if self.mem_used > self.mem_budget {
            return Err(Trap::new(
                ErrorKind::MemoryLimitExceeded,
                "per-request heap budget exceeded",
            ));
        }
        Ok(())
    }

    fn push_alloc(&mut self, v: Value) -> Result<(), Trap> {
        self.charge_mem(&v)?;
        self.stack.push(v);
        Ok(())
    }

    fn const_value(&self, idx: u16) -> Value {
        match &self.program.consts[usize::from(idx)] {
            Const::Int(n) => Value::Int(*n),
            Const::Str(s) => Value::Str(s.clone()),
            Const::Dec(d) => Value::Dec(d.clone()),
            Const::Bool(b) => Value::Bool(*b),
        }
    }

    fn const_str(&self, idx: u16) -> &str {
        match &self.program.consts[usize::from(idx)] {
            Const::Str(s) => s,
            // Verifier guarantees string consts behind names.
            _ => "",
        }
    }

    fn current_func(&self) -> &Function {
        let frame = self.frames.last().expect("machine has a frame");
        &self.program.funcs[frame.func]
    }

    fn exec(&mut self, op: Op) -> Result<Option<Step>, Trap> {
        match op {
            Op::Nop => {}
            Op::LoadConst(i) => {
                let v = self.const_value(i);
                self.push_alloc(v)?;
            }
            Op::LoadLocal(i) => {
                let frame = self.frames.last().expect("machine has a frame");
                let v = frame.locals[usize::from(i)].clone();
                self.stack.push(v);
            }
            Op::StoreLocal(i) => {
                let v = self.pop()?;
                let frame = self.frames.last_mut().expect("machine has a frame");
                frame.locals[usize::from(i)] = v;
            }
            Op::Pop => {
                self.pop()?;
            }
            Op::Dup => {
                let v = self.pop()?;
                self.stack.push(v.clone());
                self.stack.push(v);
            }

            Op::Add | Op::Sub | Op::Mul | Op::Div => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let v = arith(op, lhs, rhs)?;
                self.stack.push(v);
            }
            Op::Neg => {
                let v = self.pop()?;
                let out = match v {
                    Value::Int(n) => Value::Int(
                        check_int(n.checked_neg().ok_or_else(overflow)?)
                            .map_err(|k| Trap::new(k, "integer negation overflow"))?,
                    ),
                    Value::Dec(d) => Value::Dec(
                        Decimal::zero()
                            .sub(&d)
                            .map_err(|e| Trap::new(e.kind(), e.to_string()))?,
                    ),
                    other => return Err(type_error("neg", &other)),
                };
                self.stack.push(out);
            }

            Op::Eq | Op::Ne => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                if lhs.type_name() != rhs.type_name() {
                    return Err(Trap::new(
                        ErrorKind::ForbiddenSyntax,
                        format!(
                            "equality between {} and {} has no implicit coercion",
                            lhs.type_name(),
                            rhs.type_name()
                        ),
                    ));
                }
                let eq = lhs == rhs;
                self.stack
                    .push(Value::Bool(if matches!(op, Op::Eq) { eq } else { !eq }));
            }
            Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let ord = compare(&lhs, &rhs)?;
                let b = match op {
                    Op::Lt => ord.is_lt(),
                    Op::Le => ord.is_le(),
                    Op::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                };
                self.stack.push(Value::Bool(b));
            }

            Op::Jump(t) => {
                self.frames.last_mut().expect("machine has a frame").ip = usize::from(t);
            }
            Op::JumpIfFalse(t) => {
                let cond = self.pop()?;
                match cond {
                    Value::Bool(false) => {
                        self.frames.last_mut().expect("machine has a frame").ip = usize::from(t);
                    }
                    Value::Bool(true) => {}
                    other => return Err(type_error("branch condition", &other)),
                }
            }

            Op::Call { func, argc } => {
                let frame = new_frame(self.program, func, argc, &mut self.stack)?;
                self.frames.push(frame);
            }
            Op::TailCall { func, argc } => {
                let frame = new_frame(self.program, func, argc, &mut self.stack)?;
                *self.frames.last_mut().expect("machine has a frame") = frame;
            }
            Op::Return => {
                let v = self.pop()?;
                self.frames.pop();
                if self.frames.is_empty() {
                    return Ok(Some(Step::Done(v)));
                }
                self.stack.push(v);
            }

            Op::MakeSome => {
                let v = self.pop()?;
                self.push_alloc(Value::Some(Box::new(v)))?;
            }
            Op::MakeNone => self.push_alloc(Value::None)?,
            Op::MakeOk => {
                let v = self.pop()?;
                self.push_alloc(Value::Ok(Box::new(v)))?;
            }
            Op::MakeErr => {
                let v = self.pop()?;
                self.push_alloc(Value::Err(Box::new(v)))?;
            }

            Op::StrConcat => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                match (lhs, rhs) {
                    (Value::Str(a), Value::Str(b)) => {
                        self.push_alloc(Value::Str(a + &b))?;
                    }
                    (a, _) => return Err(type_error("string concat", &a)),
                }
            }

            Op::ListNew(n) => {
                let mut items = Vec::with_capacity(usize::from(n));
                for _ in 0..n {
                    items.push(self.pop()?);
                }
                items.reverse();
                self.push_alloc(Value::List(items))?;
            }
            Op::ListGet => {
                let idx = self.pop()?;
                let list = self.pop()?;
                match (list, idx) {
                    (Value::List(items), Value::Int(i)) => {
                        let v = usize::try_from(i)
                            .ok()
                            .and_then(|i| items.get(i).cloned());
                        self.stack.push(match v {
                            Some(v) => Value::Some(Box::new(v)),
                            None => Value::None,
                        });
                    }
                    (l, _) => return Err(type_error("list access", &l)),
                }
            }
            Op::ListPush => {
                let v = self.pop()?;
                let list = self.pop()?;
                match list {
                    Value::List(mut items) => {
                        self.charge_mem(&v)?;
                        items.push(v);
                        self.stack.push(Value::List(items));
                    }
                    other => return Err(type_error("list push", &other)),
                }
            }

            Op::MapNew(n) => {
                let mut map = std::collections::BTreeMap::new();
                for _ in 0..n {
                    let v = self.pop()?;
                    let k = self.pop()?;
                    map.insert(map_key(k)?, v);
                }
                self.push_alloc(Value::Map(map))?;
            }
            Op::MapGet => {
                let k = self.pop()?;
                let m = self.pop()?;
                match m {
                    Value::Map(map) => {
                        let v = map.get(&map_key(k)?).cloned();
                        self.stack.push(match v {
                            Some(v) => Value::Some(Box::new(v)),
                            None => Value::None,
                        });
                    }
                    other => return Err(type_error("map access", &other)),
                }
            }
            Op::MapSet => {
                let v = self.pop()?;
                let k = self.pop()?;
                let m = self.pop()?;
                match m {
                    Value::Map(mut map) => {
                        self.charge_mem(&v)?;
                        map.insert(map_key(k)?, v);
                        self.stack.push(Value::Map(map));
                    }
                    other => return Err(type_error("map set", &other)),
                }
            }

            Op::RecordNew(n) => {
                let mut fields = Vec::with_capacity(usize::from(n));
                for _ in 0..n {
                    let v = self.pop()?;
                    let k = self.pop()?;
                    match k {
                        Value::Str(name) => fields.push((name, v)),
                        other => return Err(type_error("record field name", &other)),
                    }
                }
                fields.reverse();
                self.push_alloc(Value::Record(fields))?;
            }
            Op::RecordGet(i) => {
                let name = self.const_str(i).to_string();
                let r = self.pop()?;
                match r {
                    Value::Record(fields) => {
                        match fields.into_iter().find(|(k, _)| *k == name) {
                            Some((_, v)) => self.stack.push(v),
                            None => {
                                return Err(Trap::new(
                                    ErrorKind::ForbiddenSyntax,
                                    format!("record has no field {name}"),
                                ))
                            }
                        }
                    }
                    other => return Err(type_error("record access", &other)),
                }
            }

            Op::JsonParse => {
                let v = self.pop()?;
                match v {
                    Value::Str(text) => {
                        let json = canonical_json::parse(&text)
                            .map_err(|e| Trap::new(e.kind(), e.to_string()))?;
                        self.push_alloc(Value::from_json(&json))?;
                    }
                    other => return Err(type_error("json parse", &other)),
                }
            }
            Op::JsonStringify => {
                let v = self.pop()?;
                let text = canonical_json::to_canonical_string(&v.to_json());
                self.push_alloc(Value::Str(text))?;
            }

            Op::Sha256Hex => {
                let v = self.pop()?;
                match v {
                    Value::Str(s) => {
                        self.push_alloc(Value::Str(hasher::sha256_hex(s.as_bytes())))?;
                    }
                    other => return Err(type_error("sha256", &other)),
                }
            }

            Op::Effect { name, cont_id, argc } => {
                let mut args = Vec::with_capacity(usize::from(argc));
                for _ in 0..argc {
                    args.push(self.pop()?);
                }
                args.reverse();
                let name = self.const_str(name).to_string();
                let declared = self.current_func().declared_effects.clone();
                self.awaiting_effect = true;
                return Ok(Some(Step::Effect(EffectRequest {
                    name,
                    cont_id,
                    args,
                    declared,
                })));
            }
        }
        Ok(None)
    }
}

fn new_frame(
    program: &Program,
    func: u16,
    argc: u8,
    stack: &mut Vec<Value>,
) -> Result<Frame, Trap> {
    let callee = &program.funcs[usize::from(func)];
    let total = usize::from(callee.param_count) + usize::from(callee.local_count);
    let mut locals = Vec::with_capacity(total);
    for _ in 0..argc {
        locals.push(
            stack
                .pop()
                .ok_or_else(|| Trap::new(ErrorKind::Internal, "stack underflow on call"))?,
        );
    }
    locals.reverse();
    while locals.len() < total {
        locals.push(Value::None);
    }
    Ok(Frame {
        func: usize::from(func),
        ip: 0,
        locals,
    })
}

fn overflow() -> Trap {
    Trap::new(ErrorKind::IntegerOverflow, "integer outside the safe range")
}

fn type_error(what: &str, got: &Value) -> Trap {
    Trap::new(
        ErrorKind::ForbiddenSyntax,
        format!("{what} cannot apply to {}", got.type_name()),
    )
}

fn map_key(v: Value) -> Result<MapKey, Trap> {
    match v {
        Value::Int(n) => Ok(MapKey::Int(n)),
        Value::Str(s) => Ok(MapKey::Str(s)),
        Value::Bool(b) => Ok(MapKey::Bool(b)),
        Value::Dec(d) => Ok(MapKey::Dec(d)),
        other => Err(Trap::new(
            ErrorKind::ForbiddenSyntax,
            format!("{} is not a primitive map key", other.type_name()),
        )),
    }
}

fn arith(op: Op, lhs: Value, rhs: Value) -> Result<Value, Trap> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let raw = match op {
                Op::Add => a.checked_add(b),
                Op::Sub => a.checked_sub(b),
                Op::Mul => a.checked_mul(b),
                Op::Div => {
                    if b == 0 {
                        return Err(Trap::new(
                            ErrorKind::DecimalDivByZero,
                            "integer division by zero",
                        ));
                    }
                    a.checked_div(b)
                }
                _ => unreachable!("arith called with non-arith op"),
            };
            let n = raw.ok_or_else(overflow)?;
            Ok(Value::Int(
                check_int(n).map_err(|k| Trap::new(k, "integer outside the safe range"))?,
            ))
        }
        (Value::Dec(a), Value::Dec(b)) => {
            let r = match op {
                Op::Add => a.add(&b),
                Op::Sub => a.sub(&b),
                Op::Mul => a.mul(&b),
                Op::Div => a.div(&b),
                _ => unreachable!("arith called with non-arith op"),
            };
            Ok(Value::Dec(r.map_err(|e| Trap::new(e.kind(), e.to_string()))?))
        }
        (a, b) => Err(Trap::new(
            ErrorKind::ForbiddenSyntax,
            format!(
                "arithmetic between {} and {} has no implicit coercion",
                a.type_name(),
                b.type_name()
            ),
        )),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, Trap> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Dec(a), Value::Dec(b)) => Ok(a.cmp_numeric(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (a, b) => Err(Trap::new(
            ErrorKind::ForbiddenSyntax,
            format!(
                "ordering between {} and {} has no implicit coercion",
                a.type_name(),
                b.type_name()
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Const, Function, Program};
    use std::collections::BTreeSet;

    const MEM: u64 = 8 << 20;

    fn prog(consts: Vec<Const>, ops: Vec<Op>) -> Program {
        let mut consts = consts;
        consts.insert(0, Const::Str("main".to_string()));
        let shifted = ops
            .into_iter()
            .map(|op| match op {
                Op::LoadConst(i) => Op::LoadConst(i + 1),
                Op::RecordGet(i) => Op::RecordGet(i + 1),
                Op::Effect { name, cont_id, argc } => Op::Effect {
                    name: name + 1,
                    cont_id,
                    argc,
                },
                other => other,
            })
            .collect();
        Program {
            consts,
            funcs: vec![Function {
                name: "main".to_string(),
                declared_effects: BTreeSet::new(),
                param_count: 0,
                local_count: 0,
                ops: shifted,
            }],
            entry: 0,
        }
    }

    fn run_done(p: &Program, gas: u64) -> Result<(Value, u64), Trap> {
        let mut m = Machine::new(p, Value::None, gas, MEM);
        match m.run()? {
            Step::Done(v) => Ok((v, m.gas_used())),
            Step::Effect(e) => panic!("unexpected effect {e:?}"),
        }
    }

    #[test]
    fn const_return() {
        let p = prog(vec![Const::Int(42)], vec![Op::LoadConst(0), Op::Return]);
        let (v, gas) = run_done(&p, 10_000).unwrap();
        assert_eq!(v, Value::Int(42));
        assert_eq!(gas, 2); // load 1 + return 1
    }

    #[test]
    fn decimal_addition_canonicalises() {
        let p = prog(
            vec![
                Const::Dec(Decimal::parse("10.50").unwrap()),
                Const::Dec(Decimal::parse("5.25").unwrap()),
            ],
            vec![Op::LoadConst(0), Op::LoadConst(1), Op::Add, Op::Return],
        );
        let (v, _) = run_done(&p, 10_000).unwrap();
        match v {
            Value::Dec(d) => assert_eq!(d.canonical_string(), "15.75"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn mixed_arithmetic_is_a_type_error() {
        let p = prog(
            vec![Const::Int(1), Const::Str("1".to_string())],
            vec![Op::LoadConst(0), Op::LoadConst(1), Op::Add, Op::Return],
        );
        let trap = run_done(&p, 10_000).unwrap_err();
        assert_eq!(trap.kind, ErrorKind::ForbiddenSyntax);
    }

    #[test]
    fn gas_exhaustion_is_deterministic() {
        // Repeated adds; with a tight limit the trap fires at a fixed point.
        let mut ops = vec![Op::LoadConst(0)];
        for _ in 0..1000 {
            ops.push(Op::LoadConst(0));
            ops.push(Op::Add);
        }
        ops.push(Op::Return);
        let p = prog(vec![Const::Int(1)], ops);

        let a = run_done(&p, 500).unwrap_err();
        let b = run_done(&p, 500).unwrap_err();
        assert_eq!(a.kind, ErrorKind::GasExhausted);
        assert_eq!(a, b);
        // A generous limit succeeds and reports deterministic usage.
        let (v1, used1) = run_done(&p, 100_000).unwrap();
        let (v2, used2) = run_done(&p, 100_000).unwrap();
        assert_eq!(v1, v2);
        assert_eq!(used1, used2);
        // Reducing the limit below the observed usage converts success into
        // exhaustion.
        assert_eq!(run_done(&p, used1 - 1).unwrap_err().kind, ErrorKind::GasExhausted);
    }

    #[test]
    fn integer_overflow_traps() {
        let p = prog(
            vec![Const::Int(msq_core::MAX_SAFE_INT), Const::Int(1)],
            vec![Op::LoadConst(0), Op::LoadConst(1), Op::Add, Op::Return],
        );
        assert_eq!(
            run_done(&p, 10_000).unwrap_err().kind,
            ErrorKind::IntegerOverflow
        );
    }

    #[test]
    fn division_by_zero_traps() {
        let p = prog(
            vec![Const::Int(1), Const::Int(0)],
            vec![Op::LoadConst(0), Op::LoadConst(1), Op::Div, Op::Return],
        );
        assert_eq!(
            run_done(&p, 10_000).unwrap_err().kind,
            ErrorKind::DecimalDivByZero
        );
    }

    #[test]
    fn effects_suspend_and_resume() {
        let mut p = prog(
            vec![Const::Str("Log".to_string()), Const::Str("hi".to_string())],
            vec![
                Op::LoadConst(1),
                Op::Effect {
                    name: 0,
                    cont_id: 1,
                    argc: 1,
                },
                Op::Return,
            ],
        );
        p.funcs[0].declared_effects.insert("Log".to_string());
        let mut m = Machine::new(&p, Value::None, 10_000, MEM);
        let step = m.run().unwrap();
        let req = match step {
            Step::Effect(req) => req,
            other => panic!("{other:?}"),
        };
        assert_eq!(req.name, "Log");
        assert_eq!(req.cont_id, 1);
        assert_eq!(req.args, vec![Value::str("hi")]);
        assert!(req.declared.contains("Log"));

        match m.resume(Value::None).unwrap() {
            Step::Done(v) => assert_eq!(v, Value::None),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn tail_calls_do_not_grow_frames_or_gas() {
        // f(n): tail-call g; g returns its argument.
        let p = Program {
            consts: vec![
                Const::Str("main".to_string()),
                Const::Str("g".to_string()),
                Const::Int(7),
            ],
            funcs: vec![
                Function {
                    name: "main".to_string(),
                    declared_effects: BTreeSet::new(),
                    param_count: 0,
                    local_count: 0,
                    ops: vec![Op::LoadConst(2), Op::TailCall { func: 1, argc: 1 }],
                },
                Function {
                    name: "g".to_string(),
                    declared_effects: BTreeSet::new(),
                    param_count: 1,
                    local_count: 0,
                    ops: vec![Op::LoadLocal(0), Op::Return],
                },
            ],
            entry: 0,
        };
        let mut m = Machine::new(&p, Value::None, 100, MEM);
        match m.run().unwrap() {
            Step::Done(v) => assert_eq!(v, Value::Int(7)),
            other => panic!("{other:?}"),
        }
        // load(1) + tailcall(0) + load(1) + return(1)
        assert_eq!(m.gas_used(), 3);
    }

    #[test]
    fn json_parse_duplicate_key_traps() {
        let p = prog(
            vec![Const::Str(r#"{"a":1,"a":2}"#.to_string())],
            vec![Op::LoadConst(0), Op::JsonParse, Op::Return],
        );
        assert_eq!(
            run_done(&p, 10_000).unwrap_err().kind,
            ErrorKind::JsonDuplicateKey
        );
    }

    #[test]
    fn json_stringify_is_canonical() {
        let p = prog(
            vec![
                Const::Str("b".to_string()),
                Const::Int(2),
                Const::Str("a".to_string()),
                Const::Int(1),
            ],
            vec![
                Op::LoadConst(0),
                Op::LoadConst(1),
                Op::LoadConst(2),
                Op::LoadConst(3),
                Op::MapNew(2),
                Op::JsonStringify,
                Op::Return,
            ],
        );
        let (v, _) = run_done(&p, 10_000).unwrap();
        assert_eq!(v, Value::str(r#"{"a":1,"b":2}"#));
    }

    #[test]
    fn memory_budget_traps() {
        // Build a 64-byte string and concatenate it onto itself repeatedly;
        // the budget line is crossed long before gas runs out.
        let chunk = "x".repeat(64);
        let p = prog(
            vec![Const::Str(chunk)],
            {
                let mut ops = vec![Op::LoadConst(0)];
                for _ in 0..64 {
                    ops.push(Op::Dup);
                    ops.push(Op::StrConcat);
                }
                ops.push(Op::Return);
                ops
            },
        );
        let mut m = Machine::new(&p, Value::None, 1_000_000, 1 << 20);
        let trap = m.run().unwrap_err();
        assert_eq!(trap.kind, ErrorKind::MemoryLimitExceeded);
    }

    #[test]
    fn cancellation_observed_between_opcodes() {
        let p = prog(vec![Const::Int(1)], vec![Op::LoadConst(0), Op::Return]);
        let mut m = Machine::new(&p, Value::None, 100, MEM);
        m.cancel();
        assert_eq!(m.run().unwrap_err().kind, ErrorKind::Cancelled);
    }

    #[test]
    fn sha256_builtin_matches_hasher() {
        let p = prog(
            vec![Const::Str("42".to_string())],
            vec![Op::LoadConst(0), Op::Sha256Hex, Op::Return],
        );
        let (v, _) = run_done(&p, 10_000).unwrap();
        assert_eq!(v, Value::str(hasher::sha256_hex(b"42")));
    }
}
