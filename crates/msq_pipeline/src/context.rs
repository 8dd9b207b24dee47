//! Per-request execution context.
//!
//! One context per request, pinned to one thread, sharing nothing. The
//! state machine is one-way:
//!
//! ```text
//! Fresh → Bootstrapped → Running → {Completed | Trapped} → Wiped → Released
//! ```
//!
//! `Trapped` still requires `Wiped` before release; dropping an un-wiped
//! context wipes it defensively. The wipe pass overwrites the seed and every
//! cached effect outcome and closes all pooled connections; no allocator
//! reuse across requests is permitted without a prior wipe.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use msq_core::errors::{ErrorKind, Trap};
use msq_core::{EngineConfig, Request, Value};
use msq_effects::{DeterminismCache, EffectContext, Registry};
use msq_io::seed::derive_seed;
use msq_io::snapshot::Snapshot;
use msq_io::wipe::secure_wipe;
use msq_vm::{Machine, Program, Step};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContextState {
    Fresh,
    Bootstrapped,
    Running,
    Completed,
    Trapped,
    Wiped,
    Released,
}

pub struct Context<'s> {
    snapshot: &'s Snapshot,
    config: EngineConfig,
    state: ContextState,
    seed: [u8; 32],
    gas_limit: u64,
    gas_used: u64,
    registry: Registry,
    cache: DeterminismCache,
    effects: Option<EffectContext>,
    cancel_flag: Option<Arc<AtomicBool>>,
    outcome: Option<Result<Value, Trap>>,
}

impl<'s> Context<'s> {
    /// Fresh context over a verified snapshot. The snapshot stays owned by
    /// the host; the context only borrows it.
    pub fn new(snapshot: &'s Snapshot, config: EngineConfig) -> Result<Context<'s>, Trap> {
        config.validate()?;
        Ok(Context {
            snapshot,
            config,
            state: ContextState::Fresh,
            seed: [0u8; 32],
            gas_limit: 0,
            gas_used: 0,
            registry: Registry::new(),
            cache: DeterminismCache::new(),
            effects: None,
            cancel_flag: None,
            outcome: None,
        })
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    pub fn cache(&self) -> &DeterminismCache {
        &self.cache
    }

    fn expect_state(&self, want: ContextState, doing: &str) -> Result<(), Trap> {
        if self.state != want {
            return Err(Trap::new(
                ErrorKind::Internal,
                format!("{doing} in state {:?}", self.state),
            ));
        }
        Ok(())
    }

    /// Install the effect runtime, inject the gas budget, derive the seed.
    /// Registration is one-shot: the registry is built here and never again.
    pub fn bootstrap(&mut self, request: &Request, gas_limit: u64) -> Result<(), Trap> {
        self.expect_state(ContextState::Fresh, "bootstrap")?;
        self.config.validate_gas_limit(gas_limit)?;
        self.gas_limit = gas_limit;
        self.seed = derive_seed(request, self.snapshot.hash(), gas_limit);
        self.registry = Registry::with_builtins();
        self.effects = Some(EffectContext::new(
            self.seed,
            &self.config.db_path,
            self.config.verify_tls,
        ));
        self.state = ContextState::Bootstrapped;
        Ok(())
    }

    /// Host customisation window (async resolvers, transport override).
    /// Only open between bootstrap and execute.
    pub fn effects_mut(&mut self) -> Result<&mut EffectContext, Trap> {
        self.expect_state(ContextState::Bootstrapped, "customise effects")?;
        Ok(self.effects.as_mut().expect("bootstrapped context has effects"))
    }

    /// Attach a host cancellation flag (observed between opcodes).
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel_flag = Some(flag);
    }

    /// Run the program entry point against the request. Every effect call
    /// flows through the registry (declared-set check, determinism cache,
    /// backend on miss). Terminal state is `Completed` or `Trapped`; the
    /// outcome is retrievable until the wipe.
    pub fn execute(&mut self, request: &Request) -> Result<(), Trap> {
        self.expect_state(ContextState::Bootstrapped, "execute")?;
        self.state = ContextState::Running;

        let result = self.drive(request);
        self.gas_used = match &result {
            Ok((_, gas)) | Err((_, gas)) => *gas,
        };
        self.state = match &result {
            Ok(_) => ContextState::Completed,
            Err(_) => ContextState::Trapped,
        };
        self.outcome = Some(match result {
            Ok((v, _)) => Ok(v),
            Err((t, _)) => Err(t),
        });
        Ok(())
    }

    fn drive(&mut self, request: &Request) -> Result<(Value, u64), (Trap, u64)> {
        let program =
            Program::load(self.snapshot.program()).map_err(|e| (Trap::new(e.kind(), e.to_string()), 0))?;
        let mut machine = Machine::new(
            &program,
            request.to_value(),
            self.gas_limit,
            self.config.memory_budget_bytes,
        );
        if let Some(flag) = &self.cancel_flag {
            machine.set_cancel_flag(flag.clone());
        }
        let effects = self
            .effects
            .as_mut()
            .expect("running context has effects");

        let mut step = machine.run();
        loop {
            match step {
                Ok(Step::Done(value)) => return Ok((value, machine.gas_used())),
                Ok(Step::Effect(req)) => {
                    let result = self
                        .registry
                        .dispatch(
                            effects,
                            &mut self.cache,
                            &req.name,
                            req.cont_id,
                            &req.args,
                            &req.declared,
                        )
                        .map_err(|t| (t, machine.gas_used()))?;
                    step = machine.resume(result);
                }
                Err(trap) => return Err((trap, machine.gas_used())),
            }
        }
    }

    /// Terminal outcome; present between execute and wipe.
    pub fn outcome(&self) -> Option<&Result<Value, Trap>> {
        self.outcome.as_ref()
    }

    /// Multi-pass wipe of everything request-scoped: seed, effect cache,
    /// pooled connections, and the captured outcome. Legal from any state
    /// before `Wiped` (aborts included).
    pub fn wipe(&mut self) -> Result<(), Trap> {
        match self.state {
            ContextState::Wiped | ContextState::Released => {
                return Err(Trap::new(ErrorKind::Internal, "double wipe"));
            }
            ContextState::Running => {
                return Err(Trap::new(ErrorKind::Internal, "wipe while running"));
            }
            _ => {}
        }
        self.cache.wipe();
        if let Some(effects) = self.effects.as_mut() {
            effects.teardown();
        }
        self.effects = None;
        secure_wipe(&mut self.seed);
        self.outcome = None;
        self.state = ContextState::Wiped;
        Ok(())
    }

    /// Final transition; consumes the context.
    pub fn release(mut self) -> Result<(), Trap> {
        self.expect_state(ContextState::Wiped, "release")?;
        self.state = ContextState::Released;
        Ok(())
    }
}

impl Drop for Context<'_> {
    fn drop(&mut self) {
        // A context that never reached Wiped is wiped here; releasing an
        // un-wiped heap back to the allocator is not permitted.
        if !matches!(self.state, ContextState::Wiped | ContextState::Released) {
            let _ = self.wipe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msq_core::Method;
    use msq_io::snapshot;
    use msq_vm::{Const, Function, Op};
    use ring::rand::SystemRandom;
    use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
    use std::collections::BTreeSet;

    fn make_snapshot(program: &Program) -> (Vec<u8>, Vec<u8>) {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
        let pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .unwrap();
        let meta = r#"{"name":"test"}"#;
        let bytes = program.encode();
        let sig = pair
            .sign(&rng, &snapshot::signed_region(meta.as_bytes(), &bytes))
            .unwrap();
        (
            snapshot::encode(meta, &bytes, sig.as_ref()),
            pair.public_key().as_ref().to_vec(),
        )
    }

    fn forty_two() -> Program {
        Program {
            consts: vec![Const::Str("main".to_string()), Const::Int(42)],
            funcs: vec![Function {
                name: "main".to_string(),
                declared_effects: BTreeSet::new(),
                param_count: 1,
                local_count: 0,
                ops: vec![Op::LoadConst(1), Op::Return],
            }],
            entry: 0,
        }
    }

    #[test]
    fn lifecycle_happy_path() {
        let (bytes, key) = make_snapshot(&forty_two());
        let snap = Snapshot::load(&bytes, &key).unwrap();
        let req = Request::new(Method::Get, "/");
        let mut ctx = Context::new(&snap, EngineConfig::default()).unwrap();
        assert_eq!(ctx.state(), ContextState::Fresh);
        ctx.bootstrap(&req, 10_000).unwrap();
        assert_eq!(ctx.state(), ContextState::Bootstrapped);
        ctx.execute(&req).unwrap();
        assert_eq!(ctx.state(), ContextState::Completed);
        assert_eq!(ctx.outcome(), Some(&Ok(Value::Int(42))));
        assert!(ctx.gas_used() > 0);
        ctx.wipe().unwrap();
        assert_eq!(ctx.state(), ContextState::Wiped);
        ctx.release().unwrap();
    }

    #[test]
    fn transitions_are_one_way() {
        let (bytes, key) = make_snapshot(&forty_two());
        let snap = Snapshot::load(&bytes, &key).unwrap();
        let req = Request::new(Method::Get, "/");
        let mut ctx = Context::new(&snap, EngineConfig::default()).unwrap();
        // Execute before bootstrap is an internal error.
        assert!(ctx.execute(&req).is_err());
        ctx.bootstrap(&req, 10_000).unwrap();
        assert!(ctx.bootstrap(&req, 10_000).is_err());
        ctx.execute(&req).unwrap();
        ctx.wipe().unwrap();
        assert!(ctx.wipe().is_err());
    }

    #[test]
    fn wipe_clears_seed_and_outcome() {
        let (bytes, key) = make_snapshot(&forty_two());
        let snap = Snapshot::load(&bytes, &key).unwrap();
        let req = Request::new(Method::Get, "/").with_header("x-request-id", "r1");
        let mut ctx = Context::new(&snap, EngineConfig::default()).unwrap();
        ctx.bootstrap(&req, 10_000).unwrap();
        assert_ne!(ctx.seed(), &[0u8; 32]);
        ctx.execute(&req).unwrap();
        ctx.wipe().unwrap();
        assert_eq!(ctx.seed(), &[0u8; 32]);
        assert!(ctx.outcome().is_none());
        assert!(ctx.cache().is_empty());
    }

    #[test]
    fn invalid_gas_limit_rejected_at_bootstrap() {
        let (bytes, key) = make_snapshot(&forty_two());
        let snap = Snapshot::load(&bytes, &key).unwrap();
        let req = Request::new(Method::Get, "/");
        let mut ctx = Context::new(&snap, EngineConfig::default()).unwrap();
        assert!(ctx.bootstrap(&req, 0).is_err());
        let mut ctx = Context::new(&snap, EngineConfig::default()).unwrap();
        assert!(ctx.bootstrap(&req, 2_000_000_001).is_err());
    }
}
