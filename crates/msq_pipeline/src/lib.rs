//! msq_pipeline — deterministic orchestration of one request:
//! verify snapshot → create context → bootstrap (gas, seed, effects) →
//! execute (effect loop) → canonicalise + digest → wipe.
//!
//! The consolidated entrypoint (`run` / `run_with`) guarantees the fixed
//! stage order; hosts that need custom backends or async resolvers pass a
//! setup hook that runs inside the bootstrap window. Every path, failure
//! paths included, ends in a wiped context and a deterministic JSON body.

#![forbid(unsafe_code)]

pub mod context;
pub mod respond;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use msq_core::errors::{ErrorKind, Trap};
use msq_core::{EngineConfig, Request};
use msq_effects::EffectContext;
use msq_io::sig::HOST_PUBLIC_KEY;
use msq_io::snapshot::Snapshot;

pub use context::{Context, ContextState};
pub use respond::{respond_trap, respond_value, response_digest, ResponseEnvelope};

/// Everything a host adapter needs from one run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunOutcome {
    pub envelope: ResponseEnvelope,
    /// Canonical JSON body bytes (`envelope.body` as bytes).
    pub response_bytes: Vec<u8>,
    /// Lowercase-hex SHA-256 of `response_bytes`.
    pub response_sha256: String,
    pub gas_used: u64,
    /// Present when the run terminated in a trap.
    pub error: Option<ErrorKind>,
}

fn outcome_from_trap(trap: &Trap, gas_used: u64) -> RunOutcome {
    let (envelope, bytes) = respond_trap(trap);
    let digest = response_digest(&bytes);
    RunOutcome {
        envelope,
        response_sha256: digest,
        response_bytes: bytes,
        gas_used,
        error: Some(trap.kind),
    }
}

/// Run a request against snapshot bytes with the embedded host key.
pub fn run(
    snapshot_bytes: &[u8],
    request: &Request,
    gas_limit: u64,
    config: &EngineConfig,
) -> RunOutcome {
    run_with(snapshot_bytes, request, gas_limit, config, &HOST_PUBLIC_KEY, |_| {})
}

/// Full-control entrypoint: explicit verification key plus a bootstrap hook
/// for effect customisation (async resolvers, transport overrides).
pub fn run_with(
    snapshot_bytes: &[u8],
    request: &Request,
    gas_limit: u64,
    config: &EngineConfig,
    public_key: &[u8],
    setup: impl FnOnce(&mut EffectContext),
) -> RunOutcome {
    run_inner(snapshot_bytes, request, gas_limit, config, public_key, setup, None)
}

/// As `run_with`, with a host cancellation flag observed between opcodes.
pub fn run_cancellable(
    snapshot_bytes: &[u8],
    request: &Request,
    gas_limit: u64,
    config: &EngineConfig,
    public_key: &[u8],
    cancel: Arc<AtomicBool>,
) -> RunOutcome {
    run_inner(
        snapshot_bytes,
        request,
        gas_limit,
        config,
        public_key,
        |_| {},
        Some(cancel),
    )
}

fn run_inner(
    snapshot_bytes: &[u8],
    request: &Request,
    gas_limit: u64,
    config: &EngineConfig,
    public_key: &[u8],
    setup: impl FnOnce(&mut EffectContext),
    cancel: Option<Arc<AtomicBool>>,
) -> RunOutcome {
    // Stage 1–2: verify & load. Nothing executes out of an unverified
    // artifact; failures respond without a context ever existing.
    let snapshot = match Snapshot::load(snapshot_bytes, public_key) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(target: "msq_pipeline", error = %e, "snapshot rejected");
            let trap = Trap::new(e.kind(), e.to_string());
            return outcome_from_trap(&trap, 0);
        }
    };
    tracing::debug!(target: "msq_pipeline", snapshot = %snapshot.hash_hex(), gas_limit, "snapshot verified");

    let mut ctx = match Context::new(&snapshot, config.clone()) {
        Ok(c) => c,
        Err(trap) => return outcome_from_trap(&trap, 0),
    };
    if let Some(flag) = cancel {
        ctx.set_cancel_flag(flag);
    }

    // Stage 3–4: bootstrap (stdlib/effects install, gas injection, seed).
    if let Err(trap) = ctx.bootstrap(request, gas_limit) {
        let out = outcome_from_trap(&trap, 0);
        finish(ctx);
        return out;
    }
    {
        let effects = ctx.effects_mut().expect("bootstrapped context");
        setup(effects);
    }

    // Stage 5: execute.
    if let Err(trap) = ctx.execute(request) {
        let out = outcome_from_trap(&trap, ctx.gas_used());
        finish(ctx);
        return out;
    }

    // Stage 6–7: canonicalise, digest, emit.
    let gas_used = ctx.gas_used();
    let out = match ctx.outcome() {
        Some(Ok(value)) => {
            let (envelope, bytes) = respond_value(value);
            let digest = response_digest(&bytes);
            RunOutcome {
                envelope,
                response_sha256: digest,
                response_bytes: bytes,
                gas_used,
                error: None,
            }
        }
        Some(Err(trap)) => outcome_from_trap(trap, gas_used),
        None => outcome_from_trap(
            &Trap::new(ErrorKind::Internal, "context finished without an outcome"),
            gas_used,
        ),
    };

    tracing::debug!(
        target: "msq_pipeline",
        status = out.envelope.status_code,
        gas_used = out.gas_used,
        digest = %out.response_sha256,
        "request finished"
    );

    // Stage 8: secure wipe, always.
    finish(ctx);
    out
}

fn finish(mut ctx: Context<'_>) {
    if ctx.wipe().is_ok() {
        let _ = ctx.release();
    }
}
