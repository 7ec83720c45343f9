//! Blocking invocation of the verification function.
//!
//! [`blocking_verify`] turns the callback-style `verifyProof(proof, callback)`
//! into a plain blocking call returning the verdict. Every engine handle it
//! acquires is held by a [`Scoped`] guard, so the handles are released on
//! every exit path in reverse acquisition order.

use crate::callback::Delivery;
use crate::engine::{RuntimeHandle, Scoped, ScriptEngine};
use crate::error::{BridgeError, Result};
use crate::marshal;
use crate::metrics::{VerificationMetrics, VerificationTimer};
use tracing::{debug, instrument, warn};

/// Verdict plus the metrics of the call that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    /// `isVerified` as reported by the script
    pub verified: bool,
    /// Call metrics
    pub metrics: VerificationMetrics,
}

/// Run one verification against an initialized runtime handle.
///
/// Blocks the calling thread until the script's callback has fired (or the
/// configured callback timeout expires).
#[instrument(skip(runtime, proof), fields(runtime_id = %runtime.id(), proof_len = proof.len()))]
pub fn blocking_verify<E: ScriptEngine>(
    runtime: &RuntimeHandle<E>,
    proof: &[u8],
) -> Result<VerificationOutcome> {
    let engine = runtime.engine()?;
    let timer = VerificationTimer::start();
    let live_before = engine.live_handles();

    let result = verify_once(runtime, engine, proof);
    runtime.finish_call();

    let live_after = engine.live_handles();
    if live_after > live_before {
        warn!(
            before = live_before,
            after = live_after,
            "Engine handles still live after verification"
        );
    }

    let (verified, drain_iterations) = result?;
    let metrics = timer
        .into_metrics()
        .with_drain_iterations(drain_iterations)
        .with_proof_bytes(proof.len())
        .with_live_handles(live_before, live_after);

    debug!(
        verified,
        drain_iterations,
        duration_us = metrics.duration_us,
        "Proof verification finished"
    );

    Ok(VerificationOutcome { verified, metrics })
}

fn verify_once<E: ScriptEngine>(
    runtime: &RuntimeHandle<E>,
    engine: &E,
    proof: &[u8],
) -> Result<(bool, u64)> {
    let config = runtime.config();

    let native = marshal::to_native(engine, proof)?;
    let callback = Scoped::new(engine, runtime.register_callback()?);
    debug_assert!(!runtime.slot().is_filled());
    let pending = Scoped::new(
        engine,
        runtime.invoke(&config.function_name, native.handle(), callback.id())?,
    );

    let drain_iterations = runtime.drain_until_callback_fired()?;

    let outer = match runtime.slot().take() {
        Some(Delivery::Result(handle)) => Scoped::new(engine, handle),
        Some(Delivery::Missing) => {
            return Err(BridgeError::verification(
                "callback invoked without a result object",
            ))
        }
        None => {
            return Err(BridgeError::InvalidState(
                "callback slot empty after drain".into(),
            ))
        }
    };

    let main = engine
        .get_object(outer.id(), &config.result_key)?
        .map(|handle| Scoped::new(engine, handle))
        .ok_or_else(|| {
            BridgeError::verification(format!("result has no '{}' object", config.result_key))
        })?;

    let verified = engine
        .get_boolean(main.id(), &config.verdict_key)?
        .ok_or_else(|| {
            BridgeError::verification(format!(
                "'{}' has no boolean '{}'",
                config.result_key, config.verdict_key
            ))
        })?;

    main.release();
    outer.release();
    pending.release();
    callback.release();
    drop(native);

    Ok((verified, drain_iterations))
}
