//! Proof verification façades.
//!
//! Two usage shapes sit on top of the blocking invoker:
//!
//! - [`verify_proof_once`] builds an engine, verifies one proof and tears
//!   the engine down again, whatever the outcome.
//! - [`ProofVerificationTool`] keeps one engine alive across calls, creating
//!   it lazily on first use and releasing it on [`close`](ProofVerificationTool::close)
//!   or drop.
//!
//! ```text
//! verify(proof)
//!     │
//!     ▼
//! RuntimeHandle::init (lazy)
//!     │
//!     ▼
//! blocking_verify ── marshal ── invoke ── drain ── read result ── release
//! ```

use crate::config::BridgeConfig;
use crate::engine::{EngineFactory, RuntimeHandle};
use crate::error::{BridgeError, Result};
use crate::invoker::blocking_verify;
use crate::metrics::{BridgeStats, MetricsCollector};
use crate::module::ModuleLocator;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Message of the error returned for an absent proof
pub const NULL_PROOF_MESSAGE: &str = "Proof is null";

/// Reusable bridge lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    /// No engine held
    Uninitialized,
    /// Engine up with the module loaded
    Initialized,
}

fn require_proof(proof: Option<&[u8]>) -> Result<&[u8]> {
    proof.ok_or_else(|| BridgeError::invalid_input(NULL_PROOF_MESSAGE))
}

/// Verify one proof on a fresh engine that is closed before returning
#[instrument(skip(factory, locator, config, proof), fields(proof_len = proof.len()))]
pub fn verify_proof_once<F: EngineFactory>(
    factory: &F,
    locator: &ModuleLocator,
    config: &BridgeConfig,
    proof: &[u8],
) -> Result<bool> {
    let mut runtime = RuntimeHandle::create(factory, locator, config.clone())?;
    let result = blocking_verify(&runtime, proof);
    runtime.close();
    result.map(|outcome| outcome.verified)
}

/// [`verify_proof_once`] for callers that may not have a proof at all.
///
/// An absent proof fails before any engine is created.
pub fn verify_once<F: EngineFactory>(
    factory: &F,
    locator: &ModuleLocator,
    config: &BridgeConfig,
    proof: Option<&[u8]>,
) -> Result<bool> {
    verify_proof_once(factory, locator, config, require_proof(proof)?)
}

/// Reusable proof verifier holding one engine across calls
pub struct ProofVerificationTool<F: EngineFactory> {
    factory: F,
    locator: ModuleLocator,
    config: BridgeConfig,
    runtime: Option<RuntimeHandle<F::Engine>>,
    metrics: Arc<MetricsCollector>,
}

impl<F: EngineFactory> ProofVerificationTool<F> {
    /// Create an uninitialized verifier
    pub fn new(factory: F, locator: ModuleLocator, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            factory,
            locator,
            config,
            runtime: None,
            metrics: Arc::new(MetricsCollector::new()),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> BridgeState {
        match self.runtime {
            Some(_) => BridgeState::Initialized,
            None => BridgeState::Uninitialized,
        }
    }

    /// Bring the engine up. No-op when already initialized.
    pub fn init(&mut self) -> Result<()> {
        if self.runtime.is_some() {
            return Ok(());
        }

        let runtime = RuntimeHandle::create(&self.factory, &self.locator, self.config.clone())?;
        self.metrics.record_engine_created();
        info!(id = %runtime.id(), "Proof verification tool initialized");
        self.runtime = Some(runtime);
        Ok(())
    }

    /// Verify a proof, initializing the engine first if needed
    #[instrument(skip(self, proof), fields(proof_len = proof.len()))]
    pub fn verify_proof(&mut self, proof: &[u8]) -> Result<bool> {
        if let Err(e) = self.init() {
            self.metrics.record_failure(e.code());
            return Err(e);
        }
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidState("Runtime missing after init".into()))?;

        match blocking_verify(runtime, proof) {
            Ok(outcome) => {
                self.metrics
                    .record_verification(&outcome.metrics, outcome.verified);
                Ok(outcome.verified)
            }
            Err(e) => {
                debug!(error = %e, "Proof verification failed");
                self.metrics.record_failure(e.code());
                Err(e)
            }
        }
    }

    /// [`verify_proof`](Self::verify_proof) for callers that may not have a proof.
    ///
    /// An absent proof fails without initializing the engine.
    pub fn verify(&mut self, proof: Option<&[u8]>) -> Result<bool> {
        match require_proof(proof) {
            Ok(proof) => self.verify_proof(proof),
            Err(e) => {
                self.metrics.record_failure(e.code());
                Err(e)
            }
        }
    }

    /// Release the engine. No-op when uninitialized; `init` may follow.
    pub fn close(&mut self) {
        if let Some(mut runtime) = self.runtime.take() {
            runtime.close();
            info!(id = %runtime.id(), "Proof verification tool closed");
        }
    }

    /// Shared metrics collector
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    /// The bridge configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Statistics snapshot
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            initialized: self.runtime.is_some(),
            initialized_at: self.runtime.as_ref().and_then(|r| r.initialized_at()),
            engines_created: self.metrics.engines_created(),
            total_verifications: self.metrics.total_verifications(),
            verified: self.metrics.verified(),
            rejected: self.metrics.rejected(),
            failed: self.metrics.failed(),
            avg_verification_time_us: self.metrics.avg_verification_time_us(),
        }
    }
}

impl<F: EngineFactory> Drop for ProofVerificationTool<F> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptEngine;
    use crate::error::ErrorCode;
    use crate::testing::{FailurePoint, RecordingEngine, ScriptedResponse};
    use crate::value::ScriptValue;
    use serde_json::json;

    fn locator() -> ModuleLocator {
        ModuleLocator::inline("pvtBundle.js", "module.exports = { verifyProof() {} };")
    }

    fn tool(engine: &RecordingEngine) -> ProofVerificationTool<RecordingEngine> {
        ProofVerificationTool::new(engine.clone(), locator(), BridgeConfig::default()).unwrap()
    }

    #[test]
    fn test_once_returns_verdicts() {
        let engine = RecordingEngine::new()
            .respond(ScriptedResponse::verdict(true))
            .respond(ScriptedResponse::verdict(false));
        let config = BridgeConfig::default();

        assert!(verify_proof_once(&engine, &locator(), &config, &[0x01, 0x02, 0x03]).unwrap());
        assert!(!verify_proof_once(&engine, &locator(), &config, &[0x01, 0x02, 0x03]).unwrap());

        assert_eq!(engine.engines_created(), 2);
        assert_eq!(engine.engines_shut_down(), 2);
        assert!(engine.is_balanced());
    }

    #[test]
    fn test_once_closes_on_failure() {
        let engine = RecordingEngine::new()
            .respond(ScriptedResponse::Callback(ScriptValue::from(json!({"mainProof": 1}))));

        let err = verify_proof_once(&engine, &locator(), &BridgeConfig::default(), &[1]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Verification);
        assert_eq!(engine.engines_shut_down(), 1);
        assert!(engine.is_balanced());
    }

    #[test]
    fn test_once_absent_proof_touches_nothing() {
        let engine = RecordingEngine::new();

        let err = verify_once(&engine, &locator(), &BridgeConfig::default(), None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert_eq!(err.to_string(), "Invalid input: Proof is null");
        assert_eq!(engine.engines_created(), 0);
        assert_eq!(engine.invocations(), 0);
        assert_eq!(engine.allocated(), 0);
    }

    #[test]
    fn test_once_empty_proof() {
        let engine = RecordingEngine::new();
        assert!(verify_once(&engine, &locator(), &BridgeConfig::default(), Some(&[][..])).unwrap());
        assert_eq!(engine.proofs(), vec![Vec::<u8>::new()]);
        assert!(engine.is_balanced());
    }

    #[test]
    fn test_init_is_idempotent() {
        let engine = RecordingEngine::new();
        let mut tool = tool(&engine);
        assert_eq!(tool.state(), BridgeState::Uninitialized);

        tool.init().unwrap();
        tool.init().unwrap();

        assert_eq!(tool.state(), BridgeState::Initialized);
        assert_eq!(engine.engines_created(), 1);
        assert_eq!(engine.live_handles(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let engine = RecordingEngine::new();
        let mut tool = tool(&engine);

        tool.close();
        assert_eq!(engine.engines_shut_down(), 0);

        tool.init().unwrap();
        tool.close();
        tool.close();

        assert_eq!(tool.state(), BridgeState::Uninitialized);
        assert_eq!(engine.engines_shut_down(), 1);
        assert!(engine.is_balanced());
    }

    #[test]
    fn test_verify_initializes_lazily() {
        let engine = RecordingEngine::new();
        let mut tool = tool(&engine);

        assert!(tool.verify_proof(&[1, 2, 3]).unwrap());
        assert_eq!(tool.state(), BridgeState::Initialized);
        assert_eq!(engine.engines_created(), 1);
    }

    #[test]
    fn test_reuse_keeps_calls_independent() {
        let engine = RecordingEngine::new()
            .respond(ScriptedResponse::verdict(true))
            .respond(ScriptedResponse::verdict(false));
        let mut tool = tool(&engine);
        tool.init().unwrap();

        assert!(tool.verify_proof(&[0xaa]).unwrap());
        assert!(!tool.verify_proof(&[0xbb, 0xcc]).unwrap());

        assert_eq!(engine.proofs(), vec![vec![0xaa], vec![0xbb, 0xcc]]);
        assert_eq!(engine.engines_created(), 1);
        assert_eq!(engine.live_handles(), 1);

        let stats = tool.stats();
        assert_eq!(stats.verified, 1);
        assert_eq!(stats.rejected, 1);
        assert!(stats.initialized_at.is_some());
    }

    #[test]
    fn test_reinit_after_close() {
        let engine = RecordingEngine::new();
        let mut tool = tool(&engine);

        tool.verify_proof(&[1]).unwrap();
        tool.close();
        tool.verify_proof(&[2]).unwrap();

        assert_eq!(engine.engines_created(), 2);
        assert_eq!(tool.stats().engines_created, 2);
        drop(tool);
        assert!(engine.is_balanced());
    }

    #[test]
    fn test_absent_proof_does_not_initialize() {
        let engine = RecordingEngine::new();
        let mut tool = tool(&engine);

        let err = tool.verify(None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert_eq!(tool.state(), BridgeState::Uninitialized);
        assert_eq!(engine.engines_created(), 0);
        assert_eq!(tool.stats().failed, 1);
    }

    #[test]
    fn test_init_failure_stays_uninitialized() {
        let engine = RecordingEngine::new().failing_at(FailurePoint::ModuleLoad);
        let mut tool = tool(&engine);

        let err = tool.verify_proof(&[1]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RuntimeInitialization);
        assert_eq!(tool.state(), BridgeState::Uninitialized);
        assert!(engine.is_balanced());
        assert_eq!(
            tool.metrics().error_counts().get(&ErrorCode::RuntimeInitialization),
            Some(&1)
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let engine = RecordingEngine::new();
        let config = BridgeConfig::default().with_drain_poll_interval(0);
        assert!(ProofVerificationTool::new(engine, locator(), config).is_err());
    }

    #[test]
    fn test_drop_closes() {
        let engine = RecordingEngine::new();
        {
            let mut tool = tool(&engine);
            tool.verify_proof(&[1]).unwrap();
        }
        assert_eq!(engine.engines_shut_down(), 1);
        assert!(engine.is_balanced());
    }
}
