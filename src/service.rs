//! Async verifier service backed by a dedicated engine thread.
//!
//! Embedded engines are usually not `Send`, so the service hosts one
//! [`ProofVerificationTool`] on its own OS thread. Requests arrive over a
//! channel and are executed strictly in order on that thread; results come
//! back through oneshot channels.

use crate::bridge::ProofVerificationTool;
use crate::config::BridgeConfig;
use crate::engine::EngineFactory;
use crate::error::{BridgeError, Result};
use crate::metrics::BridgeStats;
use crate::module::ModuleLocator;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};

type InitSignal = (
    std::sync::mpsc::Sender<Result<()>>,
    std::sync::mpsc::Receiver<Result<()>>,
);

/// Commands sent to the verifier thread
enum Command {
    Verify {
        proof: Option<Vec<u8>>,
        responder: oneshot::Sender<Result<bool>>,
    },
    Stats {
        responder: oneshot::Sender<BridgeStats>,
    },
    Shutdown {
        responder: oneshot::Sender<()>,
    },
}

/// Handle to a verifier thread
pub struct VerifierService {
    commands: mpsc::UnboundedSender<Command>,
    worker: Option<thread::JoinHandle<()>>,
}

fn service_closed() -> BridgeError {
    BridgeError::InvalidState("Verifier service has shut down".into())
}

impl VerifierService {
    /// Start the verifier thread and bring its engine up.
    ///
    /// Initialization failures are returned here rather than on first use.
    pub fn spawn<F>(factory: F, locator: ModuleLocator, config: BridgeConfig) -> Result<Self>
    where
        F: EngineFactory + Send + 'static,
    {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (init_tx, init_rx): InitSignal = std::sync::mpsc::channel();

        let worker = thread::Builder::new()
            .name("proof-bridge-verifier".to_string())
            .spawn(move || {
                let mut tool = match ProofVerificationTool::new(factory, locator, config)
                    .and_then(|mut tool| {
                        tool.init()?;
                        Ok(tool)
                    }) {
                    Ok(tool) => {
                        let _ = init_tx.send(Ok(()));
                        tool
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };

                while let Some(command) = cmd_rx.blocking_recv() {
                    match command {
                        Command::Verify { proof, responder } => {
                            let _ = responder.send(tool.verify(proof.as_deref()));
                        }
                        Command::Stats { responder } => {
                            let _ = responder.send(tool.stats());
                        }
                        Command::Shutdown { responder } => {
                            tool.close();
                            let _ = responder.send(());
                            break;
                        }
                    }
                }

                debug!("Verifier thread exiting");
            })?;

        match init_rx.recv() {
            Ok(Ok(())) => {
                info!("Verifier service started");
                Ok(Self {
                    commands: cmd_tx,
                    worker: Some(worker),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BridgeError::initialization(
                "Verifier thread exited during initialization",
            )),
        }
    }

    /// Verify a proof on the verifier thread
    #[instrument(skip(self, proof))]
    pub async fn verify(&self, proof: Option<Vec<u8>>) -> Result<bool> {
        let (responder, response) = oneshot::channel();
        self.commands
            .send(Command::Verify { proof, responder })
            .map_err(|_| service_closed())?;
        response.await.map_err(|_| service_closed())?
    }

    /// Statistics of the hosted verifier
    pub async fn stats(&self) -> Result<BridgeStats> {
        let (responder, response) = oneshot::channel();
        self.commands
            .send(Command::Stats { responder })
            .map_err(|_| service_closed())?;
        response.await.map_err(|_| service_closed())
    }

    /// Close the engine and join the verifier thread
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Shutting down verifier service");
        let (responder, response) = oneshot::channel();
        if self.commands.send(Command::Shutdown { responder }).is_ok() {
            let _ = response.await;
        }

        if let Some(worker) = self.worker.take() {
            tokio::task::spawn_blocking(move || worker.join())
                .await
                .map_err(|e| BridgeError::InvalidState(format!("join task failed: {}", e)))?
                .map_err(|_| BridgeError::InvalidState("Verifier thread panicked".into()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::testing::{FailurePoint, RecordingEngine, ScriptedResponse};
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn locator() -> ModuleLocator {
        ModuleLocator::inline("pvtBundle.js", "module.exports = { verifyProof() {} };")
    }

    #[tokio::test]
    async fn test_service_verifies_in_order() {
        init_tracing();
        let engine = RecordingEngine::new()
            .respond(ScriptedResponse::verdict(true))
            .respond(ScriptedResponse::verdict(false));
        let service =
            VerifierService::spawn(engine.clone(), locator(), BridgeConfig::default()).unwrap();

        assert!(service.verify(Some(vec![1, 2, 3])).await.unwrap());
        assert!(!service.verify(Some(vec![4])).await.unwrap());

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.verified, 1);
        assert_eq!(stats.rejected, 1);
        assert!(stats.initialized);

        service.shutdown().await.unwrap();
        assert_eq!(engine.proofs(), vec![vec![1, 2, 3], vec![4]]);
        assert_eq!(engine.engines_created(), 1);
        assert!(engine.is_balanced());
    }

    #[tokio::test]
    async fn test_service_absent_proof() {
        init_tracing();
        let engine = RecordingEngine::new();
        let service =
            VerifierService::spawn(engine.clone(), locator(), BridgeConfig::default()).unwrap();

        let err = service.verify(None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert_eq!(engine.invocations(), 0);

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_service_reports_init_failure() {
        init_tracing();
        let engine = RecordingEngine::new().failing_at(FailurePoint::ModuleLoad);

        let err = VerifierService::spawn(engine.clone(), locator(), BridgeConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::RuntimeInitialization);
        assert!(engine.is_balanced());
    }

    #[tokio::test]
    async fn test_service_concurrent_requests_serialize() {
        init_tracing();
        let engine = RecordingEngine::new().with_ticks(3);
        let service =
            VerifierService::spawn(engine.clone(), locator(), BridgeConfig::default()).unwrap();

        let (a, b, c) = tokio::join!(
            service.verify(Some(vec![1])),
            service.verify(Some(vec![2])),
            service.verify(Some(vec![3])),
        );
        assert!(a.unwrap() && b.unwrap() && c.unwrap());

        service.shutdown().await.unwrap();
        let mut proofs = engine.proofs();
        proofs.sort();
        assert_eq!(proofs, vec![vec![1], vec![2], vec![3]]);
        assert!(engine.is_balanced());
    }
}
