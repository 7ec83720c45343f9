//! # Proof Bridge
//!
//! This library calls a callback-style `verifyProof(proof, callback)`
//! function inside an embedded JavaScript engine and exposes it to the host
//! as a plain blocking call returning the verdict.
//!
//! ## Architecture
//!
//! ```text
//! Host (verify_proof_once / ProofVerificationTool / VerifierService)
//!     │
//!     │ blocking call
//!     ▼
//! Blocking invoker (this crate)
//!     │
//!     │ marshal ─ invoke ─ drain until callback ─ read result ─ release
//!     ▼
//! Embedded engine (ScriptEngine backend)
//! ```
//!
//! ## Features
//!
//! - **Blocking Façade**: one-shot and reusable verifiers over one engine seam
//! - **Scoped Release**: every engine handle is released on every exit path
//! - **Condvar Wait**: no busy loop while the script completes off the message loop
//! - **Optional Timeout**: a silent script fails instead of hanging the caller
//! - **QuickJS Backend**: behind the `quickjs` feature
//! - **Engine Double**: `testing::RecordingEngine`, behind the `testing` feature

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod bridge;
pub mod callback;
pub mod config;
pub mod engine;
pub mod error;
pub mod invoker;
pub mod marshal;
pub mod metrics;
pub mod module;
pub mod service;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod value;

// Re-export commonly used types
pub use bridge::{verify_once, verify_proof_once, BridgeState, ProofVerificationTool};
pub use callback::{CallbackBridge, CallbackSink, CallbackSlot, Delivery, Offer};
pub use config::{BridgeConfig, ConfigError};
pub use engine::{EngineFactory, HandleId, HandleState, RuntimeHandle, ScriptEngine};
pub use error::{BridgeError, ErrorCode, Result};
pub use invoker::{blocking_verify, VerificationOutcome};
pub use metrics::{BridgeStats, MetricsCollector, VerificationMetrics};
pub use module::{ModuleLocator, ModuleSource};
pub use service::VerifierService;

#[cfg(feature = "quickjs")]
pub use engine::quickjs::{QuickJsEngine, QuickJsFactory};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
