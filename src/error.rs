//! Error types for the proof bridge.
//!
//! This module defines the error codes and the main error type returned by
//! every façade, the blocking invoker and the engine backends.

use serde::{Deserialize, Serialize};

/// Error codes for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Proof absent or otherwise unusable before any engine work
    InvalidInput,
    /// Engine or verification module failed to load
    RuntimeInitialization,
    /// Result graph did not have the expected shape
    Verification,
    /// Callback did not fire within the configured wait
    Timeout,
    /// Operation attempted in the wrong lifecycle state
    InvalidState,
    /// Failure reported by the embedded engine
    EngineError,
    /// Invalid configuration
    Configuration,
    /// IO failure (module files, config files)
    Io,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
            ErrorCode::RuntimeInitialization => write!(f, "RUNTIME_INITIALIZATION"),
            ErrorCode::Verification => write!(f, "VERIFICATION"),
            ErrorCode::Timeout => write!(f, "TIMEOUT"),
            ErrorCode::InvalidState => write!(f, "INVALID_STATE"),
            ErrorCode::EngineError => write!(f, "ENGINE_ERROR"),
            ErrorCode::Configuration => write!(f, "CONFIGURATION"),
            ErrorCode::Io => write!(f, "IO"),
        }
    }
}

/// Main error type for the bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Proof absent; raised before any native resource is touched
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Engine or module failed to load; no native handles remain allocated
    #[error("Runtime initialization failed: {0}")]
    RuntimeInitialization(String),

    /// Result graph malformed
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Callback never fired within the configured wait
    #[error("Verification callback did not fire within {waited_ms}ms")]
    Timeout {
        /// How long the invoker waited
        waited_ms: u64,
    },

    /// Invalid lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Engine-reported failure (script exception, unknown handle, ...)
    #[error("Engine error: {0}")]
    Engine(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        BridgeError::InvalidInput(message.into())
    }

    /// Create a runtime initialization error
    pub fn initialization(message: impl Into<String>) -> Self {
        BridgeError::RuntimeInitialization(message.into())
    }

    /// Create a verification error
    pub fn verification(message: impl Into<String>) -> Self {
        BridgeError::Verification(message.into())
    }

    /// Create an engine error
    pub fn engine(message: impl Into<String>) -> Self {
        BridgeError::Engine(message.into())
    }

    /// Classify the error
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::InvalidInput(_) => ErrorCode::InvalidInput,
            BridgeError::RuntimeInitialization(_) => ErrorCode::RuntimeInitialization,
            BridgeError::Verification(_) => ErrorCode::Verification,
            BridgeError::Timeout { .. } => ErrorCode::Timeout,
            BridgeError::InvalidState(_) => ErrorCode::InvalidState,
            BridgeError::Engine(_) => ErrorCode::EngineError,
            BridgeError::Config(_) => ErrorCode::Configuration,
            BridgeError::Io(_) => ErrorCode::Io,
        }
    }

    /// Re-tag engine failures that happen while bringing a runtime up
    pub(crate) fn into_initialization(self) -> Self {
        match self {
            BridgeError::Engine(msg) => BridgeError::RuntimeInitialization(msg),
            BridgeError::Io(e) => BridgeError::RuntimeInitialization(e.to_string()),
            other => other,
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
