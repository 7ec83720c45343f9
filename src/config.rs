//! Bridge configuration types and defaults.
//!
//! This module defines the configuration options for the bridge, including
//! the result-graph keys, the callback wait policy and engine limits.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Exported function invoked on the verification module
pub const DEFAULT_FUNCTION_NAME: &str = "verifyProof";

/// Key of the nested result object
pub const DEFAULT_RESULT_KEY: &str = "mainProof";

/// Boolean field carrying the verdict
pub const DEFAULT_VERDICT_KEY: &str = "isVerified";

/// Default callback wait (0 = no limit)
pub const DEFAULT_CALLBACK_TIMEOUT_MS: u32 = 0;

/// Default slice between drain passes while waiting for the callback
pub const DEFAULT_DRAIN_POLL_INTERVAL_MS: u32 = 10;

/// Default engine memory limit (64 MB)
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 64 * 1024 * 1024;

/// Default engine stack size (1 MB)
pub const DEFAULT_STACK_SIZE_BYTES: u64 = 1024 * 1024;

/// Configuration for the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Function exported by the verification module
    #[serde(default = "default_function_name")]
    pub function_name: String,

    /// Nested object holding the verdict
    #[serde(default = "default_result_key")]
    pub result_key: String,

    /// Boolean verdict field inside the nested object
    #[serde(default = "default_verdict_key")]
    pub verdict_key: String,

    /// Maximum wait for the callback in milliseconds (0 = no limit)
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_ms: u32,

    /// Wait slice between drain passes in milliseconds
    #[serde(default = "default_drain_poll_interval")]
    pub drain_poll_interval_ms: u32,

    /// Engine heap limit in bytes
    #[serde(default = "default_memory_limit")]
    pub memory_limit_bytes: u64,

    /// Engine stack size in bytes
    #[serde(default = "default_stack_size")]
    pub stack_size_bytes: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            function_name: DEFAULT_FUNCTION_NAME.to_string(),
            result_key: DEFAULT_RESULT_KEY.to_string(),
            verdict_key: DEFAULT_VERDICT_KEY.to_string(),
            callback_timeout_ms: DEFAULT_CALLBACK_TIMEOUT_MS,
            drain_poll_interval_ms: DEFAULT_DRAIN_POLL_INTERVAL_MS,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            stack_size_bytes: DEFAULT_STACK_SIZE_BYTES,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the exported function name
    pub fn with_function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = name.into();
        self
    }

    /// Set the result object and verdict keys
    pub fn with_result_keys(
        mut self,
        result_key: impl Into<String>,
        verdict_key: impl Into<String>,
    ) -> Self {
        self.result_key = result_key.into();
        self.verdict_key = verdict_key.into();
        self
    }

    /// Bound the callback wait
    pub fn with_callback_timeout(mut self, timeout_ms: u32) -> Self {
        self.callback_timeout_ms = timeout_ms;
        self
    }

    /// Set the wait slice between drain passes
    pub fn with_drain_poll_interval(mut self, interval_ms: u32) -> Self {
        self.drain_poll_interval_ms = interval_ms;
        self
    }

    /// Set the engine memory limit
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    /// Set the engine stack size
    pub fn with_stack_size(mut self, bytes: u64) -> Self {
        self.stack_size_bytes = bytes;
        self
    }

    /// Callback wait as a duration, `None` when unbounded
    pub fn callback_timeout(&self) -> Option<Duration> {
        match self.callback_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(u64::from(ms))),
        }
    }

    /// Wait slice between drain passes
    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.drain_poll_interval_ms))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("function_name", &self.function_name),
            ("result_key", &self.result_key),
            ("verdict_key", &self.verdict_key),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    reason: "must not be empty".into(),
                });
            }
        }

        if self.drain_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "drain_poll_interval_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.memory_limit_bytes < 1024 * 1024 {
            return Err(ConfigError::InvalidValue {
                field: "memory_limit_bytes".into(),
                reason: "must be at least 1MB".into(),
            });
        }

        if self.stack_size_bytes < 64 * 1024 {
            return Err(ConfigError::InvalidValue {
                field: "stack_size_bytes".into(),
                reason: "must be at least 64KB".into(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field name
        field: String,
        /// The reason it's invalid
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Default value functions for serde
fn default_function_name() -> String {
    DEFAULT_FUNCTION_NAME.to_string()
}

fn default_result_key() -> String {
    DEFAULT_RESULT_KEY.to_string()
}

fn default_verdict_key() -> String {
    DEFAULT_VERDICT_KEY.to_string()
}

fn default_callback_timeout() -> u32 {
    DEFAULT_CALLBACK_TIMEOUT_MS
}

fn default_drain_poll_interval() -> u32 {
    DEFAULT_DRAIN_POLL_INTERVAL_MS
}

fn default_memory_limit() -> u64 {
    DEFAULT_MEMORY_LIMIT_BYTES
}

fn default_stack_size() -> u64 {
    DEFAULT_STACK_SIZE_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.function_name, "verifyProof");
        assert_eq!(config.result_key, "mainProof");
        assert_eq!(config.verdict_key, "isVerified");
        assert!(config.callback_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = BridgeConfig::new()
            .with_function_name("check")
            .with_callback_timeout(250)
            .with_memory_limit(128 * 1024 * 1024);

        assert_eq!(config.function_name, "check");
        assert_eq!(config.callback_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.memory_limit_bytes, 128 * 1024 * 1024);
    }

    #[test]
    fn test_config_validation() {
        assert!(BridgeConfig::new().with_function_name(" ").validate().is_err());
        assert!(BridgeConfig::new().with_drain_poll_interval(0).validate().is_err());
        assert!(BridgeConfig::new().with_memory_limit(1024).validate().is_err());
        assert!(BridgeConfig::new().with_stack_size(1024).validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let parsed: BridgeConfig =
            serde_json::from_str(r#"{"callbackTimeoutMs": 1500}"#).unwrap();
        assert_eq!(parsed.callback_timeout_ms, 1500);
        assert_eq!(parsed.function_name, DEFAULT_FUNCTION_NAME);
        assert_eq!(parsed.drain_poll_interval_ms, DEFAULT_DRAIN_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"resultKey": "proof", "verdictKey": "ok"}}"#).unwrap();

        let config = BridgeConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.result_key, "proof");
        assert_eq!(config.verdict_key, "ok");
    }

    #[test]
    fn test_from_json_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"drainPollIntervalMs": 0}}"#).unwrap();

        assert!(matches!(
            BridgeConfig::from_json_file(file.path()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
