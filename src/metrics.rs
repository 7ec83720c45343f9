//! Verification metrics for monitoring and observability.
//!
//! This module provides per-call metrics produced by the blocking invoker and
//! a collector aggregating them across the lifetime of a bridge.

use crate::error::ErrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics collected during one verification call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMetrics {
    /// Call duration in microseconds
    pub duration_us: u64,

    /// Engine messages handled while waiting for the callback
    pub drain_iterations: u64,

    /// Proof length in bytes
    pub proof_bytes: usize,

    /// Host-held engine handles when the call started
    pub live_handles_before: usize,

    /// Host-held engine handles when the call finished
    pub live_handles_after: usize,
}

impl VerificationMetrics {
    /// Create new metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record call duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_us = duration.as_micros() as u64;
        self
    }

    /// Record drain iterations
    pub fn with_drain_iterations(mut self, iterations: u64) -> Self {
        self.drain_iterations = iterations;
        self
    }

    /// Record proof length
    pub fn with_proof_bytes(mut self, bytes: usize) -> Self {
        self.proof_bytes = bytes;
        self
    }

    /// Record live handle counts around the call
    pub fn with_live_handles(mut self, before: usize, after: usize) -> Self {
        self.live_handles_before = before;
        self.live_handles_after = after;
        self
    }

    /// Handles the call left behind
    pub fn leaked_handles(&self) -> usize {
        self.live_handles_after.saturating_sub(self.live_handles_before)
    }
}

/// Snapshot of a bridge's statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// Whether an engine is currently up
    pub initialized: bool,

    /// When the current engine came up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialized_at: Option<DateTime<Utc>>,

    /// Engines created over the bridge's lifetime
    pub engines_created: u64,

    /// Verifications attempted
    pub total_verifications: u64,

    /// Verifications returning `true`
    pub verified: u64,

    /// Verifications returning `false`
    pub rejected: u64,

    /// Verifications ending in an error
    pub failed: u64,

    /// Average successful call duration in microseconds
    pub avg_verification_time_us: f64,
}

/// Metrics collector aggregating verification metrics
pub struct MetricsCollector {
    total_verifications: AtomicU64,
    verified: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    total_verification_time_us: AtomicU64,
    total_drain_iterations: AtomicU64,
    engines_created: AtomicU64,
    leaked_handles: AtomicU64,
    error_counts: parking_lot::Mutex<HashMap<ErrorCode, u64>>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            total_verifications: AtomicU64::new(0),
            verified: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_verification_time_us: AtomicU64::new(0),
            total_drain_iterations: AtomicU64::new(0),
            engines_created: AtomicU64::new(0),
            leaked_handles: AtomicU64::new(0),
            error_counts: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Record a completed verification
    pub fn record_verification(&self, metrics: &VerificationMetrics, verdict: bool) {
        self.total_verifications.fetch_add(1, Ordering::Relaxed);

        if verdict {
            self.verified.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }

        self.total_verification_time_us
            .fetch_add(metrics.duration_us, Ordering::Relaxed);
        self.total_drain_iterations
            .fetch_add(metrics.drain_iterations, Ordering::Relaxed);
        self.leaked_handles
            .fetch_add(metrics.leaked_handles() as u64, Ordering::Relaxed);
    }

    /// Record a failed verification
    pub fn record_failure(&self, code: ErrorCode) {
        self.total_verifications.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        *self.error_counts.lock().entry(code).or_insert(0) += 1;
    }

    /// Record an engine coming up
    pub fn record_engine_created(&self) {
        self.engines_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total verifications
    pub fn total_verifications(&self) -> u64 {
        self.total_verifications.load(Ordering::Relaxed)
    }

    /// Get verifications returning `true`
    pub fn verified(&self) -> u64 {
        self.verified.load(Ordering::Relaxed)
    }

    /// Get verifications returning `false`
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Get failed verifications
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Get engines created
    pub fn engines_created(&self) -> u64 {
        self.engines_created.load(Ordering::Relaxed)
    }

    /// Get handles reported leaked
    pub fn leaked_handles(&self) -> u64 {
        self.leaked_handles.load(Ordering::Relaxed)
    }

    /// Get total drain iterations
    pub fn total_drain_iterations(&self) -> u64 {
        self.total_drain_iterations.load(Ordering::Relaxed)
    }

    /// Get average duration of completed verifications in microseconds
    pub fn avg_verification_time_us(&self) -> f64 {
        let completed = self.verified() + self.rejected();
        if completed == 0 {
            0.0
        } else {
            self.total_verification_time_us.load(Ordering::Relaxed) as f64 / completed as f64
        }
    }

    /// Get error counts
    pub fn error_counts(&self) -> HashMap<ErrorCode, u64> {
        self.error_counts.lock().clone()
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.total_verifications.store(0, Ordering::Relaxed);
        self.verified.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.total_verification_time_us.store(0, Ordering::Relaxed);
        self.total_drain_iterations.store(0, Ordering::Relaxed);
        self.engines_created.store(0, Ordering::Relaxed);
        self.leaked_handles.store(0, Ordering::Relaxed);
        self.error_counts.lock().clear();
    }

    /// Export Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP proof_bridge_verifications_total Proof verifications\n");
        output.push_str("# TYPE proof_bridge_verifications_total counter\n");
        output.push_str(&format!(
            "proof_bridge_verifications_total{{outcome=\"verified\"}} {}\n",
            self.verified()
        ));
        output.push_str(&format!(
            "proof_bridge_verifications_total{{outcome=\"rejected\"}} {}\n",
            self.rejected()
        ));
        output.push_str(&format!(
            "proof_bridge_verifications_total{{outcome=\"error\"}} {}\n",
            self.failed()
        ));

        output.push_str("\n# HELP proof_bridge_verification_time_us Average verification time\n");
        output.push_str("# TYPE proof_bridge_verification_time_us gauge\n");
        output.push_str(&format!(
            "proof_bridge_verification_time_us {:.2}\n",
            self.avg_verification_time_us()
        ));

        output.push_str("\n# HELP proof_bridge_engines_created_total Engines created\n");
        output.push_str("# TYPE proof_bridge_engines_created_total counter\n");
        output.push_str(&format!(
            "proof_bridge_engines_created_total {}\n",
            self.engines_created()
        ));

        output.push_str("\n# HELP proof_bridge_leaked_handles_total Engine handles left live after a call\n");
        output.push_str("# TYPE proof_bridge_leaked_handles_total counter\n");
        output.push_str(&format!(
            "proof_bridge_leaked_handles_total {}\n",
            self.leaked_handles()
        ));

        output.push_str("\n# HELP proof_bridge_errors_total Error counts by code\n");
        output.push_str("# TYPE proof_bridge_errors_total counter\n");
        for (code, count) in self.error_counts() {
            output.push_str(&format!(
                "proof_bridge_errors_total{{code=\"{}\"}} {}\n",
                code, count
            ));
        }

        output
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer for measuring verification duration
pub struct VerificationTimer {
    start: Instant,
}

impl VerificationTimer {
    /// Start a new timer
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Build metrics from timer
    pub fn into_metrics(self) -> VerificationMetrics {
        VerificationMetrics::new().with_duration(self.elapsed())
    }
}
