//! Usage accounting and the fire-and-forget cost sink.
//!
//! After every executor invocation the schedulers report
//! `(source, usage, success)` to a [`CostRecorder`]. Recording is strictly
//! observational: a recorder failure is logged and swallowed, never allowed
//! to change a scheduling outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Aggregate token and cost telemetry for one or more executor calls.
///
/// # Invariants
/// - `total_tokens() == prompt_tokens + completion_tokens` (saturating)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Cost in cents, as reported by the capability. Integer cents avoid
    /// floating-point rounding in aggregation.
    pub cost_cents: u64,
}

impl UsageMetrics {
    pub fn new(prompt_tokens: u64, completion_tokens: u64, cost_cents: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            cost_cents,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }

    /// Check if there's any usage worth recording.
    pub fn has_usage(&self) -> bool {
        self.prompt_tokens > 0 || self.completion_tokens > 0 || self.cost_cents > 0
    }

    /// Component-wise saturating sum.
    pub fn add(&self, other: &UsageMetrics) -> UsageMetrics {
        UsageMetrics {
            prompt_tokens: self.prompt_tokens.saturating_add(other.prompt_tokens),
            completion_tokens: self
                .completion_tokens
                .saturating_add(other.completion_tokens),
            cost_cents: self.cost_cents.saturating_add(other.cost_cents),
        }
    }
}

/// Sink for per-invocation cost reports.
///
/// # Contract
/// - `record()` is fire-and-forget from the scheduler's point of view:
///   callers log a returned error at `warn` and carry on
/// - Implementations must not block for long; they run on the worker's path
#[async_trait]
pub trait CostRecorder: Send + Sync {
    /// Record one executor invocation attributed to `source` (a worker id or
    /// a stage role name).
    async fn record(&self, source: &str, usage: &UsageMetrics, success: bool)
        -> Result<(), String>;
}

/// Recorder that emits a structured log line per invocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

#[async_trait]
impl CostRecorder for TracingRecorder {
    async fn record(
        &self,
        source: &str,
        usage: &UsageMetrics,
        success: bool,
    ) -> Result<(), String> {
        tracing::info!(
            source,
            success,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost_cents = usage.cost_cents,
            "execution recorded"
        );
        Ok(())
    }
}

/// Recorder that drops every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecorder;

#[async_trait]
impl CostRecorder for NullRecorder {
    async fn record(&self, _: &str, _: &UsageMetrics, _: bool) -> Result<(), String> {
        Ok(())
    }
}

/// Report to a recorder, swallowing (but logging) any failure.
pub(crate) async fn record_quietly(
    recorder: &dyn CostRecorder,
    source: &str,
    usage: &UsageMetrics,
    success: bool,
) {
    if let Err(e) = recorder.record(source, usage, success).await {
        tracing::warn!(source, error = %e, "cost recording failed; continuing");
    }
}
