//! The executor seam - the external capability that performs a task's work.
//!
//! The engine treats execution as an opaque async call: it hands over a task
//! description plus context and gets back a success/failure verdict, output,
//! and usage telemetry. How the work actually happens (an LLM backend, a
//! subprocess, a human) is none of the engine's business.
//!
//! Every executor invocation is the sole point where a worker or stage may
//! block; store operations stay short and bounded.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cost::UsageMetrics;

/// Input for one executor invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The task description, passed verbatim from the producer.
    pub task: String,
    /// Opaque key/value context (task metadata, stage hints).
    pub context: BTreeMap<String, serde_json::Value>,
    /// Outcomes of earlier invocations in the same logical run, oldest first.
    /// Staged schedulers use this to feed each stage everything before it.
    pub previous_results: Vec<ExecutionOutcome>,
}

impl ExecutionRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: BTreeMap<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_previous_results(mut self, previous: Vec<ExecutionOutcome>) -> Self {
        self.previous_results = previous;
        self
    }
}

/// Result of one executor invocation.
///
/// # Invariants
/// - If `success == false`, `error` describes why
/// - `usage` reflects whatever telemetry the capability reported (may be zero)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Whether the capability reports the work as done.
    pub success: bool,
    /// Output or response from the capability.
    pub content: String,
    /// Failure description when `success == false`.
    pub error: Option<String>,
    /// Token/cost telemetry for this invocation.
    pub usage: UsageMetrics,
    /// Wall time of the invocation in milliseconds.
    pub execution_time_ms: u64,
}

impl ExecutionOutcome {
    /// Create a successful outcome.
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            ..Self::default()
        }
    }

    /// Create a failure outcome.
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            content: String::new(),
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: UsageMetrics) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_execution_time_ms(mut self, ms: u64) -> Self {
        self.execution_time_ms = ms;
        self
    }
}

/// The external work-performing capability consumed by every scheduler.
///
/// # Contract
/// - `execute()` never panics; a failed attempt is reported through
///   `ExecutionOutcome { success: false, .. }`
/// - Timeouts, rate limiting, and cancellation of the underlying work are
///   the implementation's own policy - the engine applies none of its own
#[async_trait]
pub trait Executor: Send + Sync {
    /// Perform one unit of work.
    async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted executor doubles shared by the scheduler tests.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// Executor that replays a fixed script of outcomes in order, then echoes
    /// success.
    ///
    /// Each call optionally sleeps `latency` first, so tests can observe
    /// real concurrency (wall-time assertions, overlapping workers).
    pub struct ScriptedExecutor {
        script: Mutex<VecDeque<ExecutionOutcome>>,
        latency: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedExecutor {
        pub fn new(script: Vec<ExecutionOutcome>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                latency: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        /// Executor that always succeeds, echoing the request task.
        pub fn always_ok() -> Self {
            Self::new(Vec::new())
        }

        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let scripted = self
                .script
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            match scripted {
                Some(outcome) => outcome,
                None => ExecutionOutcome::success(format!("done: {}", request.task)),
            }
        }
    }

    /// Executor that fails whenever the task description contains a marker.
    pub struct FailOn {
        pub marker: &'static str,
        pub latency: Duration,
    }

    #[async_trait]
    impl Executor for FailOn {
        async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if request.task.contains(self.marker) {
                ExecutionOutcome::failure(format!("refused: {}", request.task))
            } else {
                ExecutionOutcome::success(format!("done: {}", request.task))
            }
        }
    }
}
