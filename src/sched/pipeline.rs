//! Staged pipeline - a fixed ordered sequence of executor roles on one task.
//!
//! Each stage is a single executor invocation that receives every prior
//! stage's outcome as context. Stages run strictly sequentially; a failed
//! stage does not abort the sequence (the validation and review stages get
//! to see the failure), it only drags the aggregate verdict down.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cost::{record_quietly, CostRecorder, UsageMetrics};
use crate::executor::{ExecutionOutcome, ExecutionRequest, Executor};

/// Role an executor plays for one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    Plan,
    Implement,
    Validate,
    Review,
}

impl StageRole {
    /// The fixed stage order of a pipeline run.
    pub const SEQUENCE: [StageRole; 4] = [
        StageRole::Plan,
        StageRole::Implement,
        StageRole::Validate,
        StageRole::Review,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageRole::Plan => "plan",
            StageRole::Implement => "implement",
            StageRole::Validate => "validate",
            StageRole::Review => "review",
        }
    }

    /// Instruction framing for this role's executor invocation.
    fn instruction(&self) -> &'static str {
        match self {
            StageRole::Plan => "Plan how to accomplish the task below.",
            StageRole::Implement => "Implement the plan for the task below.",
            StageRole::Validate => {
                "Validate the implementation of the task below; report every failing check."
            }
            StageRole::Review => "Review the completed work for the task below.",
        }
    }
}

impl std::fmt::Display for StageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub role: StageRole,
    pub outcome: ExecutionOutcome,
}

/// Aggregate result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Per-stage outcomes in execution order.
    pub stages: Vec<StageResult>,
    /// True only if every stage succeeded.
    pub success: bool,
    /// Usage summed over all stages.
    pub usage: UsageMetrics,
}

/// Runs the fixed plan -> implement -> validate -> review sequence.
pub struct PipelineScheduler {
    executor: Arc<dyn Executor>,
    recorder: Arc<dyn CostRecorder>,
}

impl PipelineScheduler {
    pub fn new(executor: Arc<dyn Executor>, recorder: Arc<dyn CostRecorder>) -> Self {
        Self { executor, recorder }
    }

    /// Run the full stage sequence for one task.
    pub async fn run(
        &self,
        description: &str,
        context: &BTreeMap<String, serde_json::Value>,
    ) -> PipelineReport {
        self.run_with_carryover(description, context, &[], None)
            .await
    }

    /// Run the stage sequence with outcomes carried over from earlier runs.
    ///
    /// The guarantee loop uses this on retries: `carried` seeds every
    /// stage's `previous_results` with the accumulated history, and
    /// `plan_note` is prepended to the plan stage's input so later attempts
    /// know prior ones failed verification.
    pub async fn run_with_carryover(
        &self,
        description: &str,
        context: &BTreeMap<String, serde_json::Value>,
        carried: &[StageResult],
        plan_note: Option<&str>,
    ) -> PipelineReport {
        let mut stages: Vec<StageResult> = Vec::with_capacity(StageRole::SEQUENCE.len());
        let mut usage = UsageMetrics::default();

        for role in StageRole::SEQUENCE {
            let mut task = format!("[{role}] {}\n\nTask: {description}", role.instruction());
            if role == StageRole::Plan {
                if let Some(note) = plan_note {
                    task = format!("{note}\n\n{task}");
                }
            }

            let previous: Vec<ExecutionOutcome> = carried
                .iter()
                .chain(stages.iter())
                .map(|s| s.outcome.clone())
                .collect();

            let request = ExecutionRequest::new(task)
                .with_context(context.clone())
                .with_previous_results(previous);

            tracing::debug!(stage = %role, "pipeline stage starting");
            let outcome = self.executor.execute(request).await;
            record_quietly(&*self.recorder, role.as_str(), &outcome.usage, outcome.success).await;

            if !outcome.success {
                tracing::warn!(stage = %role, error = ?outcome.error, "pipeline stage failed");
            }
            usage = usage.add(&outcome.usage);
            stages.push(StageResult { role, outcome });
        }

        let success = stages.iter().all(|s| s.outcome.success);
        PipelineReport {
            stages,
            success,
            usage,
        }
    }
}
