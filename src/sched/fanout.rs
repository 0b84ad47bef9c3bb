//! Bounded-parallel fan-out over an explicit task list.
//!
//! Unlike the pool, fan-out does not touch the task store: the caller hands
//! over a finite list of items and gets back one result per item, in input
//! order. With a concurrency limit K, at most K executor invocations are
//! outstanding at once and items start in input order as permits free up.
//! One item's failure never cancels the others.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cost::{record_quietly, CostRecorder, UsageMetrics};
use crate::executor::{ExecutionOutcome, ExecutionRequest, Executor};
use crate::sched::SchedulerError;

/// One fan-out work item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FanoutItem {
    pub description: String,
    pub context: BTreeMap<String, serde_json::Value>,
}

impl FanoutItem {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            context: BTreeMap::new(),
        }
    }
}

/// Terminal result for one fan-out item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutOutcome {
    /// Position of the item in the input list.
    pub index: usize,
    pub description: String,
    pub outcome: ExecutionOutcome,
}

/// Aggregate result of a fan-out run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutReport {
    /// One entry per input item, in input order.
    pub results: Vec<FanoutOutcome>,
    /// True only if every item succeeded.
    pub success: bool,
    /// Usage summed over all items.
    pub usage: UsageMetrics,
}

/// Executes an explicit, finite task list with an optional concurrency cap.
pub struct FanoutScheduler {
    executor: Arc<dyn Executor>,
    recorder: Arc<dyn CostRecorder>,
}

impl FanoutScheduler {
    pub fn new(executor: Arc<dyn Executor>, recorder: Arc<dyn CostRecorder>) -> Self {
        Self { executor, recorder }
    }

    /// Run every item to a terminal result.
    ///
    /// `limit` caps the number of simultaneously outstanding executor
    /// invocations; `None` starts all items immediately. Resolves only when
    /// every item has a result.
    ///
    /// # Errors
    /// `SchedulerError::Config` if `limit == Some(0)`.
    pub async fn run(
        &self,
        items: Vec<FanoutItem>,
        limit: Option<usize>,
    ) -> Result<FanoutReport, SchedulerError> {
        if limit == Some(0) {
            return Err(SchedulerError::Config(
                "fan-out concurrency limit must be at least 1".into(),
            ));
        }
        if items.is_empty() {
            return Ok(FanoutReport {
                results: Vec::new(),
                success: true,
                usage: UsageMetrics::default(),
            });
        }

        let permits = limit.unwrap_or(items.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut join_set: JoinSet<FanoutOutcome> = JoinSet::new();

        tracing::debug!(items = items.len(), permits, "fan-out starting");

        for (index, item) in items.into_iter().enumerate() {
            // Acquiring before spawning keeps the start order equal to the
            // input order: item N+K cannot start before a permit frees up.
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| SchedulerError::Config("fan-out semaphore closed".into()))?;

            let executor = self.executor.clone();
            let recorder = self.recorder.clone();
            join_set.spawn(async move {
                let request = ExecutionRequest::new(item.description.clone())
                    .with_context(item.context);
                let outcome = executor.execute(request).await;
                record_quietly(
                    &*recorder,
                    &format!("fanout-{index}"),
                    &outcome.usage,
                    outcome.success,
                )
                .await;
                drop(permit);
                FanoutOutcome {
                    index,
                    description: item.description,
                    outcome,
                }
            });
        }

        let mut results: Vec<Option<FanoutOutcome>> = Vec::new();
        results.resize_with(join_set.len(), || None);
        while let Some(joined) = join_set.join_next().await {
            let result = joined?;
            let slot = result.index;
            results[slot] = Some(result);
        }

        let results: Vec<FanoutOutcome> = results.into_iter().flatten().collect();
        let success = results.iter().all(|r| r.outcome.success);
        let usage = results
            .iter()
            .fold(UsageMetrics::default(), |acc, r| acc.add(&r.outcome.usage));

        Ok(FanoutReport {
            results,
            success,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::cost::NullRecorder;
    use crate::executor::testing::FailOn;

    fn fanout(executor: Arc<dyn Executor>) -> FanoutScheduler {
        FanoutScheduler::new(executor, Arc::new(NullRecorder))
    }

    fn items(n: usize) -> Vec<FanoutItem> {
        (0..n).map(|i| FanoutItem::new(format!("item-{i}"))).collect()
    }

    #[tokio::test]
    async fn zero_limit_is_a_configuration_error() {
        let scheduler = fanout(Arc::new(FailOn {
            marker: "never",
            latency: Duration::ZERO,
        }));
        let err = scheduler.run(items(2), Some(0)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));
    }

    #[tokio::test]
    async fn empty_input_succeeds_trivially() {
        let scheduler = fanout(Arc::new(FailOn {
            marker: "never",
            latency: Duration::ZERO,
        }));
        let report = scheduler.run(Vec::new(), Some(3)).await.unwrap();
        assert!(report.success);
        assert!(report.results.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_item_gets_a_result_even_when_some_fail() {
        let scheduler = fanout(Arc::new(FailOn {
            marker: "item-1",
            latency: Duration::ZERO,
        }));
        let report = scheduler.run(items(4), Some(2)).await.unwrap();

        assert_eq!(report.results.len(), 4);
        assert!(!report.success);
        for (i, result) in report.results.iter().enumerate() {
            assert_eq!(result.index, i, "results keep input order");
            assert_eq!(result.outcome.success, i != 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_cap_batches_wall_time() {
        let latency = Duration::from_millis(100);
        let scheduler = fanout(Arc::new(FailOn {
            marker: "item-1",
            latency,
        }));

        let start = Instant::now();
        let report = scheduler.run(items(4), Some(2)).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(report.results.len(), 4);
        // Two batches of two, not four sequential items.
        assert!(elapsed >= latency * 2, "elapsed {elapsed:?}");
        assert!(elapsed < latency * 4, "elapsed {elapsed:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn unlimited_runs_fully_parallel() {
        let latency = Duration::from_millis(100);
        let scheduler = fanout(Arc::new(FailOn {
            marker: "never",
            latency,
        }));

        let start = Instant::now();
        let report = scheduler.run(items(6), None).await.unwrap();
        let elapsed = start.elapsed();

        assert!(report.success);
        assert!(elapsed < latency * 3, "elapsed {elapsed:?}");
    }
}
