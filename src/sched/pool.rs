//! Worker-pool scheduler over the task store ("swarm" mode).
//!
//! Each registered worker runs an independent claim -> execute -> finalize
//! loop against the shared store until the backlog drains (with
//! `stop_when_empty`) or the pool is cooperatively stopped. The store's
//! atomic claim is the only synchronization between workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::config::PoolConfig;
use crate::cost::{record_quietly, CostRecorder};
use crate::executor::{ExecutionRequest, Executor};
use crate::sched::SchedulerError;
use crate::store::{TaskId, TaskPatch, TaskPriority, TaskStatus, TaskStore, WorkerId};

/// Snapshot of one worker's observable state.
///
/// Used for monitoring only, never for scheduling decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker: WorkerId,
    /// The task the worker currently holds, if any.
    pub active_task: Option<TaskId>,
}

/// Per-worker counters from a finished pool run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTally {
    pub worker: WorkerId,
    pub completed: u64,
    pub failed: u64,
}

/// Aggregate result of a pool run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolReport {
    pub workers: Vec<WorkerTally>,
    pub elapsed: Duration,
}

impl PoolReport {
    /// Total tasks the pool drove to a terminal state.
    pub fn processed(&self) -> u64 {
        self.workers.iter().map(|w| w.completed + w.failed).sum()
    }
}

/// Concurrent worker pool claiming from the shared task store.
///
/// # Lifecycle
/// - [`start`](Self::start) spawns every worker loop and returns only once
///   all of them have terminated
/// - [`stop`](Self::stop) is cooperative: in-flight executions finish, the
///   claim loops exit afterwards
/// - [`enqueue`](Self::enqueue) creates a task and wakes idle workers, so
///   pickup latency is not bounded by the poll interval
///
/// Wrap the scheduler in an `Arc` to drive `stop()`/`status()` from another
/// task while `start()` runs.
pub struct PoolScheduler {
    store: TaskStore,
    executor: Arc<dyn Executor>,
    recorder: Arc<dyn CostRecorder>,
    config: PoolConfig,
    stop: Arc<AtomicBool>,
    started: AtomicBool,
    wake: Arc<Notify>,
    /// One slot per worker; written only by that worker's loop, read by
    /// `status()`.
    slots: Arc<Vec<StdMutex<Option<TaskId>>>>,
}

impl PoolScheduler {
    /// Create a pool.
    ///
    /// # Errors
    /// `SchedulerError::Config` if the config registers zero workers.
    pub fn new(
        store: TaskStore,
        executor: Arc<dyn Executor>,
        recorder: Arc<dyn CostRecorder>,
        config: PoolConfig,
    ) -> Result<Self, SchedulerError> {
        if config.workers == 0 {
            return Err(SchedulerError::Config(
                "pool requires at least one worker".into(),
            ));
        }

        let slots = (0..config.workers)
            .map(|_| StdMutex::new(None))
            .collect::<Vec<_>>();

        Ok(Self {
            store,
            executor,
            recorder,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            wake: Arc::new(Notify::new()),
            slots: Arc::new(slots),
        })
    }

    /// Create a pending task and wake idle workers.
    pub async fn enqueue(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: TaskPriority,
        metadata: std::collections::BTreeMap<String, serde_json::Value>,
    ) -> Result<TaskId, SchedulerError> {
        let task = self
            .store
            .create(title, description, priority, metadata)
            .await?;
        self.wake.notify_waiters();
        Ok(task.id)
    }

    /// Signal every worker loop to exit after its current task.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// Snapshot each worker's claimed-task state.
    pub fn status(&self) -> Vec<WorkerStatus> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| WorkerStatus {
                worker: WorkerId::new(format!("worker-{i}")),
                active_task: *slot.lock().unwrap_or_else(|e| e.into_inner()),
            })
            .collect()
    }

    /// Run all worker loops to completion.
    ///
    /// Returns once every worker has terminated. A store fault in any worker
    /// is fatal: remaining workers are signalled to stop and the error is
    /// propagated after they wind down.
    ///
    /// # Errors
    /// `SchedulerError::Config` if the pool was already started;
    /// `SchedulerError::Store` on a store fault.
    pub async fn start(&self) -> Result<PoolReport, SchedulerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::Config("pool already started".into()));
        }

        let begun = Instant::now();
        let mut join_set: JoinSet<Result<WorkerTally, SchedulerError>> = JoinSet::new();

        for index in 0..self.config.workers {
            let worker = WorkerId::new(format!("worker-{index}"));
            let store = self.store.clone();
            let executor = self.executor.clone();
            let recorder = self.recorder.clone();
            let config = self.config.clone();
            let stop = self.stop.clone();
            let wake = self.wake.clone();
            let slots = self.slots.clone();

            join_set.spawn(async move {
                worker_loop(
                    index, worker, store, executor, recorder, config, stop, wake, slots,
                )
                .await
            });
        }

        let mut tallies = Vec::with_capacity(self.config.workers);
        let mut first_error: Option<SchedulerError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(tally)) => tallies.push(tally),
                Ok(Err(e)) => {
                    // Let the surviving workers drain instead of aborting
                    // their in-flight executions.
                    self.stop();
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    self.stop();
                    first_error.get_or_insert(SchedulerError::Join(e));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        tallies.sort_by(|a, b| a.worker.as_str().cmp(b.worker.as_str()));
        let report = PoolReport {
            workers: tallies,
            elapsed: begun.elapsed(),
        };
        tracing::info!(
            processed = report.processed(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "pool run finished"
        );
        Ok(report)
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    index: usize,
    worker: WorkerId,
    store: TaskStore,
    executor: Arc<dyn Executor>,
    recorder: Arc<dyn CostRecorder>,
    config: PoolConfig,
    stop: Arc<AtomicBool>,
    wake: Arc<Notify>,
    slots: Arc<Vec<StdMutex<Option<TaskId>>>>,
) -> Result<WorkerTally, SchedulerError> {
    let mut tally = WorkerTally {
        worker: worker.clone(),
        completed: 0,
        failed: 0,
    };
    tracing::debug!(worker = %worker, "worker loop starting");

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let Some(task) = store.claim(&worker).await? else {
            if config.stop_when_empty {
                break;
            }
            // Wait for an enqueue wake-up, falling back to bounded polling
            // for tasks created behind the pool's back.
            tokio::select! {
                _ = wake.notified() => {}
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
            continue;
        };

        set_slot(&slots[index], Some(task.id));
        store
            .update(task.id, TaskPatch::status(TaskStatus::InProgress))
            .await?;

        let request = ExecutionRequest::new(task.description.clone()).with_context(task.metadata);
        let outcome = executor.execute(request).await;
        record_quietly(&*recorder, worker.as_str(), &outcome.usage, outcome.success).await;

        let patch = if outcome.success {
            tally.completed += 1;
            TaskPatch::completed(outcome.content)
        } else {
            tally.failed += 1;
            tracing::warn!(worker = %worker, task_id = %task.id, error = ?outcome.error,
                "execution failed; marking task failed");
            TaskPatch::failed(outcome.error.unwrap_or_else(|| "execution failed".into()))
        };
        store.update(task.id, patch).await?;
        set_slot(&slots[index], None);
    }

    set_slot(&slots[index], None);
    tracing::debug!(worker = %worker, completed = tally.completed, failed = tally.failed,
        "worker loop finished");
    Ok(tally)
}

fn set_slot(slot: &StdMutex<Option<TaskId>>, value: Option<TaskId>) {
    *slot.lock().unwrap_or_else(|e| e.into_inner()) = value;
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::cost::NullRecorder;
    use crate::executor::testing::{FailOn, ScriptedExecutor};
    use crate::store::TaskFilter;

    async fn pool(
        store: TaskStore,
        executor: Arc<dyn Executor>,
        config: PoolConfig,
    ) -> PoolScheduler {
        PoolScheduler::new(store, executor, Arc::new(NullRecorder), config).unwrap()
    }

    #[tokio::test]
    async fn zero_workers_is_a_configuration_error() {
        let store = TaskStore::open_in_memory().await.unwrap();
        let err = PoolScheduler::new(
            store,
            Arc::new(ScriptedExecutor::always_ok()),
            Arc::new(NullRecorder),
            PoolConfig {
                workers: 0,
                ..PoolConfig::default()
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, SchedulerError::Config(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn drains_backlog_with_stop_when_empty() {
        let store = TaskStore::open_in_memory().await.unwrap();
        for i in 0..5 {
            store
                .create(format!("t{i}"), "work", TaskPriority::Medium, BTreeMap::new())
                .await
                .unwrap();
        }

        let scheduler = pool(
            store.clone(),
            Arc::new(ScriptedExecutor::always_ok()),
            PoolConfig {
                workers: 2,
                stop_when_empty: true,
                ..PoolConfig::default()
            },
        )
        .await;

        let report = scheduler.start().await.unwrap();
        assert_eq!(report.processed(), 5);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.completed + stats.failed, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_executions_mark_tasks_failed_and_loop_continues() {
        let store = TaskStore::open_in_memory().await.unwrap();
        for desc in ["fine", "poison", "fine too"] {
            store
                .create(desc, desc, TaskPriority::Medium, BTreeMap::new())
                .await
                .unwrap();
        }

        let scheduler = pool(
            store.clone(),
            Arc::new(FailOn {
                marker: "poison",
                latency: Duration::ZERO,
            }),
            PoolConfig {
                workers: 1,
                stop_when_empty: true,
                ..PoolConfig::default()
            },
        )
        .await;

        let report = scheduler.start().await.unwrap();
        assert_eq!(report.workers[0].completed, 2);
        assert_eq!(report.workers[0].failed, 1);

        let failed = store
            .query(TaskFilter::by_status(TaskStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].description, "poison");
        assert!(failed[0].error.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_worker_claims_in_priority_order() {
        struct OrderProbe(std::sync::Mutex<Vec<String>>);
        #[async_trait::async_trait]
        impl Executor for OrderProbe {
            async fn execute(&self, request: ExecutionRequest) -> crate::ExecutionOutcome {
                self.0.lock().unwrap().push(request.task.clone());
                crate::ExecutionOutcome::success("ok")
            }
        }

        let store = TaskStore::open_in_memory().await.unwrap();
        for (desc, priority) in [
            ("low", TaskPriority::Low),
            ("high", TaskPriority::High),
            ("medium", TaskPriority::Medium),
        ] {
            store
                .create(desc, desc, priority, BTreeMap::new())
                .await
                .unwrap();
        }

        let probe = Arc::new(OrderProbe(std::sync::Mutex::new(Vec::new())));
        let scheduler = pool(
            store.clone(),
            probe.clone(),
            PoolConfig {
                workers: 1,
                stop_when_empty: true,
                ..PoolConfig::default()
            },
        )
        .await;
        scheduler.start().await.unwrap();

        let order = probe.0.lock().unwrap().clone();
        assert_eq!(order, vec!["high", "medium", "low"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_is_cooperative() {
        let store = TaskStore::open_in_memory().await.unwrap();
        let scheduler = Arc::new(
            pool(
                store.clone(),
                Arc::new(ScriptedExecutor::always_ok()),
                PoolConfig {
                    workers: 2,
                    poll_interval: Duration::from_millis(20),
                    stop_when_empty: false,
                    ..PoolConfig::default()
                },
            )
            .await,
        );

        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.start().await })
        };

        scheduler
            .enqueue("t", "work", TaskPriority::Medium, BTreeMap::new())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop();

        let report = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("pool stopped promptly")
            .unwrap()
            .unwrap();
        assert_eq!(report.processed(), 1);
        assert_eq!(store.stats().await.unwrap().completed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn enqueue_wakes_idle_workers_before_poll_interval() {
        let store = TaskStore::open_in_memory().await.unwrap();
        let scheduler = Arc::new(
            pool(
                store.clone(),
                Arc::new(ScriptedExecutor::always_ok()),
                PoolConfig {
                    workers: 1,
                    // Deliberately enormous: pickup must come from the wake.
                    poll_interval: Duration::from_secs(60),
                    stop_when_empty: false,
                    ..PoolConfig::default()
                },
            )
            .await,
        );

        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.start().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        scheduler
            .enqueue("t", "work", TaskPriority::Medium, BTreeMap::new())
            .await
            .unwrap();

        let picked_up = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if store.stats().await.unwrap().completed == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(picked_up.is_ok(), "task not picked up via wake-up");

        scheduler.stop();
        let _ = runner.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn status_reflects_in_flight_claims() {
        let store = TaskStore::open_in_memory().await.unwrap();
        store
            .create("slow", "slow", TaskPriority::Medium, BTreeMap::new())
            .await
            .unwrap();

        let scheduler = Arc::new(
            pool(
                store.clone(),
                Arc::new(ScriptedExecutor::always_ok().with_latency(Duration::from_millis(300))),
                PoolConfig {
                    workers: 2,
                    stop_when_empty: true,
                    ..PoolConfig::default()
                },
            )
            .await,
        );

        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.start().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = scheduler.status();
        assert_eq!(status.len(), 2);
        assert_eq!(
            status.iter().filter(|s| s.active_task.is_some()).count(),
            1,
            "exactly one worker holds the single task"
        );

        let report = runner.await.unwrap().unwrap();
        assert_eq!(report.processed(), 1);
        assert!(scheduler.status().iter().all(|s| s.active_task.is_none()));
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let store = TaskStore::open_in_memory().await.unwrap();
        let scheduler = pool(
            store,
            Arc::new(ScriptedExecutor::always_ok()),
            PoolConfig {
                workers: 1,
                stop_when_empty: true,
                ..PoolConfig::default()
            },
        )
        .await;

        scheduler.start().await.unwrap();
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::Config(_))
        ));
    }
}
