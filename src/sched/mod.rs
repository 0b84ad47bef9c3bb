//! Orchestration strategies over the executor capability.
//!
//! # Schedulers
//! - **PoolScheduler** ("swarm"): concurrent workers claiming from the store
//! - **FanoutScheduler** ("ultrawork"): bounded-parallel explicit task list
//! - **PipelineScheduler**: fixed ordered stage sequence on one task
//! - **GuaranteeScheduler** ("ralph"): staged execution + verification +
//!   bounded retry
//!
//! Schedulers depend on the store and/or the executor, never on each other
//! (the guarantee loop owns its own pipeline instance).

mod fanout;
mod guarantee;
mod pipeline;
mod pool;

pub use fanout::{FanoutItem, FanoutOutcome, FanoutReport, FanoutScheduler};
pub use guarantee::{GuaranteeReport, GuaranteeScheduler, VerificationCheck};
pub use pipeline::{PipelineReport, PipelineScheduler, StageResult, StageRole};
pub use pool::{PoolReport, PoolScheduler, WorkerStatus, WorkerTally};

use crate::store::StoreError;

/// Errors surfaced by the scheduler layer.
///
/// Executor failures are never errors here; they are recorded in the result
/// objects and the schedulers carry on. Errors are reserved for
/// configuration and store-layer faults.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Invalid configuration, surfaced immediately and never retried.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Store fault propagated from a worker loop.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A spawned worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
