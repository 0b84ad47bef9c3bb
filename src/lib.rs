//! # taskswarm
//!
//! Single-process task queue and worker orchestration engine for autonomous
//! agents.
//!
//! This library provides:
//! - A SQLite-backed task store with atomic claim semantics
//! - A concurrent worker pool ("swarm") draining the store
//! - A bounded-parallel fan-out scheduler ("ultrawork")
//! - A staged pipeline and a retry-until-verified loop ("ralph")
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!                 │          schedulers          │
//!                 │  pool / fanout / pipeline /  │
//!                 │          guarantee           │
//!                 └───────┬──────────────┬───────┘
//!                         │              │
//!                         ▼              ▼
//!                ┌─────────────┐  ┌─────────────┐
//!                │  TaskStore  │  │  Executor   │
//!                │  (SQLite)   │  │ (external)  │
//!                └─────────────┘  └─────────────┘
//! ```
//!
//! ## Task Flow
//! 1. A producer enqueues prioritized tasks into the store
//! 2. Workers atomically claim the highest-priority pending task
//! 3. The claimed task is handed to the executor capability
//! 4. The outcome is written back and reported to the cost sink
//!
//! ## Modules
//! - `store`: task data model and the SQLite-backed store
//! - `sched`: the four orchestration strategies
//! - `executor`: the external work-performing capability seam
//! - `cost`: usage metrics and the fire-and-forget cost sink
//! - `skills`: skill catalog and mode selection
//! - `config`: engine configuration

pub mod config;
pub mod cost;
pub mod executor;
pub mod sched;
pub mod skills;
pub mod store;

pub use config::{Config, ConfigError, GuaranteeConfig, PoolConfig};
pub use cost::{CostRecorder, NullRecorder, TracingRecorder, UsageMetrics};
pub use executor::{ExecutionOutcome, ExecutionRequest, Executor};
pub use sched::{
    FanoutItem, FanoutOutcome, FanoutReport, FanoutScheduler, GuaranteeReport, GuaranteeScheduler,
    PipelineReport, PipelineScheduler, PoolReport, PoolScheduler, SchedulerError, StageResult,
    StageRole, VerificationCheck, WorkerStatus, WorkerTally,
};
pub use skills::{FixedMode, Mode, ModeClassifier, Skill, SkillCatalog, SkillKind, SkillSet};
pub use store::{
    StoreError, Task, TaskFilter, TaskId, TaskPatch, TaskPriority, TaskStats, TaskStatus,
    TaskStore, WorkerId,
};
