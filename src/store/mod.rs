//! Task store - durable record of tasks and their lifecycle state.
//!
//! The store is the only shared mutable resource in the engine. All mutation
//! goes through its operations, and `claim` is the single atomic handoff
//! point between the backlog and the workers.

mod sqlite;
mod task;

pub use sqlite::TaskStore;
pub use task::{
    Task, TaskFilter, TaskId, TaskPatch, TaskPriority, TaskStats, TaskStatus, WorkerId,
};

/// Errors raised by the task store.
///
/// Store operations never retry internally; a storage failure is fatal to the
/// calling operation and the scheduler layer above decides what to do next.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
