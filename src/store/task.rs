//! Core Task type and its lifecycle state machine.
//!
//! # Invariants
//! - `id` is unique within a store and immutable once assigned
//! - Status transitions are monotonic; a task never re-enters `Pending`
//!   after being claimed
//! - `result` and `error` are mutually exclusive terminal outputs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task.
///
/// # Properties
/// - Globally unique within a store
/// - Immutable once created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a worker participating in a pool.
///
/// Workers are named by the pool that registers them; the id is recorded on
/// every task the worker claims (history, not a live lock).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Status of a task in its lifecycle.
///
/// # State Machine
/// ```text
/// Pending -> Claimed -> InProgress -> Completed
///                                 \-> Failed
///         \-> Cancelled
/// ```
///
/// Transitions are monotonic. Once a task reaches a terminal state, updates
/// may overwrite its result/error fields but never move the status backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is waiting to be claimed
    Pending,
    /// Task has been atomically claimed by exactly one worker
    Claimed,
    /// The claiming worker has started executing the task
    InProgress,
    /// Task completed successfully
    Completed,
    /// Task failed with an error
    Failed,
    /// Task was cancelled before completion
    Cancelled,
}

impl TaskStatus {
    /// Check if the task is in a terminal state.
    ///
    /// # Property
    /// `is_terminal() => no further status transitions are permitted`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Stable string form used in the store schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Claimed => "claimed",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Parse the store's string form. Unknown strings map to `Pending`.
    pub fn parse(s: &str) -> Self {
        match s {
            "claimed" => TaskStatus::Claimed,
            "in_progress" => TaskStatus::InProgress,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Pending,
        }
    }
}

/// Priority of a task, used only for claim ordering.
///
/// Priority is advisory: it decides which pending task a worker claims next
/// (highest first, FIFO within a level) and never preempts in-flight work.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    /// Integer rank stored in the schema; higher claims first.
    pub fn rank(&self) -> i64 {
        match self {
            TaskPriority::Low => 0,
            TaskPriority::Medium => 1,
            TaskPriority::High => 2,
            TaskPriority::Critical => 3,
        }
    }

    /// Inverse of [`rank`](Self::rank). Out-of-range values map to `Medium`.
    pub fn from_rank(rank: i64) -> Self {
        match rank {
            0 => TaskPriority::Low,
            2 => TaskPriority::High,
            3 => TaskPriority::Critical,
            _ => TaskPriority::Medium,
        }
    }
}

/// A unit of schedulable work.
///
/// All timestamps are epoch milliseconds. `started_at` is stamped at claim
/// time, `completed_at` when the task reaches `Completed` or `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    /// Passed verbatim to the executor.
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Set at claim time, never cleared afterwards.
    pub assigned_worker: Option<WorkerId>,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Executor output on success. Mutually exclusive with `error`.
    pub result: Option<String>,
    /// Failure description on failure. Mutually exclusive with `result`.
    pub error: Option<String>,
    /// Opaque key/value bag passed through to the executor as context.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Partial update applied by [`TaskStore::update`](crate::store::TaskStore::update).
///
/// Only the supplied fields change. A status change to `Completed` or
/// `Failed` auto-stamps `completed_at`; a status change that would move a
/// terminal task backwards is dropped while the remaining fields still apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Patch that marks a task completed with the given output.
    pub fn completed(result: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            result: Some(result.into()),
            ..Self::default()
        }
    }

    /// Patch that marks a task failed with the given error.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Filter for [`TaskStore::query`](crate::store::TaskStore::query).
///
/// All present fields must match. Results are ordered by
/// `(priority DESC, creation order ASC)`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assigned_worker: Option<WorkerId>,
    pub priority: Option<TaskPriority>,
}

impl TaskFilter {
    pub fn by_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Aggregate task counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub pending: u64,
    pub claimed: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl TaskStats {
    /// Total number of tasks across all statuses.
    pub fn total(&self) -> u64 {
        self.pending
            + self.claimed
            + self.in_progress
            + self.completed
            + self.failed
            + self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Claimed.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
    }

    #[test]
    fn status_string_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Claimed,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), status);
        }
        assert_eq!(TaskStatus::parse("garbage"), TaskStatus::Pending);
    }

    #[test]
    fn priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Medium);
        assert!(TaskPriority::Medium > TaskPriority::Low);
        assert_eq!(TaskPriority::from_rank(TaskPriority::Critical.rank()), TaskPriority::Critical);
        assert_eq!(TaskPriority::from_rank(99), TaskPriority::Medium);
    }
}
