//! SQLite-backed task store with atomic claim semantics.
//!
//! A single `tasks` table holds the whole backlog. The connection lives
//! behind an async mutex and every operation runs on the blocking pool, so
//! the claim transaction is serialized: two concurrent `claim` calls can
//! never observe the same pending row.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use super::task::{
    Task, TaskFilter, TaskId, TaskPatch, TaskPriority, TaskStats, TaskStatus, WorkerId,
};
use super::StoreError;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS tasks (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    priority INTEGER NOT NULL DEFAULT 1,
    assigned_worker TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    started_at INTEGER,
    completed_at INTEGER,
    result TEXT,
    error TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks(status, priority DESC, seq ASC);
CREATE INDEX IF NOT EXISTS idx_tasks_worker ON tasks(assigned_worker);
"#;

const TASK_COLUMNS: &str = "id, title, description, status, priority, assigned_worker, \
     created_at, updated_at, started_at, completed_at, result, error, metadata";

/// Durable task store over a single SQLite database.
///
/// # Atomicity
/// [`claim`](Self::claim) selects and transitions the next pending task in
/// one transaction under the connection lock. This is the one hard
/// correctness property of the subsystem: for N concurrent claimers and
/// M < N pending tasks, exactly M distinct tasks are handed out.
#[derive(Clone)]
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl TaskStore {
    /// Open (creating if necessary) a store at the given path.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, StoreError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an ephemeral in-memory store. Used for tests and one-shot runs.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio::task::spawn_blocking(|| {
            let conn = Connection::open_in_memory()?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, StoreError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a new pending task.
    pub async fn create(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: TaskPriority,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<Task, StoreError> {
        let conn = self.conn.clone();
        let now = now_ms();
        let task = Task {
            id: TaskId::new(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority,
            assigned_worker: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            metadata,
        };
        let metadata_json = serde_json::to_string(&task.metadata)?;

        let t = task.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO tasks (id, title, description, status, priority, created_at, updated_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    t.id.to_string(),
                    t.title,
                    t.description,
                    t.status.as_str(),
                    t.priority.rank(),
                    t.created_at,
                    t.updated_at,
                    metadata_json,
                ],
            )?;
            Ok::<_, StoreError>(())
        })
        .await??;

        tracing::debug!(task_id = %task.id, priority = ?task.priority, "task created");
        Ok(task)
    }

    /// Atomically claim the next pending task for `worker`.
    ///
    /// Selects the pending task with the highest priority (FIFO within a
    /// priority level), marks it `Claimed`, records the worker and the start
    /// timestamp, and returns the updated row. Returns `None` without side
    /// effects when the backlog holds no pending task.
    pub async fn claim(&self, worker: &WorkerId) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.clone();
        let claimer = worker.clone();
        let now = now_ms();

        let task = tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;

            let next: Option<i64> = tx
                .query_row(
                    "SELECT seq FROM tasks WHERE status = 'pending'
                     ORDER BY priority DESC, seq ASC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(seq) = next else {
                return Ok::<_, StoreError>(None);
            };

            // The status guard makes the update a no-op if the row somehow
            // moved on; under the connection lock this cannot race.
            let updated = tx.execute(
                "UPDATE tasks SET status = 'claimed', assigned_worker = ?1,
                        started_at = ?2, updated_at = ?2
                 WHERE seq = ?3 AND status = 'pending'",
                params![claimer.as_str(), now, seq],
            )?;
            if updated != 1 {
                tx.rollback()?;
                return Ok(None);
            }

            let task = tx.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE seq = ?1"),
                params![seq],
                task_from_row,
            )?;
            tx.commit()?;
            Ok(Some(task))
        })
        .await??;

        if let Some(ref t) = task {
            tracing::debug!(task_id = %t.id, worker = %worker, "task claimed");
        }
        Ok(task)
    }

    /// Apply a partial update to a task.
    ///
    /// Returns the updated task, or `None` if the id is unknown. A status
    /// change to a terminal state stamps `completed_at`; a status change that
    /// would move a terminal task back to a non-terminal state is dropped
    /// while the remaining fields still apply.
    pub async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.clone();
        let now = now_ms();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;

            let current = tx
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                    params![id.to_string()],
                    task_from_row,
                )
                .optional()?;

            let Some(mut task) = current else {
                return Ok::<_, StoreError>(None);
            };

            if let Some(status) = patch.status {
                // Terminal states only move forward; a backward transition
                // is dropped, not errored.
                if !(task.status.is_terminal() && !status.is_terminal()) {
                    if status.is_terminal() && !task.status.is_terminal() {
                        task.completed_at = Some(now);
                    }
                    task.status = status;
                }
            }
            if let Some(priority) = patch.priority {
                task.priority = priority;
            }
            if let Some(result) = patch.result {
                task.result = Some(result);
                task.error = None;
            }
            if let Some(error) = patch.error {
                task.error = Some(error);
                task.result = None;
            }
            task.updated_at = now;

            tx.execute(
                "UPDATE tasks SET status = ?1, priority = ?2, result = ?3, error = ?4,
                        completed_at = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    task.status.as_str(),
                    task.priority.rank(),
                    task.result,
                    task.error,
                    task.completed_at,
                    task.updated_at,
                    id.to_string(),
                ],
            )?;
            tx.commit()?;
            Ok(Some(task))
        })
        .await?
    }

    /// Fetch a single task by id.
    pub async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let task = conn
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                    params![id.to_string()],
                    task_from_row,
                )
                .optional()?;
            Ok::<_, StoreError>(task)
        })
        .await?
    }

    /// List tasks matching the filter, ordered by `(priority DESC, creation ASC)`.
    pub async fn query(&self, filter: TaskFilter) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            let mut clauses: Vec<String> = Vec::new();
            let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            if let Some(status) = filter.status {
                args.push(Box::new(status.as_str().to_string()));
                clauses.push(format!("status = ?{}", args.len()));
            }
            if let Some(worker) = filter.assigned_worker {
                args.push(Box::new(worker.as_str().to_string()));
                clauses.push(format!("assigned_worker = ?{}", args.len()));
            }
            if let Some(priority) = filter.priority {
                args.push(Box::new(priority.rank()));
                clauses.push(format!("priority = ?{}", args.len()));
            }

            let where_sql = if clauses.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", clauses.join(" AND "))
            };
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks {where_sql} ORDER BY priority DESC, seq ASC"
            );

            let mut stmt = conn.prepare(&sql)?;
            let params = rusqlite::params_from_iter(args.iter().map(|a| a.as_ref()));
            let tasks = stmt
                .query_map(params, task_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, StoreError>(tasks)
        })
        .await?
    }

    /// Aggregate task counts by status.
    pub async fn stats(&self) -> Result<TaskStats, StoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
            let mut stats = TaskStats::default();
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                match TaskStatus::parse(&status) {
                    TaskStatus::Pending => stats.pending = count,
                    TaskStatus::Claimed => stats.claimed = count,
                    TaskStatus::InProgress => stats.in_progress = count,
                    TaskStatus::Completed => stats.completed = count,
                    TaskStatus::Failed => stats.failed = count,
                    TaskStatus::Cancelled => stats.cancelled = count,
                }
            }
            Ok::<_, StoreError>(stats)
        })
        .await?
    }

    /// Delete a task. Returns whether a row was removed.
    pub async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let rows = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])?;
            Ok::<_, StoreError>(rows > 0)
        })
        .await?
    }

    /// Remove every task from the store. Returns the number removed.
    pub async fn clear(&self) -> Result<u64, StoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let rows = conn.execute("DELETE FROM tasks", [])?;
            Ok::<_, StoreError>(rows as u64)
        })
        .await?
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn task_from_row(row: &Row<'_>) -> Result<Task, rusqlite::Error> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(3)?;
    let priority_rank: i64 = row.get(4)?;
    let worker: Option<String> = row.get(5)?;
    let metadata_json: String = row.get(12)?;

    Ok(Task {
        id: id_str.parse().unwrap_or_default(),
        title: row.get(1)?,
        description: row.get(2)?,
        status: TaskStatus::parse(&status_str),
        priority: TaskPriority::from_rank(priority_rank),
        assigned_worker: worker.map(|w| WorkerId::new(w)),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        started_at: row.get(8)?,
        completed_at: row.get(9)?,
        result: row.get(10)?,
        error: row.get(11)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
    })
}
