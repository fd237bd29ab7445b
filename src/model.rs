//! Core data model.
//!
//! A task is one instance of triggered background work. It has identity
//! (id + task type), caller-supplied metadata, and a lifecycle status that
//! only ever moves forward.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Caller-supplied key/value pairs attached to a task at creation.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Task ID
// ---------------------------------------------------------------------------

/// Newtype for task IDs. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 chars of the UUID, for log lines and thread names.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(TaskId)
            .map_err(|e| Error::Other(format!("invalid task id '{s}': {e}")))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting for the executor to pick it up.
    Pending,
    /// Work is executing.
    Running,
    /// Work returned a value. Terminal.
    Completed,
    /// Work returned an error or panicked. Terminal.
    Failed,
    /// Cancelled before it started. Terminal.
    Cancelled,
}

impl TaskStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(Error::Other(format!("invalid task status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of background work tracked by the registry.
///
/// Fields are readable through accessors only. All mutation goes through
/// the transition methods below, which refuse any edge outside
/// `Pending -> Running -> {Completed, Failed}` and `Pending -> Cancelled`.
/// Once terminal, a task never changes again.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub(crate) id: TaskId,

    /// Logical operation name (e.g. "sync_repositories"). The dedup key.
    pub(crate) task_type: String,

    pub(crate) status: TaskStatus,

    pub(crate) created_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,

    /// Advisory progress, 0-100.
    pub(crate) progress: u8,

    pub(crate) message: String,

    /// Set only on `Completed`.
    pub(crate) result: Option<serde_json::Value>,

    /// Set only on `Failed`.
    pub(crate) error: Option<String>,

    /// Immutable after creation.
    pub(crate) metadata: Metadata,
}

impl Task {
    /// A fresh `Pending` task.
    pub fn new(
        id: TaskId,
        task_type: impl Into<String>,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type: task_type.into(),
            status: TaskStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            progress: 0,
            message: "task created".to_string(),
            result: None,
            error: None,
            metadata,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn transition(&mut self, to: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// `Pending -> Running`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(now);
        self.message = "task running".to_string();
        Ok(())
    }

    /// `Running -> Completed`.
    pub fn complete(&mut self, now: DateTime<Utc>, result: serde_json::Value) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.completed_at = Some(now);
        self.progress = 100;
        self.result = Some(result);
        self.message = "task completed".to_string();
        Ok(())
    }

    /// `Running -> Failed`.
    pub fn fail(
        &mut self,
        now: DateTime<Utc>,
        error: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.completed_at = Some(now);
        self.error = Some(error.into());
        self.message = message.into();
        Ok(())
    }

    /// `Pending -> Cancelled`.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::Cancelled)?;
        self.completed_at = Some(now);
        self.message = "task cancelled".to_string();
        Ok(())
    }

    /// Update advisory progress. Returns false (and changes nothing) once
    /// the task is terminal.
    pub fn set_progress(&mut self, progress: i64, message: &str) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.progress = progress.clamp(0, 100) as u8;
        if !message.is_empty() {
            self.message = message.to_string();
        }
        true
    }

    /// Seconds between start and completion, or start and `now` while running.
    pub fn duration(&self, now: DateTime<Utc>) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or(now);
        let micros = (end - started).num_microseconds().unwrap_or(i64::MAX);
        Some(micros as f64 / 1_000_000.0)
    }

    /// Read-only view handed out by the public API.
    pub fn snapshot(&self, now: DateTime<Utc>) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id,
            task_type: self.task_type.clone(),
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
            error: self.error.clone(),
            progress: self.progress,
            message: self.message.clone(),
            metadata: self.metadata.clone(),
            duration: self.duration(now),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Serialized view of a task, as consumed by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub task_type: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub progress: u8,
    pub message: String,
    pub metadata: Metadata,
    pub duration: Option<f64>,
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// Builder for a task creation request. Paired with a work closure in
/// [`TaskService::create_task`](crate::service::TaskService::create_task).
#[derive(Debug, Clone)]
pub struct NewTask {
    pub(crate) task_type: String,
    pub(crate) allow_duplicate: bool,
    pub(crate) metadata: Metadata,
    pub(crate) min_interval: Option<Duration>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            allow_duplicate: false,
            metadata: Metadata::new(),
            min_interval: None,
        }
    }

    /// Skip dedup and rate limiting entirely.
    pub fn allow_duplicate(mut self, allow: bool) -> Self {
        self.allow_duplicate = allow;
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Override the service-wide minimum interval for this request.
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = Some(interval);
        self
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }
}

/// What happened when a task was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOutcome {
    pub task_id: TaskId,
    /// False when the request was merged into an in-flight task.
    pub is_new: bool,
    pub message: String,
}

/// Filter for listing tasks. Newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFilter {
    pub task_type: Option<String>,
    pub status: Option<TaskStatus>,
    pub limit: usize,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            task_type: None,
            status: None,
            limit: 50,
        }
    }
}

impl TaskFilter {
    pub fn task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.task_type
            .as_deref()
            .is_none_or(|t| t == task.task_type)
            && self.status.is_none_or(|s| s == task.status)
    }
}
