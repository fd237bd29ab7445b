//! Task executor: runs each task's work on its own thread, drives the task
//! through its lifecycle, and always gives the type slot back to the guard.

use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::guard::Guard;
use super::registry::Registry;
use crate::error::{Result, UpstreamAuthError};
use crate::model::{Task, TaskId, TaskStatus};
use crate::telemetry::metrics;
use crate::telemetry::task::{count_transition, record_state_transition, start_task_span};

/// Type-erased work item. Produces a JSON result or an error.
pub type Work = Box<dyn FnOnce() -> anyhow::Result<serde_json::Value> + Send + 'static>;

/// Box a closure as [`Work`], flattening its return value to JSON.
pub fn into_work<F, T>(f: F) -> Work
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Serialize + Debug,
{
    Box::new(move || f().map(flatten_result))
}

/// Structured values become JSON; anything serde refuses falls back to its
/// `Debug` rendering.
pub fn flatten_result<T: Serialize + Debug>(value: T) -> serde_json::Value {
    serde_json::to_value(&value).unwrap_or_else(|e| {
        warn!(error = %e, "task result is not serializable, storing debug text");
        serde_json::Value::String(format!("{value:?}"))
    })
}

const AUTH_REMEDIATION: &str = "Upstream authentication failed (401 Unauthorized)\n\n\
Possible causes:\n  \
1. The access token has expired or was revoked\n  \
2. The token lacks the 'api' or 'read_api' scope\n  \
3. The upstream server URL is misconfigured\n\n\
Resolution:\n  \
1. Create a new access token with the 'api' scope\n  \
2. Update the token in the service environment\n  \
3. Restart the service";

/// Error text and operator message recorded on a failed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub error: String,
    pub message: String,
    /// The failure was a lost upstream credential.
    pub auth: bool,
}

impl FailureReport {
    pub fn from_error(err: &anyhow::Error) -> Self {
        let text = format!("{err:#}");
        let auth = err.chain().any(|cause| cause.is::<UpstreamAuthError>())
            || text.contains("401 Unauthorized");
        let message = if auth {
            AUTH_REMEDIATION.to_string()
        } else {
            format!("task failed: {text}")
        };
        Self {
            error: text,
            message,
            auth,
        }
    }

    fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        let text = format!("task panicked: {detail}");
        Self {
            message: format!("task failed: {text}"),
            error: text,
            auth: false,
        }
    }
}

/// Releases the guard slot when dropped, however the task thread exits.
struct SlotRelease {
    guard: Arc<Guard>,
    task_type: String,
    id: TaskId,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        self.guard.release(&self.task_type, self.id);
    }
}

/// Spawns one dedicated thread per submitted task. Unpooled.
#[derive(Debug, Clone)]
pub struct Executor {
    registry: Arc<Registry>,
    guard: Arc<Guard>,
}

impl Executor {
    pub fn new(registry: Arc<Registry>, guard: Arc<Guard>) -> Self {
        Self { registry, guard }
    }

    /// Hand `work` for `task` to a fresh thread and return immediately.
    ///
    /// If the thread cannot be spawned the task is failed in place and the
    /// slot is released; callers observe the failure on the record.
    pub fn submit(&self, task: &Task, work: Work) {
        let slot = SlotRelease {
            guard: Arc::clone(&self.guard),
            task_type: task.task_type.clone(),
            id: task.id,
        };
        let executor = self.clone();
        let id = task.id;

        let spawned = std::thread::Builder::new()
            .name(format!("task-{}", id.short()))
            .spawn(move || executor.run(slot, work));

        if let Err(e) = spawned {
            self.record_spawn_failure(id, &e);
        }
    }

    fn record_spawn_failure(&self, id: TaskId, err: &std::io::Error) {
        let text = format!("failed to spawn task thread: {err}");
        error!(task_id = %id, error = %err, "failed to spawn task thread");
        let now = Utc::now();
        let recorded = self.registry.mutate(id, |t| -> Result<()> {
            t.start(now)?;
            t.fail(now, text.clone(), format!("task failed: {text}"))
        });
        match recorded {
            Ok(Ok(())) => count_transition(TaskStatus::Running, TaskStatus::Failed),
            Ok(Err(e)) => warn!(task_id = %id, error = %e, "spawn failure not recorded"),
            Err(e) => warn!(task_id = %id, error = %e, "task vanished before spawn"),
        }
    }

    fn run(&self, slot: SlotRelease, work: Work) {
        let id = slot.id;
        let span = start_task_span(&slot.task_type, &id);
        let _entered = span.enter();

        match self.registry.mutate(id, |t| t.start(Utc::now())) {
            Ok(Ok(())) => {
                record_state_transition(&span, TaskStatus::Pending, TaskStatus::Running);
                info!(task_id = %id, task_type = %slot.task_type, "task started");
            }
            Ok(Err(_)) => {
                info!(task_id = %id, "task cancelled before start, skipping work");
                return;
            }
            Err(_) => {
                error!(task_id = %id, "task vanished before start");
                return;
            }
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(work));
        let now = Utc::now();

        let (to, recorded) = match outcome {
            Ok(Ok(value)) => (
                TaskStatus::Completed,
                self.registry.mutate(id, |t| -> Result<Option<f64>> {
                    t.complete(now, value)?;
                    Ok(t.duration(now))
                }),
            ),
            Ok(Err(err)) => {
                let report = FailureReport::from_error(&err);
                if report.auth {
                    error!(task_id = %id, error = %report.error, "task failed: upstream credential rejected");
                } else {
                    error!(task_id = %id, error = ?err, "task failed");
                }
                (TaskStatus::Failed, self.fail(id, now, report))
            }
            Err(payload) => {
                let report = FailureReport::from_panic(payload.as_ref());
                error!(task_id = %id, error = %report.error, "task panicked");
                (TaskStatus::Failed, self.fail(id, now, report))
            }
        };

        match recorded {
            Ok(Ok(duration)) => {
                record_state_transition(&span, TaskStatus::Running, to);
                let secs = duration.unwrap_or_default();
                metrics::task_duration_ms().record(
                    secs * 1000.0,
                    &[
                        KeyValue::new("task_type", slot.task_type.clone()),
                        KeyValue::new("status", to.as_str()),
                    ],
                );
                if to == TaskStatus::Completed {
                    info!(task_id = %id, duration_secs = secs, "task completed");
                } else {
                    debug!(task_id = %id, duration_secs = secs, "failure recorded");
                }
            }
            Ok(Err(e)) => error!(task_id = %id, error = %e, "could not record task outcome"),
            Err(e) => error!(task_id = %id, error = %e, "task vanished while running"),
        }
    }

    fn fail(
        &self,
        id: TaskId,
        now: chrono::DateTime<Utc>,
        report: FailureReport,
    ) -> Result<Result<Option<f64>>> {
        self.registry.mutate(id, |t| -> Result<Option<f64>> {
            t.fail(now, report.error, report.message)?;
            Ok(t.duration(now))
        })
    }
}
