//! The task service. The public API for triggering and inspecting
//! background tasks.
//!
//! Construct one at startup and share it (typically as `Arc<TaskService>`)
//! with whatever layer triggers work.

use std::fmt::Debug;
use std::sync::Arc;

use chrono::Utc;
use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TaskConfig;
use crate::engine::{
    Admission, Executor, Guard, Janitor, JanitorConfig, Policy, Registry, Work, into_work,
};
use crate::error::{Error, Result};
use crate::model::{CreateOutcome, NewTask, Task, TaskFilter, TaskId, TaskSnapshot, TaskStatus};
use crate::telemetry::metrics;
use crate::telemetry::task::count_transition;

pub struct TaskService {
    registry: Arc<Registry>,
    guard: Arc<Guard>,
    executor: Executor,
    config: TaskConfig,
    shutdown: Arc<Notify>,
}

impl TaskService {
    pub fn new(config: TaskConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let guard = Arc::new(Guard::new());
        let executor = Executor::new(Arc::clone(&registry), Arc::clone(&guard));
        info!(
            min_interval_secs = config.min_interval.as_secs(),
            "task service initialized"
        );
        Self {
            registry,
            guard,
            executor,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// Create a task and start `work` in the background.
    ///
    /// Returns immediately. If a task of the same type is still pending or
    /// running (and duplicates are not allowed), the existing task id comes
    /// back with `is_new == false` and `work` is dropped unrun.
    ///
    /// # Errors
    ///
    /// [`Error::RateLimited`] when the previous task of this type started
    /// less than the minimum interval ago.
    pub fn create_task<F, T>(&self, new: NewTask, work: F) -> Result<CreateOutcome>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Serialize + Debug,
    {
        self.submit(new, into_work(work))
    }

    /// [`create_task`](Self::create_task) for already boxed work.
    pub fn submit(&self, new: NewTask, work: Work) -> Result<CreateOutcome> {
        let NewTask {
            task_type,
            allow_duplicate,
            metadata,
            min_interval,
        } = new;
        let policy = Policy {
            allow_duplicate,
            min_interval: min_interval.unwrap_or(self.config.min_interval),
        };
        let now = Utc::now();

        let admission = self.guard.try_acquire(
            &task_type,
            policy,
            |id| self.is_active(id),
            || self.registry.create(&task_type, metadata, now).id,
        );

        match admission {
            Admission::Proceed(id) => {
                let task = self.registry.get(id)?;
                count_submitted(&task_type, "created");
                info!(task_id = %id, task_type = %task_type, "task created");
                self.executor.submit(&task, work);
                Ok(CreateOutcome {
                    task_id: id,
                    is_new: true,
                    message: "task created".to_string(),
                })
            }
            Admission::Merged(id) => {
                count_submitted(&task_type, "merged");
                warn!(task_id = %id, task_type = %task_type, "task type already in flight, returning existing task");
                Ok(CreateOutcome {
                    task_id: id,
                    is_new: false,
                    message: "a task of this type is already running, returned the existing task"
                        .to_string(),
                })
            }
            Admission::Rejected { retry_after_secs } => {
                count_submitted(&task_type, "rate_limited");
                warn!(
                    task_type = %task_type,
                    retry_after_secs,
                    min_interval_secs = policy.min_interval.as_secs(),
                    "task triggered too often"
                );
                Err(Error::RateLimited {
                    task_type,
                    retry_after_secs,
                })
            }
        }
    }

    fn is_active(&self, id: TaskId) -> bool {
        self.registry
            .status(id)
            .is_some_and(|s| !s.is_terminal())
    }

    pub fn get_task(&self, id: TaskId) -> Result<TaskSnapshot> {
        self.registry.get(id).map(|t| t.snapshot(Utc::now()))
    }

    /// Tasks matching `filter`, newest first.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<TaskSnapshot> {
        let now = Utc::now();
        self.registry
            .list(filter)
            .iter()
            .map(|t| t.snapshot(now))
            .collect()
    }

    /// Cancel a task that has not started yet.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown ids, [`Error::NotCancellable`] once the
    /// task is running or finished. Running work is never interrupted.
    pub fn cancel_task(&self, id: TaskId) -> Result<()> {
        let now = Utc::now();
        let cancelled = self.registry.mutate(id, |t: &mut Task| {
            let status = t.status;
            t.cancel(now)
                .map_err(|_| Error::NotCancellable { id, status })
        })?;

        match cancelled {
            Ok(()) => {
                count_transition(TaskStatus::Pending, TaskStatus::Cancelled);
                info!(task_id = %id, "task cancelled");
                Ok(())
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "refused to cancel task");
                Err(e)
            }
        }
    }

    /// Report advisory progress for a task. `progress` is clamped to 0-100;
    /// an empty `message` keeps the current one. Ignored once terminal.
    pub fn update_progress(&self, id: TaskId, progress: i64, message: &str) -> Result<()> {
        let applied = self
            .registry
            .mutate(id, |t| t.set_progress(progress, message))?;
        if applied {
            debug!(task_id = %id, progress, progress_message = message, "task progress updated");
        } else {
            debug!(task_id = %id, "ignoring progress for finished task");
        }
        Ok(())
    }

    /// A janitor over this service's registry, sharing its shutdown signal.
    pub fn janitor(&self) -> Janitor {
        Janitor::new(
            Arc::clone(&self.registry),
            JanitorConfig {
                retention: self.config.retention,
                period: self.config.cleanup_interval,
            },
            Arc::clone(&self.shutdown),
        )
    }

    /// Start the periodic sweep on the current tokio runtime.
    pub fn spawn_janitor(&self) -> JoinHandle<()> {
        tokio::spawn(self.janitor().run())
    }

    /// Stop the janitor. Running tasks finish on their own threads.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

impl Default for TaskService {
    fn default() -> Self {
        Self::new(TaskConfig::default())
    }
}

fn count_submitted(task_type: &str, result: &'static str) {
    metrics::tasks_submitted().add(
        1,
        &[
            KeyValue::new("task_type", task_type.to_string()),
            KeyValue::new("result", result),
        ],
    );
}
