//! In-memory task registry.
//!
//! One mutex protects the map. Critical sections are field assignments and
//! lookups only; task work never runs while the lock is held.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{Metadata, Task, TaskFilter, TaskId, TaskStatus};

#[derive(Debug, Default)]
pub struct Registry {
    tasks: Mutex<HashMap<TaskId, Task>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id and insert a `Pending` task.
    pub fn create(&self, task_type: &str, metadata: Metadata, now: DateTime<Utc>) -> Task {
        let task = Task::new(TaskId::new(), task_type, metadata, now);
        self.lock().insert(task.id, task.clone());
        task
    }

    pub fn get(&self, id: TaskId) -> Result<Task> {
        self.lock().get(&id).cloned().ok_or(Error::NotFound(id))
    }

    /// Current status without cloning the record.
    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.lock().get(&id).map(|t| t.status)
    }

    /// Tasks matching `filter`, newest first, at most `filter.limit`.
    pub fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .lock()
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks.truncate(filter.limit);
        tasks
    }

    /// Apply `f` to the stored task under the lock.
    pub fn mutate<R>(&self, id: TaskId, f: impl FnOnce(&mut Task) -> R) -> Result<R> {
        let mut tasks = self.lock();
        let task = tasks.get_mut(&id).ok_or(Error::NotFound(id))?;
        Ok(f(task))
    }

    /// Ids of every task matching `pred`.
    pub fn find(&self, pred: impl Fn(&Task) -> bool) -> Vec<TaskId> {
        self.lock()
            .values()
            .filter(|t| pred(t))
            .map(|t| t.id)
            .collect()
    }

    pub fn delete(&self, id: TaskId) -> Option<Task> {
        self.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
