//! Deduplication guard: at most one in-flight task per task type, and a
//! minimum interval between the starts of two instances of the same type.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::model::TaskId;

/// How a request should be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Bypass the guard completely.
    pub allow_duplicate: bool,
    /// Minimum time between starts of the same type.
    pub min_interval: Duration,
}

/// Outcome of [`Guard::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new task was admitted and created.
    Proceed(TaskId),
    /// An instance of this type is still active; the request folds into it.
    Merged(TaskId),
    /// Too soon after the last start of this type.
    Rejected { retry_after_secs: u64 },
}

/// Per-type bookkeeping. Created lazily, never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupEntry {
    /// The task currently holding this type's slot.
    pub in_flight: Option<TaskId>,
    pub last_started_at: Option<DateTime<Utc>>,
}

/// The guard. Every check-and-set runs under one mutex.
#[derive(Debug, Default)]
pub struct Guard {
    entries: Mutex<HashMap<String, DedupEntry>>,
}

impl Guard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a request for `task_type` may proceed.
    ///
    /// `is_active` reports whether a task id still refers to a pending or
    /// running task. `admit` creates the task record and returns its id; it
    /// runs under the guard lock so a concurrent caller that gets `Merged`
    /// can always look the id up.
    pub fn try_acquire(
        &self,
        task_type: &str,
        policy: Policy,
        is_active: impl Fn(TaskId) -> bool,
        admit: impl FnOnce() -> TaskId,
    ) -> Admission {
        self.try_acquire_at(Utc::now(), task_type, policy, is_active, admit)
    }

    pub(crate) fn try_acquire_at(
        &self,
        now: DateTime<Utc>,
        task_type: &str,
        policy: Policy,
        is_active: impl Fn(TaskId) -> bool,
        admit: impl FnOnce() -> TaskId,
    ) -> Admission {
        if policy.allow_duplicate {
            return Admission::Proceed(admit());
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(task_type.to_string()).or_default();

        // A slot pointing at a task that was cancelled before it ran does not
        // merge; fall through to the interval check instead.
        if let Some(id) = entry.in_flight
            && is_active(id)
        {
            return Admission::Merged(id);
        }

        if let Some(last) = entry.last_started_at
            && let Some(retry_after_secs) = remaining_secs(now - last, policy.min_interval)
        {
            return Admission::Rejected { retry_after_secs };
        }

        let id = admit();
        entry.in_flight = Some(id);
        entry.last_started_at = Some(now);
        Admission::Proceed(id)
    }

    /// Free the slot for `task_type` if `id` holds it. Safe to call any
    /// number of times, and for tasks that never held the slot.
    pub fn release(&self, task_type: &str, id: TaskId) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(task_type)
            && entry.in_flight == Some(id)
        {
            entry.in_flight = None;
            debug!(task_type, task_id = %id, "released task type slot");
        }
    }

    /// Copy of the bookkeeping for one type.
    pub fn entry(&self, task_type: &str) -> Option<DedupEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_type)
            .cloned()
    }
}

/// Whole seconds left in the window, rounded up. None once it has elapsed.
fn remaining_secs(elapsed: TimeDelta, min_interval: Duration) -> Option<u64> {
    let window = TimeDelta::from_std(min_interval).unwrap_or(TimeDelta::MAX);
    if elapsed >= window {
        return None;
    }
    let remaining = window.checked_sub(&elapsed).unwrap_or(window).min(window);
    let millis = remaining.num_milliseconds().max(1) as u64;
    Some(millis.div_ceil(1000))
}
