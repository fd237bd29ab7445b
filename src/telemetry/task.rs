//! Task execution span helpers.

use opentelemetry::KeyValue;
use tracing::Span;

use super::metrics;
use crate::model::{TaskId, TaskStatus};

/// Start a span covering one task's execution on its thread.
pub fn start_task_span(task_type: &str, task_id: &TaskId) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.type" = task_type,
        "task.id" = %task_id,
    )
}

/// Emit a `state_transition` event inside `span` and count it.
pub fn record_state_transition(span: &Span, from: TaskStatus, to: TaskStatus) {
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "state_transition");
    });
    count_transition(from, to);
}

/// Count a transition that happened outside any task span (cancellation).
pub fn count_transition(from: TaskStatus, to: TaskStatus) {
    metrics::task_state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
}
