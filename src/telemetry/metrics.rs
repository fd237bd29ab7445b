//! Metric instruments.
//!
//! Built from the globally registered `MeterProvider`; a no-op until
//! [`init_telemetry`](super::init_telemetry) installs an exporter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("taskq")
}

/// Counter: task creation requests.
/// Labels: `task_type`, `result` ("created" | "merged" | "rate_limited").
pub fn tasks_submitted() -> Counter<u64> {
    meter()
        .u64_counter("taskq.task.submitted")
        .with_description("Number of task creation requests")
        .build()
}

/// Counter: task status transitions.
/// Labels: `from`, `to`.
pub fn task_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("taskq.task.state_transitions")
        .with_description("Number of task status transitions")
        .build()
}

/// Counter: terminal tasks evicted by the janitor.
pub fn tasks_evicted() -> Counter<u64> {
    meter()
        .u64_counter("taskq.task.evicted")
        .with_description("Number of expired tasks evicted")
        .build()
}

/// Histogram: time from start to completion or failure.
/// Labels: `task_type`, `status`.
pub fn task_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("taskq.task.duration_ms")
        .with_description("Task execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
