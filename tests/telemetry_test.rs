//! Integration tests for telemetry initialization and span helpers.

use taskq::model::{TaskId, TaskStatus};
use taskq::telemetry::task::{count_transition, record_state_transition, start_task_span};
use taskq::telemetry::{TelemetryConfig, init_telemetry, metrics};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process, so a second
    // init in the same test binary is allowed to fail.
    let guard = init_telemetry(TelemetryConfig {
        endpoint: None,
        service_name: "taskq-test".to_string(),
        default_filter: "debug".to_string(),
    });
    if let Ok(guard) = guard {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn task_span_records_transitions() {
    let id = TaskId::new();
    let span = start_task_span("sync_repositories", &id);
    record_state_transition(&span, TaskStatus::Pending, TaskStatus::Running);
    record_state_transition(&span, TaskStatus::Running, TaskStatus::Completed);
    count_transition(TaskStatus::Pending, TaskStatus::Cancelled);
}

#[test]
fn instruments_build_against_the_noop_provider() {
    metrics::tasks_submitted().add(1, &[]);
    metrics::tasks_evicted().add(2, &[]);
    metrics::task_duration_ms().record(12.5, &[]);
}
