//! Integration tests for task execution: failure capture, isolation, and
//! result flattening.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use taskq::config::TaskConfig;
use taskq::engine::{Executor, FailureReport, Guard, Policy, Registry, flatten_result, into_work};
use taskq::model::*;
use taskq::{TaskService, UpstreamAuthError};

fn test_service() -> TaskService {
    TaskService::new(TaskConfig::default())
}

fn wait_terminal(service: &TaskService, id: TaskId) -> TaskSnapshot {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = service.get_task(id).unwrap();
        if snapshot.status.is_terminal() {
            return snapshot;
        }
        assert!(Instant::now() < deadline, "task {id} never finished");
        std::thread::sleep(Duration::from_millis(10));
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn failing_work_marks_task_failed() {
    let service = test_service();

    let outcome = service
        .create_task(NewTask::new("sync_branches"), || -> anyhow::Result<()> {
            Err(anyhow::anyhow!("connection reset").context("fetching branches"))
        })
        .unwrap();

    let task = wait_terminal(&service, outcome.task_id);
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error.as_deref(),
        Some("fetching branches: connection reset")
    );
    assert_eq!(task.message, "task failed: fetching branches: connection reset");
    assert_eq!(task.result, None);

    let started = task.started_at.unwrap();
    let completed = task.completed_at.unwrap();
    let expected = (completed - started).num_microseconds().unwrap() as f64 / 1_000_000.0;
    assert_eq!(task.duration, Some(expected));
}

#[test]
fn typed_auth_failure_gets_remediation_message() {
    let service = test_service();

    let outcome = service
        .create_task(NewTask::new("sync_projects"), || -> anyhow::Result<()> {
            Err(UpstreamAuthError("token revoked".into()).into())
        })
        .unwrap();

    let task = wait_terminal(&service, outcome.task_id);
    assert_eq!(task.status, TaskStatus::Failed);
    let error = task.error.unwrap();
    assert!(error.contains("401 Unauthorized"));
    assert!(error.contains("token revoked"));
    assert!(task.message.contains("Possible causes"));
    assert!(task.message.contains("Resolution"));
}

#[test]
fn textual_auth_failure_is_recognised() {
    let err = anyhow::anyhow!("GET /api/v4/projects returned 401 Unauthorized");
    let report = FailureReport::from_error(&err);

    assert!(report.auth);
    assert_eq!(report.error, "GET /api/v4/projects returned 401 Unauthorized");
    assert!(report.message.contains("Resolution"));

    let other = FailureReport::from_error(&anyhow::anyhow!("disk full"));
    assert!(!other.auth);
    assert_eq!(other.message, "task failed: disk full");
}

#[test]
fn panicking_work_fails_without_affecting_other_tasks() {
    let service = test_service();

    let bad = service
        .create_task(NewTask::new("explodes"), || -> anyhow::Result<()> {
            panic!("index out of bounds")
        })
        .unwrap();
    let good = service
        .create_task(NewTask::new("steady"), || Ok(json!({"ok": true})))
        .unwrap();

    let bad = wait_terminal(&service, bad.task_id);
    assert_eq!(bad.status, TaskStatus::Failed);
    assert!(bad.error.unwrap().contains("index out of bounds"));
    assert!(bad.completed_at.is_some());

    let good = wait_terminal(&service, good.task_id);
    assert_eq!(good.status, TaskStatus::Completed);

    // The registry and guard still work after the panic.
    let again = service
        .create_task(NewTask::new("steady").allow_duplicate(true), || Ok(1))
        .unwrap();
    assert_eq!(
        wait_terminal(&service, again.task_id).status,
        TaskStatus::Completed
    );
}

// ---------------------------------------------------------------------------
// Cancelled before start
// ---------------------------------------------------------------------------

#[test]
fn cancelled_task_never_runs_and_releases_slot() {
    let registry = Arc::new(Registry::new());
    let guard = Arc::new(Guard::new());
    let executor = Executor::new(Arc::clone(&registry), Arc::clone(&guard));

    let policy = Policy {
        allow_duplicate: false,
        min_interval: Duration::ZERO,
    };
    let mut created = None;
    guard.try_acquire(
        "nightly_report",
        policy,
        |_| true,
        || {
            let task = registry.create("nightly_report", Metadata::new(), Utc::now());
            let id = task.id();
            created = Some(task);
            id
        },
    );
    let task = created.unwrap();
    assert_eq!(guard.entry("nightly_report").unwrap().in_flight, Some(task.id()));

    registry.mutate(task.id(), |t| t.cancel(Utc::now())).unwrap().unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    executor
        .submit(
            &task,
            into_work(move || {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
        );

    let deadline = Instant::now() + Duration::from_secs(5);
    while guard.entry("nightly_report").unwrap().in_flight.is_some() {
        assert!(Instant::now() < deadline, "slot never released");
        std::thread::sleep(Duration::from_millis(10));
    }

    assert!(!ran.load(Ordering::SeqCst));
    let stored = registry.get(task.id()).unwrap();
    assert_eq!(stored.status(), TaskStatus::Cancelled);
    assert_eq!(stored.started_at(), None);
}

// ---------------------------------------------------------------------------
// Result flattening
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SyncSummary {
    projects: u32,
    branches: u32,
    skipped: Vec<String>,
}

#[test]
fn structured_results_flatten_to_objects() {
    let value = flatten_result(SyncSummary {
        projects: 2,
        branches: 17,
        skipped: vec!["archived".into()],
    });
    assert_eq!(
        value,
        json!({"projects": 2, "branches": 17, "skipped": ["archived"]})
    );
}

#[test]
fn unserializable_results_fall_back_to_debug_text() {
    let mut by_pair = HashMap::new();
    by_pair.insert((1, 2), "edge");

    let value = flatten_result(by_pair);

    assert_eq!(value, json!("{(1, 2): \"edge\"}"));
}

#[test]
fn completed_task_carries_flattened_result() {
    let service = test_service();

    let outcome = service
        .create_task(NewTask::new("statistics"), || {
            Ok(SyncSummary {
                projects: 1,
                branches: 4,
                skipped: vec![],
            })
        })
        .unwrap();

    let task = wait_terminal(&service, outcome.task_id);
    assert_eq!(
        task.result,
        Some(json!({"projects": 1, "branches": 4, "skipped": []}))
    );
}
