//! Integration tests for the task janitor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use taskq::config::TaskConfig;
use taskq::engine::{Janitor, JanitorConfig, Registry};
use taskq::model::*;
use taskq::TaskService;
use tokio::sync::Notify;

fn janitor(registry: &Arc<Registry>) -> Janitor {
    Janitor::new(
        Arc::clone(registry),
        JanitorConfig::default(),
        Arc::new(Notify::new()),
    )
}

/// Insert a task created at `created_at` and drive it to `status`.
fn seed(registry: &Registry, created_at: DateTime<Utc>, status: TaskStatus) -> TaskId {
    let task = registry.create("sync_repositories", Metadata::new(), created_at);
    registry
        .mutate(task.id(), |t| match status {
            TaskStatus::Pending => Ok(()),
            TaskStatus::Running => t.start(created_at),
            TaskStatus::Completed => t
                .start(created_at)
                .and_then(|_| t.complete(created_at, serde_json::Value::Null)),
            TaskStatus::Failed => t
                .start(created_at)
                .and_then(|_| t.fail(created_at, "boom", "task failed: boom")),
            TaskStatus::Cancelled => t.cancel(created_at),
        })
        .unwrap()
        .unwrap();
    task.id()
}

#[test]
fn sweep_evicts_only_old_terminal_tasks() {
    let registry = Arc::new(Registry::new());
    let now = Utc::now();
    let old = now - TimeDelta::hours(25);
    let fresh = now - TimeDelta::hours(1);

    let old_completed = seed(&registry, old, TaskStatus::Completed);
    let old_failed = seed(&registry, old, TaskStatus::Failed);
    let old_cancelled = seed(&registry, old, TaskStatus::Cancelled);
    let old_pending = seed(&registry, old, TaskStatus::Pending);
    let old_running = seed(&registry, old, TaskStatus::Running);
    let fresh_completed = seed(&registry, fresh, TaskStatus::Completed);

    let evicted = janitor(&registry).sweep(now);

    assert_eq!(evicted, 3);
    for id in [old_completed, old_failed, old_cancelled] {
        assert!(registry.get(id).is_err(), "{id} should be evicted");
    }
    for id in [old_pending, old_running, fresh_completed] {
        assert!(registry.get(id).is_ok(), "{id} should be kept");
    }
}

#[test]
fn sweep_keeps_tasks_exactly_at_the_retention_boundary() {
    let registry = Arc::new(Registry::new());
    let now = Utc::now();
    let id = seed(&registry, now - TimeDelta::hours(24), TaskStatus::Completed);

    assert_eq!(janitor(&registry).sweep(now), 0);
    assert!(registry.get(id).is_ok());

    assert_eq!(janitor(&registry).sweep(now + TimeDelta::seconds(1)), 1);
    assert!(registry.is_empty());
}

#[test]
fn sweep_never_touches_active_tasks_however_old() {
    let registry = Arc::new(Registry::new());
    let ancient = Utc::now() - TimeDelta::days(365);
    seed(&registry, ancient, TaskStatus::Pending);
    seed(&registry, ancient, TaskStatus::Running);

    assert_eq!(janitor(&registry).sweep(Utc::now()), 0);
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn spawned_janitor_sweeps_periodically_and_stops_on_shutdown() {
    let service = TaskService::new(TaskConfig {
        min_interval: Duration::ZERO,
        retention: Duration::ZERO,
        cleanup_interval: Duration::from_millis(20),
    });

    let done = service
        .create_task(NewTask::new("quick_sync"), || Ok(()))
        .unwrap()
        .task_id;
    let (release, gate) = std::sync::mpsc::channel::<()>();
    let active = service
        .create_task(NewTask::new("long_sync"), move || {
            let _ = gate.recv();
            Ok(())
        })
        .unwrap()
        .task_id;

    let handle = service.spawn_janitor();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while service.get_task(done).is_ok() {
        assert!(tokio::time::Instant::now() < deadline, "janitor never swept");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!service.get_task(active).unwrap().status.is_terminal());
    release.send(()).unwrap();

    service.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("janitor did not stop")
        .unwrap();
}
