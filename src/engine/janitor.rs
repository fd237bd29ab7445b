//! Periodic eviction of old terminal tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Notify;
use tracing::{debug, info};

use super::registry::Registry;
use crate::telemetry::metrics;

/// Configuration for the janitor.
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// Terminal tasks older than this (by `created_at`) are evicted.
    pub retention: Duration,
    /// Time between sweeps.
    pub period: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 3600),
            period: Duration::from_secs(3600),
        }
    }
}

/// Sweeps the registry on a fixed period until shut down.
pub struct Janitor {
    registry: Arc<Registry>,
    config: JanitorConfig,
    shutdown: Arc<Notify>,
}

impl Janitor {
    pub fn new(registry: Arc<Registry>, config: JanitorConfig, shutdown: Arc<Notify>) -> Self {
        Self {
            registry,
            config,
            shutdown,
        }
    }

    /// Evict terminal tasks whose age at `now` exceeds the retention window.
    /// Pending and running tasks are never touched. Returns the eviction count.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let retention = TimeDelta::from_std(self.config.retention).unwrap_or(TimeDelta::MAX);

        let expired = self
            .registry
            .find(|t| t.status.is_terminal() && now - t.created_at > retention);

        let evicted = expired
            .into_iter()
            .filter(|id| self.registry.delete(*id).is_some())
            .count();

        if evicted > 0 {
            metrics::tasks_evicted().add(evicted as u64, &[]);
            info!(evicted, "evicted expired tasks");
        } else {
            debug!("janitor sweep found nothing to evict");
        }
        evicted
    }

    /// Sweep every `period` until the shutdown notifier fires.
    pub async fn run(self) {
        info!(
            period_secs = self.config.period.as_secs(),
            retention_secs = self.config.retention.as_secs(),
            "task janitor started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("task janitor shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.config.period) => {
                    self.sweep(Utc::now());
                }
            }
        }
    }
}
