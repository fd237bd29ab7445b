//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if a value does not parse.

use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub task: TaskConfig,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// Knobs for the task service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfig {
    /// Minimum time between starts of two tasks of the same type.
    pub min_interval: Duration,
    /// How long terminal tasks are kept.
    pub retention: Duration,
    /// How often the janitor sweeps.
    pub cleanup_interval: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(300),
            retention: Duration::from_secs(24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

impl TaskConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            min_interval: Duration::from_secs(parsed_var("TASK_MIN_INTERVAL", 300)?),
            retention: Duration::from_secs(parsed_var("TASK_RETENTION_HOURS", 24)? * 3600),
            cleanup_interval: Duration::from_secs(parsed_var("TASK_CLEANUP_INTERVAL", 3600)?),
        })
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            task: TaskConfig::from_env()?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn parsed_var(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            Error::Config(format!(
                "environment variable {name} must be a non-negative integer, got '{raw}'"
            ))
        }),
        Err(_) => Ok(default),
    }
}
