//! # taskq
//!
//! In-process background task execution for request-driven services.
//!
//! A caller triggers long-running work (a data sync, a report rebuild) and
//! gets a task id back immediately. Tasks of the same type are deduplicated
//! while one is in flight and rate limited between starts. Terminal tasks
//! are evicted after a retention window.

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod service;
pub mod telemetry;

pub use error::{Error, Result, UpstreamAuthError};
pub use model::{CreateOutcome, NewTask, TaskFilter, TaskId, TaskSnapshot, TaskStatus};
pub use service::TaskService;
