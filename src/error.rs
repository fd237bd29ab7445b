//! Error types for taskq.

use thiserror::Error;

use crate::model::{TaskId, TaskStatus};

#[derive(Debug, Error)]
pub enum Error {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task {id} cannot be cancelled (status: {status})")]
    NotCancellable { id: TaskId, status: TaskStatus },

    #[error("task type {task_type} triggered too often, retry in {retry_after_secs}s")]
    RateLimited {
        task_type: String,
        retry_after_secs: u64,
    },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status a controller should answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::NotCancellable { .. } => 400,
            Error::RateLimited { .. } => 429,
            Error::InvalidTransition { .. } | Error::Config(_) | Error::Other(_) => 500,
        }
    }

    /// Seconds the caller must wait before retrying, if rate limited.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure raised by work that lost its credential or authorization with the
/// upstream version-control service.
///
/// The executor renders these into an operator-facing remediation message.
#[derive(Debug, Error)]
#[error("upstream authentication failed (401 Unauthorized): {0}")]
pub struct UpstreamAuthError(pub String);
