//! Errors raised by update tasks.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::fetch::FetchError;

/// Result type for task operations.
pub type TaskResult<T> = Result<T, TaskError>;

/// Errors that can occur while loading, preparing, executing or rolling back a task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task's action could not be performed.
    #[error("{task} failed: {reason}")]
    Execution { task: String, reason: String },

    /// Unknown alias or malformed descriptor.
    #[error("invalid task configuration: {0}")]
    Configuration(String),

    /// Payload retrieval failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Local file operation failed.
    #[error("{task}: I/O error on {}: {source}", .path.display())]
    Io {
        task: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TaskError {
    pub(crate) fn execution(task: impl Into<String>, reason: impl Into<String>) -> Self {
        TaskError::Execution {
            task: task.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(task: impl Into<String>, path: impl Into<PathBuf>, source: io::Error) -> Self {
        TaskError::Io {
            task: task.into(),
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskError::Fetch(e) if e.is_transient())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Fetch(e) if e.is_cancelled())
    }
}
