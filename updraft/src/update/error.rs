//! Errors surfaced by the update orchestrator.

use std::fmt;

use thiserror::Error;

use super::state::UpdateState;
use crate::feed::FeedError;
use crate::fetch::FetchError;
use crate::task::TaskError;

/// Result type for orchestrator operations.
pub type UpdateResult<T> = Result<T, UpdateError>;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UrlResolution,
    Transport,
    Integrity,
    Execution,
    Configuration,
    Cancellation,
    /// Local file-system failure while staging or installing.
    Storage,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::UrlResolution => "url resolution",
            ErrorKind::Transport => "transport",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Execution => "execution",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Cancellation => "cancellation",
            ErrorKind::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One task whose rollback failed.
#[derive(Debug)]
pub struct RollbackFailure {
    pub task: String,
    pub error: TaskError,
}

/// Outcome of rolling back executed tasks.
#[derive(Debug, Default)]
pub struct RollbackReport {
    /// Tasks rolled back, in the order they were undone.
    pub rolled_back: Vec<String>,
    pub failures: Vec<RollbackFailure>,
    /// Rollback was disabled for the run.
    pub skipped: bool,
}

impl RollbackReport {
    pub(crate) fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.skipped && self.failures.is_empty()
    }
}

impl fmt::Display for RollbackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skipped {
            return write!(f, "rollback disabled");
        }
        write!(f, "rolled back {} task(s)", self.rolled_back.len())?;
        if !self.failures.is_empty() {
            write!(f, "; {} rollback failure(s):", self.failures.len())?;
            for failure in &self.failures {
                write!(f, " [{}: {}]", failure.task, failure.error)?;
            }
        }
        Ok(())
    }
}

/// Errors from checking, preparing, applying or rolling back updates.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The fetcher could not be constructed.
    #[error("cannot set up fetcher: {0}")]
    Setup(#[source] FetchError),

    /// The feed could not be retrieved.
    #[error("update check failed: {0}")]
    Check(#[source] FetchError),

    #[error("invalid feed: {0}")]
    Feed(#[from] FeedError),

    /// A feed task could not be turned into an update task.
    #[error("cannot load {alias} task: {source}")]
    Load {
        alias: String,
        #[source]
        source: TaskError,
    },

    #[error("cannot prepare '{task}': {source}")]
    Prepare {
        task: String,
        #[source]
        source: TaskError,
    },

    /// A task failed during apply. `rollback` reports what was undone.
    #[error("'{task}' failed: {cause} ({rollback})")]
    Apply {
        task: String,
        #[source]
        cause: TaskError,
        rollback: RollbackReport,
    },

    /// An explicit rollback left some tasks unrestored.
    #[error("rollback incomplete: {0}")]
    Rollback(RollbackReport),

    #[error("update run was cancelled")]
    Cancelled,

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: UpdateState,
    },
}

impl UpdateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpdateError::Setup(_) => ErrorKind::Configuration,
            UpdateError::Check(e) => fetch_kind(e),
            UpdateError::Feed(_) => ErrorKind::Configuration,
            UpdateError::Load { source, .. } => task_kind(source),
            UpdateError::Prepare { source, .. } => task_kind(source),
            UpdateError::Apply { cause, .. } => task_kind(cause),
            UpdateError::Rollback(_) => ErrorKind::Execution,
            UpdateError::Cancelled => ErrorKind::Cancellation,
            UpdateError::InvalidState { .. } => ErrorKind::Configuration,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancellation
    }
}

pub(crate) fn fetch_kind(error: &FetchError) -> ErrorKind {
    match error {
        FetchError::UrlResolution { .. } => ErrorKind::UrlResolution,
        FetchError::Transport { .. } => ErrorKind::Transport,
        FetchError::Integrity { .. } => ErrorKind::Integrity,
        FetchError::Cancelled { .. } => ErrorKind::Cancellation,
        FetchError::Storage { .. } => ErrorKind::Storage,
        FetchError::SessionBusy { .. } => ErrorKind::Execution,
        FetchError::Configuration(_) => ErrorKind::Configuration,
    }
}

pub(crate) fn task_kind(error: &TaskError) -> ErrorKind {
    match error {
        TaskError::Execution { .. } => ErrorKind::Execution,
        TaskError::Configuration(_) => ErrorKind::Configuration,
        TaskError::Fetch(e) => fetch_kind(e),
        TaskError::Io { .. } => ErrorKind::Storage,
    }
}
