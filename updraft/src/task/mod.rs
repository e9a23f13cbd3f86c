//! Update tasks: the units of work an update run prepares, executes and
//! rolls back.
//!
//! Every task moves through three capabilities:
//!
//! ```text
//! prepare(ctx)   stage payloads into temporary storage; never touches the
//!                installed application
//! execute(ctx)   perform the change; hot runs defer anything that conflicts
//!                with the live application by returning RequiresAppRestart
//! rollback()     undo a successful execute
//! ```
//!
//! Tasks are created from feed descriptors through the [`TaskRegistry`],
//! which maps an alias to a factory.

mod backup;
mod condition;
mod error;
mod file_update;
mod process;
mod registry;
mod start_process;
mod stop_process;

use std::path::Path;

pub use backup::BackupStore;
pub use condition::{
    filetime_to_system_time, parse_conditions, system_time_to_filetime, update_needed, Condition,
    ConditionKind, DateComparison, SizeComparison,
};
pub use error::{TaskError, TaskResult};
pub use file_update::FileUpdateTask;
pub use process::{strip_exe_suffix, ProcessControl, ProcessId, SystemProcesses};
pub use registry::{TaskFactory, TaskRegistry};
pub use start_process::StartProcessTask;
pub use stop_process::StopProcessTask;

use crate::fetch::{Fetcher, ProgressCallback};

/// Outcome of executing a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Successful,
    Failed,
    /// The action conflicts with the live application and must run again
    /// in a cold pass.
    RequiresAppRestart,
}

impl ExecutionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionStatus::Successful => "successful",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::RequiresAppRestart => "requires app restart",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a task may use while preparing.
pub struct TaskContext<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub app_dir: &'a Path,
    /// Base for relative payload URLs, from the feed.
    pub base_url: Option<&'a str>,
    pub on_progress: Option<ProgressCallback<'a>>,
}

/// What a task may use while executing.
#[derive(Debug, Clone, Copy)]
pub struct ExecuteContext<'a> {
    pub app_dir: &'a Path,
    /// `true` once the application has exited.
    pub cold_run: bool,
    /// Where replaced files are backed up. `None` disables backups.
    pub backup: Option<&'a BackupStore>,
}

/// A unit of update work.
pub trait UpdateTask: Send {
    /// Registry alias of this task kind.
    fn alias(&self) -> &'static str;

    /// Short human-readable description for logs.
    fn description(&self) -> String;

    /// Whether this task has anything to do for the installed application.
    fn is_needed(&self, _app_dir: &Path) -> TaskResult<bool> {
        Ok(true)
    }

    fn prepare(&mut self, _ctx: &TaskContext<'_>) -> TaskResult<()> {
        Ok(())
    }

    fn execute(&mut self, ctx: &ExecuteContext<'_>) -> TaskResult<ExecutionStatus>;

    /// Undo a successful `execute`. `Ok` means the task is back in its
    /// original state.
    fn rollback(&mut self) -> TaskResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn UpdateTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.alias(), self.description())
    }
}
