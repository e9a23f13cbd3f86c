//! `stopProcess`: terminate every running process with a given name.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::error::{TaskError, TaskResult};
use super::process::{strip_exe_suffix, ProcessControl, SystemProcesses};
use super::{ExecuteContext, ExecutionStatus, UpdateTask};
use crate::feed::TaskDescriptor;

/// How long to wait for each terminated process to exit.
pub const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Kills every process named `name` and waits for each to exit.
///
/// Stopping the application conflicts with a hot run, so a hot execute only
/// asks for a cold pass. Finding no matching process is a success.
pub struct StopProcessTask {
    name: String,
    processes: Arc<dyn ProcessControl>,
    exit_timeout: Duration,
}

impl StopProcessTask {
    pub const ALIAS: &'static str = "stopProcess";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processes: Arc::new(SystemProcesses),
            exit_timeout: DEFAULT_EXIT_TIMEOUT,
        }
    }

    pub fn from_descriptor(descriptor: &TaskDescriptor) -> TaskResult<Self> {
        Ok(Self::new(descriptor.require("name")?))
    }

    pub fn with_process_control(mut self, processes: Arc<dyn ProcessControl>) -> Self {
        self.processes = processes;
        self
    }

    pub fn with_exit_timeout(mut self, timeout: Duration) -> Self {
        self.exit_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl UpdateTask for StopProcessTask {
    fn alias(&self) -> &'static str {
        Self::ALIAS
    }

    fn description(&self) -> String {
        format!("stop {}", self.name)
    }

    fn execute(&mut self, ctx: &ExecuteContext<'_>) -> TaskResult<ExecutionStatus> {
        if !ctx.cold_run {
            debug!(process = %self.name, "Deferring process stop to cold run");
            return Ok(ExecutionStatus::RequiresAppRestart);
        }

        let name = strip_exe_suffix(&self.name);
        let matches = self.processes.find_by_name(name)?;
        if matches.is_empty() {
            debug!(process = name, "No running process to stop");
            return Ok(ExecutionStatus::Successful);
        }

        for pid in matches {
            info!(process = name, %pid, "Stopping process");
            self.processes.kill(pid)?;
            if !self.processes.wait_for_exit(pid, self.exit_timeout) {
                return Err(TaskError::execution(
                    Self::ALIAS,
                    format!(
                        "process {} ({}) did not exit within {}s",
                        name,
                        pid,
                        self.exit_timeout.as_secs()
                    ),
                ));
            }
        }
        Ok(ExecutionStatus::Successful)
    }
}
