//! `startProcess`: launch an executable from the application directory.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info};

use super::error::{TaskError, TaskResult};
use super::{ExecuteContext, ExecutionStatus, UpdateTask};
use crate::feed::TaskDescriptor;

/// Pause before launching, so a just-stopped process can release file locks.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Launches `<app dir>/<name>` with optional arguments.
///
/// Starting the application conflicts with a hot run, so a hot execute only
/// asks for a cold pass. The launched process is not waited for.
#[derive(Debug, Clone)]
pub struct StartProcessTask {
    name: String,
    args: Option<String>,
    shell: bool,
    settle_delay: Duration,
}

impl StartProcessTask {
    pub const ALIAS: &'static str = "startProcess";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: None,
            shell: false,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn from_descriptor(descriptor: &TaskDescriptor) -> TaskResult<Self> {
        let mut task = Self::new(descriptor.require("name")?);
        task.args = descriptor.field("args").map(str::to_string);
        task.shell = descriptor.flag("shell", false)?;
        Ok(task)
    }

    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = Some(args.into());
        self
    }

    /// Run through the platform shell instead of executing directly.
    pub fn with_shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    fn command(&self, executable: &Path, app_dir: &Path) -> Command {
        let args = self.args.as_deref().unwrap_or_default();
        let mut command = if self.shell {
            shell_command(executable, args)
        } else {
            let mut command = Command::new(executable);
            command.args(split_args(args));
            command
        };
        command.current_dir(app_dir);
        command
    }
}

impl UpdateTask for StartProcessTask {
    fn alias(&self) -> &'static str {
        Self::ALIAS
    }

    fn description(&self) -> String {
        format!("start {}", self.name)
    }

    fn execute(&mut self, ctx: &ExecuteContext<'_>) -> TaskResult<ExecutionStatus> {
        if !ctx.cold_run {
            debug!(executable = %self.name, "Deferring process start to cold run");
            return Ok(ExecutionStatus::RequiresAppRestart);
        }

        std::thread::sleep(self.settle_delay);

        let executable = ctx.app_dir.join(&self.name);
        if !executable.is_file() {
            return Err(TaskError::execution(
                Self::ALIAS,
                format!("executable not found: {}", executable.display()),
            ));
        }

        let child = self
            .command(&executable, ctx.app_dir)
            .spawn()
            .map_err(|e| TaskError::io(Self::ALIAS, &executable, e))?;
        info!(executable = %executable.display(), pid = child.id(), "Started process");
        Ok(ExecutionStatus::Successful)
    }
}

#[cfg(unix)]
fn shell_command(executable: &Path, args: &str) -> Command {
    let quoted = executable.display().to_string().replace('\'', r"'\''");
    let mut command = Command::new("sh");
    command.arg("-c").arg(format!("'{}' {}", quoted, args));
    command
}

#[cfg(windows)]
fn shell_command(executable: &Path, args: &str) -> Command {
    let mut command = Command::new("cmd");
    command
        .arg("/C")
        .arg(format!("\"{}\" {}", executable.display(), args));
    command
}

/// Split an argument string on whitespace, keeping quoted runs together.
pub(crate) fn split_args(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut pending = false;

    for c in args.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                pending = true;
            }
            (None, c) if c.is_whitespace() => {
                if pending || !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            (None, c) => current.push(c),
        }
    }
    if pending || !current.is_empty() {
        out.push(current);
    }
    out
}
