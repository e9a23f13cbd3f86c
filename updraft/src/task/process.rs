//! Finding and terminating running processes by name.

use std::time::{Duration, Instant};

use super::error::{TaskError, TaskResult};

/// Interval between liveness checks while waiting for a process to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A running process matched by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operating-system process control used by the stop-process task.
pub trait ProcessControl: Send + Sync {
    /// Every running process whose executable name equals `name`
    /// (without any `.exe` suffix). The calling process is never returned.
    fn find_by_name(&self, name: &str) -> TaskResult<Vec<ProcessId>>;

    /// Forcefully terminate `pid`. A process that is already gone is not an error.
    fn kill(&self, pid: ProcessId) -> TaskResult<()>;

    /// Whether `pid` is still running.
    fn is_running(&self, pid: ProcessId) -> bool;

    /// Block until `pid` has exited or `timeout` elapses. Returns `true` on exit.
    fn wait_for_exit(&self, pid: ProcessId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_running(pid) {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }
        true
    }
}

/// Process control backed by the host operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcesses;

/// Strip a trailing `.exe` (any case) from a process name.
pub fn strip_exe_suffix(name: &str) -> &str {
    let len = name.len();
    if len > 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".exe") {
        &name[..len - 4]
    } else {
        name
    }
}

fn own_pid() -> ProcessId {
    ProcessId(std::process::id())
}

fn lookup_error(reason: impl Into<String>) -> TaskError {
    TaskError::execution("stopProcess", reason)
}

#[cfg(target_os = "linux")]
mod imp {
    use std::fs;
    use std::path::Path;

    use super::*;

    /// Kernel limit on `/proc/<pid>/comm` length.
    const COMM_MAX: usize = 15;

    pub(super) fn find_by_name(name: &str) -> TaskResult<Vec<ProcessId>> {
        let entries = fs::read_dir("/proc")
            .map_err(|e| lookup_error(format!("cannot list processes: {}", e)))?;
        let own = own_pid();

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<u32>().ok())
                .map(ProcessId)
            else {
                continue;
            };
            if pid == own {
                continue;
            }
            if matches_name(&entry.path(), name) {
                found.push(pid);
            }
        }
        Ok(found)
    }

    fn matches_name(proc_dir: &Path, name: &str) -> bool {
        let exe_matches = fs::read_link(proc_dir.join("exe"))
            .ok()
            .and_then(|exe| exe.file_name().map(|n| n.to_string_lossy().to_string()))
            .map(|exe| strip_exe_suffix(&exe) == name)
            .unwrap_or(false);
        if exe_matches {
            return true;
        }

        let truncated: String = name.chars().take(COMM_MAX).collect();
        fs::read_to_string(proc_dir.join("comm"))
            .map(|comm| comm.trim_end() == truncated)
            .unwrap_or(false)
    }

    pub(super) fn kill(pid: ProcessId) -> TaskResult<()> {
        super::unix::kill(pid)
    }

    pub(super) fn is_running(pid: ProcessId) -> bool {
        if !super::unix::signal_zero(pid) {
            return false;
        }
        // A zombie has exited but not been reaped by its parent.
        let state = fs::read_to_string(format!("/proc/{}/stat", pid.0))
            .ok()
            .and_then(|stat| {
                let after = stat.rsplit_once(')')?.1;
                after.trim_start().chars().next()
            });
        !matches!(state, Some('Z') | Some('X'))
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
mod imp {
    use std::process::Command;

    use super::*;

    pub(super) fn find_by_name(name: &str) -> TaskResult<Vec<ProcessId>> {
        let output = Command::new("ps")
            .args(["-A", "-o", "pid=", "-o", "comm="])
            .output()
            .map_err(|e| lookup_error(format!("cannot run ps: {}", e)))?;
        let own = own_pid();

        let text = String::from_utf8_lossy(&output.stdout);
        let found = text
            .lines()
            .filter_map(|line| {
                let (pid, command) = line.trim().split_once(char::is_whitespace)?;
                let pid = ProcessId(pid.parse().ok()?);
                let base = command.trim().rsplit('/').next().unwrap_or_default();
                (pid != own && strip_exe_suffix(base) == name).then_some(pid)
            })
            .collect();
        Ok(found)
    }

    pub(super) fn kill(pid: ProcessId) -> TaskResult<()> {
        super::unix::kill(pid)
    }

    pub(super) fn is_running(pid: ProcessId) -> bool {
        super::unix::signal_zero(pid)
    }
}

#[cfg(unix)]
mod unix {
    use super::*;

    pub(super) fn kill(pid: ProcessId) -> TaskResult<()> {
        let raw = libc::pid_t::try_from(pid.0)
            .map_err(|_| lookup_error(format!("process id {} out of range", pid)))?;
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(raw, libc::SIGKILL) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(lookup_error(format!("cannot terminate process {}: {}", pid, err)))
    }

    pub(super) fn signal_zero(pid: ProcessId) -> bool {
        let Ok(raw) = libc::pid_t::try_from(pid.0) else {
            return false;
        };
        // SAFETY: signal 0 performs only the existence and permission check.
        let rc = unsafe { libc::kill(raw, 0) };
        rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(windows)]
mod imp {
    use std::process::Command;

    use super::*;

    pub(super) fn find_by_name(name: &str) -> TaskResult<Vec<ProcessId>> {
        let output = Command::new("tasklist")
            .args(["/FO", "CSV", "/NH"])
            .output()
            .map_err(|e| lookup_error(format!("cannot run tasklist: {}", e)))?;
        let own = own_pid();

        let text = String::from_utf8_lossy(&output.stdout);
        let found = text
            .lines()
            .filter_map(|line| {
                let mut columns = line.split("\",\"").map(|c| c.trim_matches('"'));
                let image = columns.next()?;
                let pid = ProcessId(columns.next()?.parse().ok()?);
                (pid != own && strip_exe_suffix(image).eq_ignore_ascii_case(name)).then_some(pid)
            })
            .collect();
        Ok(found)
    }

    pub(super) fn kill(pid: ProcessId) -> TaskResult<()> {
        let status = Command::new("taskkill")
            .args(["/F", "/PID", &pid.to_string()])
            .status()
            .map_err(|e| lookup_error(format!("cannot run taskkill: {}", e)))?;
        if status.success() || !is_running(pid) {
            Ok(())
        } else {
            Err(lookup_error(format!("cannot terminate process {}", pid)))
        }
    }

    pub(super) fn is_running(pid: ProcessId) -> bool {
        Command::new("tasklist")
            .args(["/FO", "CSV", "/NH", "/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains(&format!("\"{}\"", pid)))
            .unwrap_or(false)
    }
}

impl ProcessControl for SystemProcesses {
    fn find_by_name(&self, name: &str) -> TaskResult<Vec<ProcessId>> {
        imp::find_by_name(name)
    }

    fn kill(&self, pid: ProcessId) -> TaskResult<()> {
        imp::kill(pid)
    }

    fn is_running(&self, pid: ProcessId) -> bool {
        imp::is_running(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_exe_suffix() {
        assert_eq!(strip_exe_suffix("app.exe"), "app");
        assert_eq!(strip_exe_suffix("APP.EXE"), "APP");
        assert_eq!(strip_exe_suffix("app"), "app");
        assert_eq!(strip_exe_suffix(".exe"), ".exe");
        assert_eq!(strip_exe_suffix("app.exe.bak"), "app.exe.bak");
    }

    #[test]
    fn test_own_process_is_running() {
        assert!(SystemProcesses.is_running(own_pid()));
    }

    #[test]
    fn test_unknown_name_matches_nothing() {
        let found = SystemProcesses
            .find_by_name("updraft-no-such-process-4f1c")
            .unwrap();
        assert!(found.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_kill_and_wait_for_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = ProcessId(child.id());

        SystemProcesses.kill(pid).unwrap();
        // Reap so the child does not linger as a zombie on non-Linux hosts.
        child.wait().unwrap();
        assert!(SystemProcesses.wait_for_exit(pid, Duration::from_secs(5)));
    }
}
