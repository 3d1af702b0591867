//! Child process helpers: one-shot commands and long-lived instances.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, info, trace, warn};

use crate::error::{CoreError, Result};

/// Lines of the instance log included in launch failures.
const LOG_TAIL_LINES: usize = 15;

/// Most of the instance log read when building a tail.
const LOG_TAIL_BYTES: u64 = 64 * 1024;

/// How long a stopping instance gets after SIGTERM before it is killed.
#[cfg(unix)]
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the group to vanish after SIGKILL.
#[cfg(unix)]
const KILL_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(unix)]
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Check that every binary in `tools` is on PATH.
pub fn require_tools(tools: &[&str]) -> Result<()> {
    for tool in tools {
        let path = which::which(tool).map_err(|_| CoreError::ToolNotFound(tool.to_string()))?;
        debug!(tool = %tool, path = %path.display(), "tool found");
    }
    Ok(())
}

/// Run a command to completion in `cwd` and return its stdout.
///
/// # Errors
///
/// Returns `CoreError::CommandFailed` with the captured stderr when the
/// command exits non-zero.
pub async fn run_checked(program: &str, args: &[&str], cwd: &Path) -> Result<String> {
    trace!(program = %program, args = ?args, cwd = %cwd.display(), "running command");

    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .output()
        .await?;

    trace!(
        status = %output.status,
        stdout_len = output.stdout.len(),
        stderr_len = output.stderr.len(),
        "command completed"
    );

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(CoreError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            stderr,
        })
    }
}

/// Result of launching an instance.
#[derive(Debug)]
pub enum LaunchOutcome {
    /// The process is still running after the grace period.
    Running(Instance),
    /// The start script exited cleanly, having handed off to a daemon.
    Detached,
}

/// A running application instance.
///
/// The instance leads its own process group, so everything the start script
/// forks (npm -> node) is stopped together.
#[derive(Debug)]
pub struct Instance {
    child: Child,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
}

impl Instance {
    /// Spawn `program args` in `cwd`, writing output to a fresh `log_file`,
    /// and watch it for `grace`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InstanceExited` if the process exits non-zero
    /// before the grace period ends.
    pub async fn spawn(
        program: &str,
        args: &[String],
        cwd: &Path,
        log_file: &Path,
        grace: Duration,
    ) -> Result<LaunchOutcome> {
        let log = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(log_file)?;
        let log_err = log.try_clone()?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(false);

        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let started_at = Utc::now();
        let pid = child.id();
        info!(program = %program, pid = ?pid, cwd = %cwd.display(), "instance spawned");

        match tokio::time::timeout(grace, child.wait()).await {
            Err(_) => Ok(LaunchOutcome::Running(Instance {
                child,
                pid,
                started_at,
            })),
            Ok(Ok(status)) if status.success() => {
                info!(pid = ?pid, "start script exited cleanly");
                Ok(LaunchOutcome::Detached)
            }
            Ok(Ok(status)) => {
                warn!(pid = ?pid, status = %status, "instance exited during grace period");
                Err(CoreError::InstanceExited {
                    code: status.code(),
                    log_tail: log_tail(log_file, LOG_TAIL_LINES),
                })
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }

    /// OS process ID, if the process had one at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// When the process was spawned.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether the leader or anything left in its process group is alive.
    pub fn is_running(&mut self) -> bool {
        if matches!(self.child.try_wait(), Ok(None)) {
            return true;
        }
        #[cfg(unix)]
        if let Some(group) = self.group() {
            return group_alive(group);
        }
        false
    }

    /// Stop the whole process group: SIGTERM, then SIGKILL for anything
    /// still alive after [`STOP_TIMEOUT`]. The leader is reaped either way.
    pub async fn stop(&mut self) -> Result<()> {
        #[cfg(unix)]
        if let Some(group) = self.group() {
            if signal_group(group, Signal::SIGTERM)? {
                if self.wait_for_group(group, STOP_TIMEOUT).await {
                    info!(pid = ?self.pid, "instance stopped");
                } else {
                    warn!(pid = ?self.pid, "instance ignored SIGTERM, killing process group");
                    signal_group(group, Signal::SIGKILL)?;
                    self.wait_for_group(group, KILL_TIMEOUT).await;
                }
            }
            self.child.wait().await?;
            return Ok(());
        }

        if matches!(self.child.try_wait(), Ok(None)) {
            self.child.kill().await?;
            info!(pid = ?self.pid, "instance killed");
        }
        Ok(())
    }

    #[cfg(unix)]
    fn group(&self) -> Option<Pid> {
        self.pid
            .and_then(|pid| i32::try_from(pid).ok())
            .filter(|&pid| pid > 1)
            .map(Pid::from_raw)
    }

    /// Poll until no member of `group` is left, reaping the leader on the
    /// way. Returns false on timeout.
    #[cfg(unix)]
    async fn wait_for_group(&mut self, group: Pid, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let _ = self.child.try_wait();
            if !group_alive(group) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    }
}

/// Send `sig` to every process in `group`.
///
/// Returns `Ok(false)` if the group is already gone (ESRCH).
#[cfg(unix)]
fn signal_group(group: Pid, sig: Signal) -> Result<bool> {
    match killpg(group, sig) {
        Ok(()) => {
            debug!(pgid = %group, signal = ?sig, "signal sent to process group");
            Ok(true)
        }
        Err(Errno::ESRCH) => {
            debug!(pgid = %group, signal = ?sig, "process group already gone");
            Ok(false)
        }
        Err(e) => Err(CoreError::Io(e.into())),
    }
}

/// Whether any process is left in `group`. Signal 0 only checks existence.
#[cfg(unix)]
fn group_alive(group: Pid) -> bool {
    killpg(group, None).is_ok()
}

/// Last `lines` lines of a log file, or an empty string if it can't be read.
///
/// Only the final [`LOG_TAIL_BYTES`] of the file are read.
pub fn log_tail(path: &Path, lines: usize) -> String {
    let Ok(mut file) = File::open(path) else {
        return String::new();
    };
    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
    let offset = len.saturating_sub(LOG_TAIL_BYTES);

    let mut bytes = Vec::new();
    if file.seek(SeekFrom::Start(offset)).is_err() || file.read_to_end(&mut bytes).is_err() {
        return String::new();
    }

    let content = String::from_utf8_lossy(&bytes);
    let mut all: Vec<&str> = content.lines().collect();
    // The first line is cut when reading from the middle of the file.
    if offset > 0 && !all.is_empty() {
        all.remove(0);
    }
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
