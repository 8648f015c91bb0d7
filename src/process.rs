//! Process management utilities.
//!
//! Signal-based helpers for the spawned VM process: liveness probes and
//! graceful SIGTERM-then-SIGKILL shutdown.

use std::process::Child;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Default timeout for graceful shutdown before SIGKILL.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long SIGKILL is given to take effect before the final reap.
const SIGKILL_WAIT: Duration = Duration::from_millis(50);

/// Poll interval while waiting for a signalled process to exit.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Check if a process is alive.
///
/// Returns true if the process exists and is running.
pub fn is_alive(pid: libc::pid_t) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Send SIGTERM to a process.
///
/// Returns true if the signal was sent successfully.
pub fn terminate(pid: libc::pid_t) -> bool {
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

/// Send SIGKILL to a process.
///
/// Returns true if the signal was sent successfully.
pub fn kill(pid: libc::pid_t) -> bool {
    unsafe { libc::kill(pid, libc::SIGKILL) == 0 }
}

/// Non-blocking wait on a child, handling EINTR by retrying.
pub fn try_wait_child(child: &mut Child) -> std::io::Result<Option<i32>> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status.code().unwrap_or(-1))),
            Ok(None) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Gracefully stop a spawned child process.
///
/// 1. Sends SIGTERM
/// 2. Waits up to `timeout` for graceful exit
/// 3. Sends SIGKILL if still running, then reaps
///
/// Returns the exit code, or -1 when the status could not be determined.
pub fn stop_child(child: &mut Child, timeout: Duration) -> Result<i32> {
    // Already exited?
    if let Some(code) = try_wait_child(child)? {
        return Ok(code);
    }

    let pid = child.id() as libc::pid_t;
    terminate(pid);

    let start = Instant::now();
    while start.elapsed() < timeout {
        if let Some(code) = try_wait_child(child)? {
            return Ok(code);
        }
        std::thread::sleep(STOP_POLL_INTERVAL);
    }

    tracing::debug!(pid, "SIGTERM timeout, sending SIGKILL");
    kill(pid);
    std::thread::sleep(SIGKILL_WAIT);

    let status = child.wait()?;
    Ok(status.code().unwrap_or(-1))
}
