//! Child process supervision for job and monitor commands.
//!
//! Every child the agent spawns runs under a deadline; an untrusted job
//! is never waited on unboundedly. Piped output is drained on background
//! threads while the deadline is watched, so a child writing more than
//! the kernel pipe buffer never stalls on a full pipe.

use std::io::Read;
use std::process::Child;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often a running child is re-checked against its deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Captured stdout and stderr of a finished child.
#[derive(Debug, Default)]
pub struct ChildOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ChildOutput {
    /// Join the drain threads. Handles that were not piped (or already
    /// taken) contribute empty strings.
    fn collect(stdout: Option<JoinHandle<String>>, stderr: Option<JoinHandle<String>>) -> Self {
        Self {
            stdout: join_drain(stdout),
            stderr: join_drain(stderr),
        }
    }
}

/// Drain one piped handle to a string on its own thread, concurrently
/// with the deadline watch.
fn spawn_drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    })
}

fn join_drain(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Outcome of supervising a child to completion or deadline.
#[derive(Debug)]
pub enum WaitResult {
    /// The child exited on its own.
    Completed { exit_code: i32, output: ChildOutput },
    /// The deadline passed; the child was killed and reaped.
    TimedOut {
        output: ChildOutput,
        timeout_ms: u64,
    },
}

/// Supervise a child until it exits or `timeout_ms` elapses.
///
/// On timeout the child is killed, reaped, and whatever output it
/// produced so far is captured. EINTR during the status poll is retried,
/// never surfaced.
///
/// The pipes close once no process holds a write end; a grandchild that
/// inherited them keeps the drain alive until it exits too.
pub fn wait_with_timeout(child: &mut Child, timeout_ms: u64) -> std::io::Result<WaitResult> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let stdout = spawn_drain(child.stdout.take());
    let stderr = spawn_drain(child.stderr.take());

    loop {
        if let Some(status) = poll_status(child)? {
            let exit_code = status.code().unwrap_or(-1);
            return Ok(WaitResult::Completed {
                exit_code,
                output: ChildOutput::collect(stdout, stderr),
            });
        }

        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(WaitResult::TimedOut {
                output: ChildOutput::collect(stdout, stderr),
                timeout_ms,
            });
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

/// `try_wait` with EINTR retry. A signal landing mid-syscall is not an
/// error condition.
fn poll_status(child: &mut Child) -> std::io::Result<Option<std::process::ExitStatus>> {
    loop {
        match child.try_wait() {
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn piped(program: &str, args: &[&str]) -> Child {
        Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap()
    }

    #[test]
    fn completed_child_reports_exit_code_and_output() {
        let mut child = piped("sh", &["-c", "echo out; echo err >&2"]);
        match wait_with_timeout(&mut child, 5_000).unwrap() {
            WaitResult::Completed { exit_code, output } => {
                assert_eq!(exit_code, 0);
                assert!(output.stdout.contains("out"));
                assert!(output.stderr.contains("err"));
            }
            WaitResult::TimedOut { .. } => panic!("unexpected timeout"),
        }
    }

    #[test]
    fn nonzero_exit_code_is_reported() {
        let mut child = piped("sh", &["-c", "exit 42"]);
        match wait_with_timeout(&mut child, 5_000).unwrap() {
            WaitResult::Completed { exit_code, .. } => assert_eq!(exit_code, 42),
            WaitResult::TimedOut { .. } => panic!("unexpected timeout"),
        }
    }

    #[test]
    fn deadline_kills_the_child() {
        let mut child = piped("sleep", &["10"]);
        let started = Instant::now();
        match wait_with_timeout(&mut child, 50).unwrap() {
            WaitResult::TimedOut { timeout_ms, .. } => {
                assert_eq!(timeout_ms, 50);
                // Killed promptly, not after the sleep finished.
                assert!(started.elapsed() < Duration::from_secs(5));
            }
            WaitResult::Completed { .. } => panic!("expected timeout"),
        }
    }

    #[test]
    fn partial_output_survives_a_timeout() {
        // The sleep gets its own stdio so the pipes close with the shell.
        let mut child = piped("sh", &["-c", "echo early; sleep 10 >/dev/null 2>&1"]);
        match wait_with_timeout(&mut child, 200).unwrap() {
            WaitResult::TimedOut { output, .. } => {
                assert!(output.stdout.contains("early"));
            }
            WaitResult::Completed { .. } => panic!("expected timeout"),
        }
    }

    #[test]
    fn output_larger_than_the_pipe_buffer_completes() {
        // Well past the ~64 KiB kernel pipe buffer; without concurrent
        // draining the child blocks on a full pipe until the deadline.
        let mut child = piped("sh", &["-c", "head -c 1048576 /dev/zero | tr '\\0' 'x'"]);
        match wait_with_timeout(&mut child, 5_000).unwrap() {
            WaitResult::Completed { exit_code, output } => {
                assert_eq!(exit_code, 0);
                assert_eq!(output.stdout.len(), 1_048_576);
            }
            WaitResult::TimedOut { .. } => panic!("unexpected timeout"),
        }
    }
}
