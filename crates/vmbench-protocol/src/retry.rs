//! Retry policy for reconnecting operations.
//!
//! One policy serves both sides of the channel: the host retrying its
//! connect to a booting VM, and any caller retrying a transient I/O
//! failure. Callers supply the operation and a predicate deciding which
//! errors are worth another attempt.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

/// Backoff schedule for a retried operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, counting the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Ceiling for the growing delay.
    pub max_delay: Duration,
    /// Growth factor per attempt; 1.0 keeps the delay fixed.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    /// Three attempts, 100ms doubling to a 5s cap. Enough for blips,
    /// short enough not to stall a dispatch cycle.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Schedule for connecting to a freshly booted VM: ten attempts at a
    /// fixed half second. Boot progress is roughly linear, so a fixed
    /// poll tracks it better than exponential growth.
    pub fn for_vm_connect() -> Self {
        Self::fixed(10, Duration::from_millis(500))
    }

    /// Fixed-interval schedule: `max_attempts` tries, `delay` apart.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
        }
    }
}

/// Run `operation` under the given schedule.
///
/// An error for which `should_retry` returns false is returned
/// immediately; otherwise attempts continue until one succeeds or the
/// schedule is exhausted, returning the last error.
pub fn retry_with_backoff<T, E, F, R>(
    config: RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: R,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    // A zero-attempt schedule is nonsense; run the operation once.
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let error = match operation() {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = %operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let exhausted = attempt == max_attempts;
        if exhausted || !should_retry(&error) {
            warn!(
                operation = %operation_name,
                attempt,
                error = %error,
                exhausted,
                "giving up"
            );
            return Err(error);
        }

        debug!(
            operation = %operation_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying"
        );
        thread::sleep(delay);
        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
        );
    }

    unreachable!("max_attempts is at least 1")
}

/// Is this I/O error the kind that clears up on its own?
///
/// Covers a VM that has not bound its socket yet (`NotFound`,
/// `ConnectionRefused`) and ordinary connection churn.
pub fn is_transient_io_error(error: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        error.kind(),
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::NotFound
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}
