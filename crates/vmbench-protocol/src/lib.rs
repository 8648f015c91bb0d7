//! Protocol types for vmbench host-guest communication.
//!
//! This crate defines the wire protocol spoken between the vmbench host
//! dispatcher and the guest agent (vmbench-agent) running inside the
//! benchmark VM.
//!
//! # Protocol Overview
//!
//! Communication uses JSON-encoded messages over a stream channel (vsock
//! inside the VM, exposed as a unix socket on the host side). Each message
//! is prefixed with a 4-byte big-endian length header.
//!
//! ```text
//! +----------------+-------------------+
//! | Length (4 BE)  | JSON payload      |
//! +----------------+-------------------+
//! ```
//!
//! Before any framed message is exchanged, the host performs a one-line
//! ASCII handshake: it sends `CONNECT <port>\n` and expects a reply line
//! starting with `OK`. See [`frame`] for the framing and handshake helpers.

#![deny(missing_docs)]

use serde::{Deserialize, Serialize};

pub mod frame;
pub mod retry;

pub use frame::{
    client_handshake, read_frame, recv_message, send_message, server_handshake, write_frame,
    FrameError,
};

/// Protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame size (16 MB). Larger frames are a protocol violation,
/// never a silent truncation.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Default guest vsock port the agent listens on.
pub const DEFAULT_GUEST_PORT: u32 = 5000;

fn default_lang() -> String {
    "cpp".to_string()
}

fn default_compiler() -> String {
    "g++".to_string()
}

fn default_opts() -> String {
    "-O2 -Wall".to_string()
}

/// A job sent from the host to the agent for execution.
///
/// Missing optional fields deserialize to explicit defaults rather than
/// failing, so older producers stay compatible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Source code to compile and/or run.
    pub code: String,
    /// Language tag (e.g. "c", "cpp", "python", "sh").
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Compiler or runtime identifier (e.g. "g++", "gcc").
    #[serde(default = "default_compiler")]
    pub compiler: String,
    /// Compiler/run options as a single string, split on whitespace.
    #[serde(default = "default_opts")]
    pub opts: String,
}

/// Classification of a job failure.
///
/// Distinguishes the failure stages so callers never have to string-match
/// on error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The compile step exited non-zero.
    Compile,
    /// The compile step exceeded its timeout.
    CompileTimeout,
    /// The program ran but exited non-zero.
    Runtime,
    /// The program exceeded the execution timeout.
    Timeout,
    /// Transport, VM, or agent-internal failure unrelated to the job code.
    Infrastructure,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Compile => write!(f, "compile"),
            ErrorKind::CompileTimeout => write!(f, "compile_timeout"),
            ErrorKind::Runtime => write!(f, "runtime"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Infrastructure => write!(f, "infrastructure"),
        }
    }
}

/// CPU performance-counter values for one job execution.
///
/// Every field is optional: a counter the monitoring tool did not report
/// (or reported unparseably) is simply absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfMetrics {
    /// Total CPU cycles.
    pub cpu_cycles: Option<u64>,
    /// Retired instructions.
    pub instructions: Option<u64>,
    /// Cache references.
    pub cache_references: Option<u64>,
    /// Cache misses.
    pub cache_misses: Option<u64>,
    /// Branch mispredictions.
    pub branch_misses: Option<u64>,
}

/// Whole-system resource and scheduler statistics sampled during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmstatSample {
    /// Processes in the run queue.
    pub procs_running: Option<u64>,
    /// Processes blocked on I/O.
    pub procs_blocked: Option<u64>,
    /// Free memory in KiB.
    pub memory_free_kb: Option<u64>,
    /// Used memory (buffers + cache) in KiB.
    pub memory_used_kb: Option<u64>,
    /// Swap in use in KiB.
    pub swap_used_kb: Option<u64>,
    /// Blocks read from devices per second.
    pub io_blocks_in: Option<u64>,
    /// Blocks written to devices per second.
    pub io_blocks_out: Option<u64>,
    /// CPU time in user space, percent.
    pub cpu_user_percent: Option<f64>,
    /// CPU time in kernel space, percent.
    pub cpu_system_percent: Option<f64>,
    /// CPU idle time, percent.
    pub cpu_idle_percent: Option<f64>,
}

/// Per-device I/O statistics sampled during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IostatDeviceSample {
    /// Device name (e.g. "vda").
    pub device: String,
    /// Read throughput in KiB per second.
    pub read_kb_per_sec: f64,
    /// Write throughput in KiB per second.
    pub write_kb_per_sec: f64,
    /// Device utilization, percent.
    pub cpu_util: f64,
    /// Device idle time, percent (100 - utilization).
    pub cpu_idle: f64,
    /// Average wait time across reads and writes, milliseconds.
    pub await_ms: f64,
    /// Approximate total reads over the sample window (rate x duration).
    pub total_reads: f64,
    /// Approximate total writes over the sample window (rate x duration).
    pub total_writes: f64,
}

/// Result of one job attempt, produced exactly once by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// True iff the program compiled (if applicable) and exited zero.
    pub success: bool,
    /// Captured stdout of the run.
    #[serde(default)]
    pub output: String,
    /// Human-readable error message, absent on success.
    #[serde(default)]
    pub error: Option<String>,
    /// Failure classification, absent on success.
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
    /// Captured compiler diagnostics when compilation failed.
    #[serde(default)]
    pub compile_error: Option<String>,
    /// Exit code of the run, absent when the run never completed.
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Wall-clock execution time in milliseconds. Equal to the configured
    /// timeout bound when the run timed out.
    #[serde(default)]
    pub execution_time_ms: u64,
    /// CPU counter metrics, absent when the monitoring source failed.
    #[serde(default)]
    pub perf_metrics: Option<PerfMetrics>,
    /// System activity metrics, absent when the monitoring source failed.
    #[serde(default)]
    pub vmstat_metrics: Option<VmstatSample>,
    /// Per-device I/O metrics, possibly empty.
    #[serde(default)]
    pub iostat_metrics: Vec<IostatDeviceSample>,
}

impl Default for JobResult {
    fn default() -> Self {
        Self {
            success: false,
            output: String::new(),
            error: None,
            error_kind: None,
            compile_error: None,
            exit_code: None,
            execution_time_ms: 0,
            perf_metrics: None,
            vmstat_metrics: None,
            iostat_metrics: Vec::new(),
        }
    }
}

impl JobResult {
    /// Build a failure result with the given classification and message.
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            error_kind: Some(kind),
            ..Self::default()
        }
    }

    /// Build an infrastructure-failure result (transport or agent error).
    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::failure(ErrorKind::Infrastructure, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_request_fills_defaults() {
        let req: JobRequest = serde_json::from_str(r#"{"code": "int main() {}"}"#).unwrap();
        assert_eq!(req.lang, "cpp");
        assert_eq!(req.compiler, "g++");
        assert_eq!(req.opts, "-O2 -Wall");
    }

    #[test]
    fn job_request_roundtrip() {
        let req = JobRequest {
            code: "print(1)".into(),
            lang: "python".into(),
            compiler: "python3".into(),
            opts: String::new(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: JobRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::CompileTimeout).unwrap();
        assert_eq!(json, r#""compile_timeout""#);
    }

    #[test]
    fn job_result_tolerates_missing_fields() {
        let result: JobResult = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(result.success);
        assert!(result.error.is_none());
        assert!(result.iostat_metrics.is_empty());
        assert_eq!(result.execution_time_ms, 0);
    }

    #[test]
    fn failure_constructor_sets_kind() {
        let result = JobResult::failure(ErrorKind::Timeout, "execution timeout");
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(result.error.as_deref(), Some("execution timeout"));
    }
}
