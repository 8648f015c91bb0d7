//! Job execution: compile, run under monitoring, collect results.
//!
//! Every job gets a fresh scoped temp directory that is removed on all
//! exit paths. Failures at any stage become a `JobResult`; this module
//! never returns an error to the connection loop.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Instant;

use tempfile::TempDir;
use tracing::{debug, warn};

use vmbench_protocol::{ErrorKind, JobRequest, JobResult};

use crate::metrics;
use crate::process::{wait_with_timeout, WaitResult};

/// Default compile timeout (30s).
const DEFAULT_COMPILE_TIMEOUT_MS: u64 = 30_000;

/// Default execution timeout (60s).
const DEFAULT_EXEC_TIMEOUT_MS: u64 = 60_000;

/// Grace period beyond the monitor sample window before a monitor child
/// is considered stuck and killed (its metrics are then absent).
const MONITOR_GRACE_MS: u64 = 2_000;

/// perf events sampled around each run.
const PERF_EVENTS: &str = "cycles,instructions,cache-references,cache-misses,branch-misses";

/// Tunables for job execution.
///
/// The monitor flags exist so environments without perf/vmstat/iostat
/// (containers, CI) can still execute jobs; disabled monitors simply
/// leave their metrics absent.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Compile step timeout in milliseconds.
    pub compile_timeout_ms: u64,
    /// Run step timeout in milliseconds.
    pub exec_timeout_ms: u64,
    /// Wrap the run in `perf stat`.
    pub enable_perf: bool,
    /// Sample `vmstat` during the run.
    pub enable_vmstat: bool,
    /// Sample `iostat` during the run.
    pub enable_iostat: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            compile_timeout_ms: DEFAULT_COMPILE_TIMEOUT_MS,
            exec_timeout_ms: DEFAULT_EXEC_TIMEOUT_MS,
            enable_perf: true,
            enable_vmstat: true,
            enable_iostat: true,
        }
    }
}

/// Source file extension for a language tag.
///
/// Unrecognized languages fall back to `.cpp` and go through the compile
/// step with whatever compiler the request names.
fn source_extension(lang: &str) -> &'static str {
    match lang {
        "c" => ".c",
        "cpp" | "c++" => ".cpp",
        "py" | "python" => ".py",
        "sh" | "shell" => ".sh",
        _ => ".cpp",
    }
}

/// Whether a language goes through a separate compile step.
fn is_compiled(extension: &str) -> bool {
    matches!(extension, ".c" | ".cpp")
}

/// Execute one job and produce its result.
pub fn execute_job(request: &JobRequest, config: &ExecutorConfig) -> JobResult {
    let workdir = match TempDir::new() {
        Ok(dir) => dir,
        Err(e) => {
            warn!(error = %e, "failed to create job workdir");
            return JobResult::infrastructure(format!("workdir creation failed: {}", e));
        }
    };

    let extension = source_extension(&request.lang);
    let source = workdir.path().join(format!("source{}", extension));
    if let Err(e) = std::fs::write(&source, &request.code) {
        warn!(error = %e, "failed to write job source");
        return JobResult::infrastructure(format!("writing source failed: {}", e));
    }

    let opts: Vec<&str> = request.opts.split_whitespace().collect();

    // Compile step for compiled languages; interpreted languages run the
    // source directly under the named interpreter.
    let run_argv: Vec<String> = if is_compiled(extension) {
        let program = workdir.path().join("prog");
        match compile(request, &opts, &source, &program, workdir.path(), config) {
            Ok(()) => vec![program.to_string_lossy().into_owned()],
            Err(result) => return result,
        }
    } else {
        let mut argv = vec![request.compiler.clone()];
        argv.extend(opts.iter().map(|s| s.to_string()));
        argv.push(source.to_string_lossy().into_owned());
        argv
    };

    run(&run_argv, workdir.path(), config)
}

/// Run the compile step. On failure returns the finished `JobResult` so
/// the run step is never attempted.
fn compile(
    request: &JobRequest,
    opts: &[&str],
    source: &Path,
    program: &PathBuf,
    workdir: &Path,
    config: &ExecutorConfig,
) -> Result<(), JobResult> {
    debug!(compiler = %request.compiler, lang = %request.lang, "compiling job");

    let child = Command::new(&request.compiler)
        .args(opts)
        .arg("-o")
        .arg(program)
        .arg(source)
        .current_dir(workdir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            // A missing or broken compiler is a property of the job
            // request, not of the infrastructure.
            let message = format!("compiler '{}' failed to start: {}", request.compiler, e);
            return Err(JobResult {
                error: Some(message.clone()),
                error_kind: Some(ErrorKind::Compile),
                compile_error: Some(message),
                ..JobResult::default()
            });
        }
    };

    let waited = wait_with_timeout(&mut child, config.compile_timeout_ms);
    match waited {
        Ok(WaitResult::Completed { exit_code: 0, .. }) => Ok(()),
        Ok(WaitResult::Completed { exit_code, output }) => {
            debug!(exit_code, "compilation failed");
            Err(JobResult {
                error: Some(format!("compilation failed with exit code {}", exit_code)),
                error_kind: Some(ErrorKind::Compile),
                compile_error: Some(output.stderr),
                ..JobResult::default()
            })
        }
        Ok(WaitResult::TimedOut { output, timeout_ms }) => Err(JobResult {
            error: Some(format!("compilation timed out after {} ms", timeout_ms)),
            error_kind: Some(ErrorKind::CompileTimeout),
            compile_error: Some(output.stderr),
            execution_time_ms: timeout_ms,
            ..JobResult::default()
        }),
        Err(e) => Err(JobResult::infrastructure(format!(
            "waiting on compiler failed: {}",
            e
        ))),
    }
}

/// Run the program with monitors attached and build the final result.
fn run(argv: &[String], workdir: &Path, config: &ExecutorConfig) -> JobResult {
    let vmstat = config
        .enable_vmstat
        .then(|| spawn_monitor("vmstat", &["1", "2"]))
        .flatten();
    let iostat = config
        .enable_iostat
        .then(|| spawn_monitor("iostat", &["-x", "-d", "-k", "1", "2"]))
        .flatten();

    let started = Instant::now();
    let (mut child, perf_attached) = match spawn_run(argv, workdir, config.enable_perf) {
        Ok(spawned) => spawned,
        Err(e) => {
            reap_monitors(vmstat, iostat);
            return JobResult {
                error: Some(format!("program '{}' failed to start: {}", argv[0], e)),
                error_kind: Some(ErrorKind::Runtime),
                ..JobResult::default()
            };
        }
    };

    let waited = wait_with_timeout(&mut child, config.exec_timeout_ms);
    let (vmstat_metrics, iostat_metrics) = collect_monitors(vmstat, iostat);

    match waited {
        Ok(WaitResult::Completed { exit_code, output }) => {
            // With perf attached, the counters arrive on the child's stderr
            // mixed with any program diagnostics.
            let perf_metrics = perf_attached.then(|| metrics::parse_perf_output(&output.stderr));

            if exit_code == 0 {
                JobResult {
                    success: true,
                    output: output.stdout,
                    exit_code: Some(0),
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    perf_metrics,
                    vmstat_metrics,
                    iostat_metrics,
                    ..JobResult::default()
                }
            } else {
                JobResult {
                    output: output.stdout,
                    error: Some(stderr_or_exit_code(&output.stderr, exit_code)),
                    error_kind: Some(ErrorKind::Runtime),
                    exit_code: Some(exit_code),
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    perf_metrics,
                    vmstat_metrics,
                    iostat_metrics,
                    ..JobResult::default()
                }
            }
        }
        Ok(WaitResult::TimedOut { output, timeout_ms }) => JobResult {
            output: output.stdout,
            error: Some(format!("execution timed out after {} ms", timeout_ms)),
            error_kind: Some(ErrorKind::Timeout),
            // Timeouts report the configured bound, not the measured time.
            execution_time_ms: timeout_ms,
            vmstat_metrics,
            iostat_metrics,
            ..JobResult::default()
        },
        Err(e) => JobResult::infrastructure(format!("waiting on program failed: {}", e)),
    }
}

/// Spawn the run child, perf-wrapped when requested.
///
/// Falls back to an unwrapped run when perf itself cannot start (e.g. not
/// installed in the guest image); the job still runs, only the counters
/// are absent. Returns the child and whether perf is actually attached.
fn spawn_run(
    argv: &[String],
    workdir: &Path,
    enable_perf: bool,
) -> std::io::Result<(Child, bool)> {
    if enable_perf {
        let attempt = Command::new("perf")
            .args(["stat", "-e", PERF_EVENTS, "--"])
            .args(argv)
            .current_dir(workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        match attempt {
            Ok(child) => return Ok((child, true)),
            Err(e) => {
                warn!(error = %e, "perf unavailable, running without counters");
            }
        }
    }

    let child = Command::new(&argv[0])
        .args(&argv[1..])
        .current_dir(workdir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    Ok((child, false))
}

/// Spawn one monitoring tool. Spawn failure is logged and tolerated.
fn spawn_monitor(tool: &str, args: &[&str]) -> Option<Child> {
    match Command::new(tool)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => Some(child),
        Err(e) => {
            debug!(tool, error = %e, "monitor unavailable");
            None
        }
    }
}

/// Join both monitors with a bounded wait and parse their output.
///
/// A monitor that is still running past its window plus grace is killed
/// and yields absent metrics for that record only.
fn collect_monitors(
    vmstat: Option<Child>,
    iostat: Option<Child>,
) -> (
    Option<vmbench_protocol::VmstatSample>,
    Vec<vmbench_protocol::IostatDeviceSample>,
) {
    let budget_ms = (metrics::SAMPLE_WINDOW_SECS * 1000.0) as u64 + MONITOR_GRACE_MS;

    let vmstat_metrics = vmstat
        .and_then(|mut child| match wait_with_timeout(&mut child, budget_ms) {
            Ok(WaitResult::Completed { output, .. }) => Some(output.stdout),
            Ok(WaitResult::TimedOut { .. }) => {
                warn!("vmstat sample did not finish in time");
                None
            }
            Err(e) => {
                warn!(error = %e, "waiting on vmstat failed");
                None
            }
        })
        .map(|stdout| metrics::parse_vmstat_output(&stdout));

    let iostat_metrics = iostat
        .and_then(|mut child| match wait_with_timeout(&mut child, budget_ms) {
            Ok(WaitResult::Completed { output, .. }) => Some(output.stdout),
            Ok(WaitResult::TimedOut { .. }) => {
                warn!("iostat sample did not finish in time");
                None
            }
            Err(e) => {
                warn!(error = %e, "waiting on iostat failed");
                None
            }
        })
        .map(|stdout| metrics::parse_iostat_output(&stdout))
        .unwrap_or_default();

    (vmstat_metrics, iostat_metrics)
}

/// Kill and reap monitor children when the run never started.
fn reap_monitors(vmstat: Option<Child>, iostat: Option<Child>) {
    for child in [vmstat, iostat].into_iter().flatten() {
        let mut child = child;
        let _ = child.kill();
        let _ = child.wait();
    }
}

fn stderr_or_exit_code(stderr: &str, exit_code: i32) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        format!("program exited with code {}", exit_code)
    } else {
        trimmed.to_string()
    }
}
