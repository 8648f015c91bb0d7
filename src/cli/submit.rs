//! Job submission command.

use std::io::Read;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use clap::Args;
use tracing::debug;

use vmbench::{Config, Error, JobStore, Result};
use vmbench_protocol::JobRequest;

/// How often `--wait` polls for a finalized result.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Submit a benchmark job to the queue
#[derive(Args, Debug)]
pub struct SubmitCmd {
    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Source file to run (reads stdin when omitted)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Source language (c, cpp, py, sh)
    #[arg(short, long, default_value = "cpp")]
    pub lang: String,

    /// Compiler or interpreter binary
    #[arg(long, default_value = "g++")]
    pub compiler: String,

    /// Compiler or interpreter options
    #[arg(long, default_value = "-O2 -Wall")]
    pub opts: String,

    /// Block until the job result is available (seconds)
    #[arg(long)]
    pub wait: Option<u64>,
}

impl SubmitCmd {
    pub fn run(self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        let code = match &self.file {
            Some(path) => std::fs::read_to_string(path)?,
            None => {
                let mut code = String::new();
                std::io::stdin().read_to_string(&mut code)?;
                code
            }
        };

        let request = JobRequest {
            code,
            lang: self.lang.clone(),
            compiler: self.compiler.clone(),
            opts: self.opts.clone(),
        };

        let queue = super::open_queue(&config)?;
        let store = super::open_store(&config)?;

        let id = generate_job_id();
        store.store(&id, &request)?;
        if !queue.push(&id) {
            return Err(Error::queue(
                "push",
                format!("queue '{}' is full or unavailable", config.queue.name),
            ));
        }
        debug!(job_id = %id, lang = %self.lang, "job submitted");
        println!("{}", id);

        if let Some(seconds) = self.wait {
            let result = wait_for_result(&store, &id, Duration::from_secs(seconds))?;
            print!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
            println!();
        }
        Ok(())
    }
}

/// Timestamp-and-pid derived id, unique enough across submitters sharing
/// one queue.
fn generate_job_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("job-{:x}-{:x}", nanos, std::process::id())
}

fn wait_for_result(
    store: &vmbench::RedisStore,
    id: &str,
    timeout: Duration,
) -> Result<vmbench_protocol::JobResult> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(result) = store.result(id)? {
            return Ok(result);
        }
        if Instant::now() >= deadline {
            return Err(Error::store(
                "wait for result",
                format!("job {} not finished after {}s", id, timeout.as_secs()),
            ));
        }
        std::thread::sleep(WAIT_POLL_INTERVAL);
    }
}
