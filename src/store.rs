//! Job payload and result storage.
//!
//! The queue carries ids only; payloads and results live in a store keyed
//! by job id. The dispatcher depends on two narrow capabilities: fetching
//! payloads ([`JobStore`]) and recording outcomes ([`ResultSink`]). The
//! [`MemoryStore`] implements both for tests and single-process runs; the
//! [`RedisStore`] keeps JSON records alongside the durable queue.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use redis::Commands;
use serde::{Deserialize, Serialize};

use vmbench_protocol::{JobRequest, JobResult};

use crate::error::{Error, Result};

/// Lifecycle status of a stored job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Stored and enqueued, not yet claimed.
    Queued,
    /// Claimed by a dispatcher and sent to the VM.
    Running,
    /// Finalized with a successful result.
    Completed,
    /// Finalized with a failure result.
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Stored envelope around a job request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job identifier.
    pub id: String,
    /// Lifecycle status.
    pub status: JobStatus,
    /// The submitted request.
    pub request: JobRequest,
    /// Submission time, seconds since epoch.
    pub created_at: u64,
    /// When a dispatcher claimed the job.
    #[serde(default)]
    pub started_at: Option<u64>,
    /// When the job was finalized.
    #[serde(default)]
    pub completed_at: Option<u64>,
}

impl JobRecord {
    fn new(id: &str, request: JobRequest) -> Self {
        Self {
            id: id.to_string(),
            status: JobStatus::Queued,
            request,
            created_at: epoch_seconds(),
            started_at: None,
            completed_at: None,
        }
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Read side of the store used by the dispatcher.
pub trait JobStore: Send + Sync {
    /// Persist a new job payload under `id` with status `queued`.
    fn store(&self, id: &str, request: &JobRequest) -> Result<()>;

    /// Fetch a job payload. `Ok(None)` when the id is unknown.
    fn fetch(&self, id: &str) -> Result<Option<JobRequest>>;

    /// Mark a claimed job as running.
    fn mark_running(&self, id: &str) -> Result<()>;
}

/// Write side for finalized results.
pub trait ResultSink: Send + Sync {
    /// Record the result of a job, exactly once per attempt.
    fn finalize(&self, id: &str, result: &JobResult) -> Result<()>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-process store for tests and single-process runs.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<String, JobRecord>>,
    results: Mutex<HashMap<String, JobResult>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a stored record (tests, observability).
    pub fn record(&self, id: &str) -> Option<JobRecord> {
        self.jobs.lock().get(id).cloned()
    }

    /// Look up a finalized result.
    pub fn result(&self, id: &str) -> Option<JobResult> {
        self.results.lock().get(id).cloned()
    }
}

impl JobStore for MemoryStore {
    fn store(&self, id: &str, request: &JobRequest) -> Result<()> {
        self.jobs
            .lock()
            .insert(id.to_string(), JobRecord::new(id, request.clone()));
        Ok(())
    }

    fn fetch(&self, id: &str) -> Result<Option<JobRequest>> {
        Ok(self.jobs.lock().get(id).map(|r| r.request.clone()))
    }

    fn mark_running(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.lock();
        let record = jobs
            .get_mut(id)
            .ok_or_else(|| Error::job_not_found(id))?;
        record.status = JobStatus::Running;
        record.started_at = Some(epoch_seconds());
        Ok(())
    }
}

impl ResultSink for MemoryStore {
    fn finalize(&self, id: &str, result: &JobResult) -> Result<()> {
        self.results.lock().insert(id.to_string(), result.clone());
        if let Some(record) = self.jobs.lock().get_mut(id) {
            record.status = if result.success {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            };
            record.completed_at = Some(epoch_seconds());
        }
        Ok(())
    }
}

// ============================================================================
// Redis store
// ============================================================================

/// Redis-backed store sharing the durable queue's instance.
///
/// Records live at `{name}:job:{id}` and results at `{name}:result:{id}`
/// as JSON values.
pub struct RedisStore {
    client: redis::Client,
    name: String,
}

impl RedisStore {
    /// Connect a store namespaced under `name`.
    pub fn new(url: &str, name: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| Error::store("connect", e.to_string()))?;
        Ok(Self {
            client,
            name: name.to_string(),
        })
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}:job:{}", self.name, id)
    }

    fn result_key(&self, id: &str) -> String {
        format!("{}:result:{}", self.name, id)
    }

    fn connection(&self, operation: &str) -> Result<redis::Connection> {
        self.client
            .get_connection()
            .map_err(|e| Error::store(operation, e.to_string()))
    }

    fn read_record(
        &self,
        conn: &mut redis::Connection,
        operation: &str,
        id: &str,
    ) -> Result<Option<JobRecord>> {
        let json: Option<String> = conn
            .get(self.job_key(id))
            .map_err(|e| Error::store(operation, e.to_string()))?;
        match json {
            Some(json) => {
                let record = serde_json::from_str(&json)
                    .map_err(|e| Error::store(operation, format!("corrupt record: {}", e)))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Look up a stored record.
    pub fn record(&self, id: &str) -> Result<Option<JobRecord>> {
        let mut conn = self.connection("fetch record")?;
        self.read_record(&mut conn, "fetch record", id)
    }

    /// Look up a finalized result. `Ok(None)` while the job is pending.
    pub fn result(&self, id: &str) -> Result<Option<JobResult>> {
        let mut conn = self.connection("fetch result")?;
        let json: Option<String> = conn
            .get(self.result_key(id))
            .map_err(|e| Error::store("fetch result", e.to_string()))?;
        match json {
            Some(json) => {
                let result = serde_json::from_str(&json)
                    .map_err(|e| Error::store("fetch result", format!("corrupt result: {}", e)))?;
                Ok(Some(result))
            }
            None => Ok(None),
        }
    }

    fn write_record(
        &self,
        conn: &mut redis::Connection,
        operation: &str,
        record: &JobRecord,
    ) -> Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| Error::store(operation, e.to_string()))?;
        let _: () = conn
            .set(self.job_key(&record.id), json)
            .map_err(|e| Error::store(operation, e.to_string()))?;
        Ok(())
    }
}

impl JobStore for RedisStore {
    fn store(&self, id: &str, request: &JobRequest) -> Result<()> {
        let mut conn = self.connection("store job")?;
        self.write_record(&mut conn, "store job", &JobRecord::new(id, request.clone()))
    }

    fn fetch(&self, id: &str) -> Result<Option<JobRequest>> {
        let mut conn = self.connection("fetch job")?;
        Ok(self
            .read_record(&mut conn, "fetch job", id)?
            .map(|r| r.request))
    }

    fn mark_running(&self, id: &str) -> Result<()> {
        let mut conn = self.connection("mark running")?;
        let mut record = self
            .read_record(&mut conn, "mark running", id)?
            .ok_or_else(|| Error::job_not_found(id))?;
        record.status = JobStatus::Running;
        record.started_at = Some(epoch_seconds());
        self.write_record(&mut conn, "mark running", &record)
    }
}

impl ResultSink for RedisStore {
    fn finalize(&self, id: &str, result: &JobResult) -> Result<()> {
        let mut conn = self.connection("finalize result")?;

        let json = serde_json::to_string(result)
            .map_err(|e| Error::store("finalize result", e.to_string()))?;
        let _: () = conn
            .set(self.result_key(id), json)
            .map_err(|e| Error::store("finalize result", e.to_string()))?;

        // Best effort status update; the result itself is already durable.
        if let Some(mut record) = self.read_record(&mut conn, "finalize result", id)? {
            record.status = if result.success {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            };
            record.completed_at = Some(epoch_seconds());
            self.write_record(&mut conn, "finalize result", &record)?;
        }
        Ok(())
    }
}
