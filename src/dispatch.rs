//! Job dispatch loop.
//!
//! The [`DispatchManager`] ties the pieces together: it claims job ids
//! from the queue, fetches their payloads from the store, runs them on
//! the container, and finalizes results. One manager drives one
//! container; the queue provides the fan-in point for multiple
//! submitters.
//!
//! Failure handling is asymmetric on purpose. Job-level failures
//! (compile errors, runtime errors, timeouts) arrive as ordinary results
//! and are finalized like successes. A transport failure is different:
//! the container is gone, so the in-flight job is finalized as an
//! infrastructure failure, removed from `processing` (it will not be
//! silently retried), and the error is surfaced so the loop stops.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use vmbench_protocol::JobResult;

use crate::config::DispatchConfig;
use crate::error::Result;
use crate::queue::QueueBackend;
use crate::store::{JobStore, ResultSink};
use crate::vm::Container;

/// Claims jobs from the queue and runs them on a container.
pub struct DispatchManager {
    container: Container,
    queue: Arc<dyn QueueBackend>,
    store: Arc<dyn JobStore>,
    sink: Arc<dyn ResultSink>,
    pend_timeout: Duration,
    recover_on_start: bool,
}

impl DispatchManager {
    /// Wire a manager over its collaborators.
    pub fn new(
        container: Container,
        queue: Arc<dyn QueueBackend>,
        store: Arc<dyn JobStore>,
        sink: Arc<dyn ResultSink>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            container,
            queue,
            store,
            sink,
            pend_timeout: Duration::from_millis(config.pend_timeout_ms),
            recover_on_start: config.recover_on_start,
        }
    }

    /// Start the container and, when configured, requeue jobs a previous
    /// dispatcher left in `processing`.
    pub fn start(&mut self) -> Result<()> {
        if self.recover_on_start {
            let recovered = self.queue.requeue_processing();
            if recovered > 0 {
                info!(recovered, "requeued orphaned jobs from previous run");
            }
        }
        self.container.start()
    }

    /// Process claimed jobs until the container fails.
    ///
    /// Pend timeouts are idle cycles, not errors; the loop only returns
    /// when a job run surfaces a container failure.
    pub fn run(&mut self) -> Result<()> {
        info!("dispatch loop started");
        loop {
            self.run_once()?;
        }
    }

    /// One dispatch cycle. `Ok(true)` when a job was processed,
    /// `Ok(false)` on an idle pend timeout.
    pub fn run_once(&mut self) -> Result<bool> {
        let Some(id) = self.queue.pend(self.pend_timeout) else {
            debug!("pend timed out, queue idle");
            return Ok(false);
        };
        info!(job_id = %id, "job claimed");

        let request = match self.store.fetch(&id) {
            Ok(Some(request)) => request,
            Ok(None) => {
                // Id without a payload: submitted wrong or record expired.
                // Finalize so the submitter sees a terminal state.
                warn!(job_id = %id, "claimed id has no stored payload");
                self.finalize(&id, &JobResult::infrastructure("job payload not found"));
                self.queue.pop(&id);
                return Ok(true);
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "payload fetch failed");
                self.finalize(
                    &id,
                    &JobResult::infrastructure(format!("job payload unavailable: {}", e)),
                );
                self.queue.pop(&id);
                return Ok(true);
            }
        };

        if let Err(e) = self.store.mark_running(&id) {
            // The run proceeds; the status record is advisory.
            warn!(job_id = %id, error = %e, "could not mark job running");
        }

        match self.container.execute(&request) {
            Ok(result) => {
                info!(
                    job_id = %id,
                    success = result.success,
                    execution_time_ms = result.execution_time_ms,
                    "job finished"
                );
                self.finalize(&id, &result);
                self.queue.pop(&id);
                Ok(true)
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "container failed during job");
                self.finalize(&id, &JobResult::infrastructure(e.to_string()));
                self.queue.pop(&id);
                Err(e)
            }
        }
    }

    /// Stop the container. Claimed-but-unfinished jobs stay parked in
    /// `processing` for an operator to requeue.
    pub fn stop(&mut self) {
        info!("dispatch loop stopping");
        self.container.stop();
    }

    /// Operator recovery: requeue jobs parked in `processing` by a
    /// previous dispatcher. Returns how many were moved.
    pub fn recover(&self) -> usize {
        self.queue.requeue_processing()
    }

    fn finalize(&self, id: &str, result: &JobResult) {
        if let Err(e) = self.sink.finalize(id, result) {
            warn!(job_id = %id, error = %e, "result finalize failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    use vmbench_protocol::{
        recv_message, send_message, server_handshake, ErrorKind, JobRequest,
    };

    use crate::config::VmConfig;
    use crate::queue::MemoryQueue;
    use crate::store::{JobStatus, MemoryStore};

    fn manager_over(
        socket: &std::path::Path,
        queue: Arc<MemoryQueue>,
        store: Arc<MemoryStore>,
        recover_on_start: bool,
    ) -> DispatchManager {
        let vm = VmConfig {
            vsock_socket: socket.to_path_buf(),
            max_connect_attempts: 3,
            connect_backoff_ms: 10,
            boot_grace_ms: 0,
            ..VmConfig::default()
        };
        let dispatch = DispatchConfig {
            pend_timeout_ms: 50,
            recover_on_start,
        };
        DispatchManager::new(
            Container::new(vm),
            queue,
            store.clone(),
            store,
            &dispatch,
        )
    }

    /// Agent stand-in: handshake, then answer jobs with canned results.
    fn fake_agent(
        listener: UnixListener,
        results: Vec<JobResult>,
    ) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            server_handshake(&mut stream, 5000).unwrap();
            for result in results {
                let _request: JobRequest = recv_message(&mut stream).unwrap();
                send_message(&mut stream, &result).unwrap();
            }
        })
    }

    fn request() -> JobRequest {
        JobRequest {
            code: "int main() { return 0; }".into(),
            lang: "cpp".into(),
            compiler: "g++".into(),
            opts: "-O2".into(),
        }
    }

    fn submit(queue: &MemoryQueue, store: &MemoryStore, id: &str) {
        store.store(id, &request()).unwrap();
        assert!(queue.push(id));
    }

    #[test]
    fn run_once_processes_a_job_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let agent = fake_agent(
            listener,
            vec![JobResult {
                success: true,
                output: "42\n".into(),
                execution_time_ms: 7,
                ..JobResult::default()
            }],
        );

        let queue = Arc::new(MemoryQueue::new(8));
        let store = Arc::new(MemoryStore::new());
        submit(&queue, &store, "job-1");

        let mut manager = manager_over(&socket, queue.clone(), store.clone(), false);
        manager.start().unwrap();

        assert!(manager.run_once().unwrap());
        assert_eq!(queue.size(), 0);
        assert_eq!(store.record("job-1").unwrap().status, JobStatus::Completed);
        let result = store.result("job-1").unwrap();
        assert!(result.success);
        assert_eq!(result.output, "42\n");

        manager.stop();
        agent.join().unwrap();
    }

    #[test]
    fn idle_pend_timeout_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let agent = fake_agent(listener, vec![]);

        let queue = Arc::new(MemoryQueue::new(8));
        let store = Arc::new(MemoryStore::new());
        let mut manager = manager_over(&socket, queue, store, false);
        manager.start().unwrap();

        assert!(!manager.run_once().unwrap());

        manager.stop();
        agent.join().unwrap();
    }

    #[test]
    fn job_level_failures_are_finalized_and_the_loop_continues() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let agent = fake_agent(
            listener,
            vec![JobResult::failure(ErrorKind::Compile, "compilation failed")],
        );

        let queue = Arc::new(MemoryQueue::new(8));
        let store = Arc::new(MemoryStore::new());
        submit(&queue, &store, "bad-job");

        let mut manager = manager_over(&socket, queue.clone(), store.clone(), false);
        manager.start().unwrap();

        assert!(manager.run_once().unwrap());
        assert_eq!(queue.size(), 0);
        assert_eq!(store.record("bad-job").unwrap().status, JobStatus::Failed);
        assert_eq!(
            store.result("bad-job").unwrap().error_kind,
            Some(ErrorKind::Compile)
        );

        manager.stop();
        agent.join().unwrap();
    }

    #[test]
    fn missing_payload_is_finalized_as_infrastructure() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let agent = fake_agent(listener, vec![]);

        let queue = Arc::new(MemoryQueue::new(8));
        let store = Arc::new(MemoryStore::new());
        // Id enqueued without a stored payload.
        assert!(queue.push("ghost"));

        let mut manager = manager_over(&socket, queue.clone(), store.clone(), false);
        manager.start().unwrap();

        assert!(manager.run_once().unwrap());
        assert_eq!(queue.size(), 0);
        let result = store.result("ghost").unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Infrastructure));

        manager.stop();
        agent.join().unwrap();
    }

    #[test]
    fn transport_failure_finalizes_the_job_and_stops_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        // Agent that dies mid-job.
        let agent = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            server_handshake(&mut stream, 5000).unwrap();
            let _request: JobRequest = recv_message(&mut stream).unwrap();
        });

        let queue = Arc::new(MemoryQueue::new(8));
        let store = Arc::new(MemoryStore::new());
        submit(&queue, &store, "doomed");

        let mut manager = manager_over(&socket, queue.clone(), store.clone(), false);
        manager.start().unwrap();

        let err = manager.run_once().unwrap_err();
        assert!(matches!(err, crate::error::Error::Transport { .. }));

        // The in-flight job is terminal, not silently retried.
        assert_eq!(queue.size(), 0);
        let result = store.result("doomed").unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Infrastructure));

        manager.stop();
        agent.join().unwrap();
    }

    #[test]
    fn recover_on_start_requeues_orphaned_claims() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let agent = fake_agent(
            listener,
            vec![JobResult {
                success: true,
                ..JobResult::default()
            }],
        );

        let queue = Arc::new(MemoryQueue::new(8));
        let store = Arc::new(MemoryStore::new());
        submit(&queue, &store, "orphan");
        // Simulate a crashed dispatcher: claimed but never finalized.
        queue.pend(Duration::from_millis(10)).unwrap();
        assert_eq!(queue.processing_size(), 1);

        let mut manager = manager_over(&socket, queue.clone(), store.clone(), true);
        manager.start().unwrap();
        assert_eq!(queue.processing_size(), 0);
        assert_eq!(queue.queued_size(), 1);

        assert!(manager.run_once().unwrap());
        assert_eq!(store.record("orphan").unwrap().status, JobStatus::Completed);

        manager.stop();
        agent.join().unwrap();
    }
}
