//! Benchmark VM container lifecycle and job channel.
//!
//! A [`Container`] owns one VM instance: the spawned hypervisor process
//! (when configured), the unix socket exposing the guest vsock channel,
//! and the connection state machine:
//!
//! ```text
//! init -> starting -> connecting -> handshaking -> ready <-> busy
//!                                                    |
//!                                                  closed
//! ```
//!
//! Any failure during the startup phases is fatal to this container
//! instance; there is no silent re-creation. A transport failure during
//! a job closes the container: a channel that failed mid-frame cannot be
//! resynchronized, so the instance is discarded rather than reused.

use std::os::unix::net::UnixStream;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tracing::{debug, info, warn};

use vmbench_protocol::{
    client_handshake, recv_message, retry::is_transient_io_error, retry::retry_with_backoff,
    retry::RetryConfig, send_message, JobRequest, JobResult,
};

use crate::config::VmConfig;
use crate::error::{Error, Result};
use crate::process;

/// Container lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Created, nothing spawned yet.
    Init,
    /// VM process being spawned / boot grace period.
    Starting,
    /// Connecting to the vsock channel.
    Connecting,
    /// Channel connected, handshake in flight.
    Handshaking,
    /// Connected and idle.
    Ready,
    /// A job is in flight.
    Busy,
    /// Stopped or failed; terminal.
    Closed,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Init => write!(f, "init"),
            ContainerState::Starting => write!(f, "starting"),
            ContainerState::Connecting => write!(f, "connecting"),
            ContainerState::Handshaking => write!(f, "handshaking"),
            ContainerState::Ready => write!(f, "ready"),
            ContainerState::Busy => write!(f, "busy"),
            ContainerState::Closed => write!(f, "closed"),
        }
    }
}

/// One benchmark VM and its job channel.
pub struct Container {
    config: VmConfig,
    state: ContainerState,
    child: Option<Child>,
    stream: Option<UnixStream>,
}

impl Container {
    /// Create a container in the `init` state.
    pub fn new(config: VmConfig) -> Self {
        Self {
            config,
            state: ContainerState::Init,
            child: None,
            stream: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Guest CID this container is addressed by.
    pub fn cid(&self) -> u32 {
        self.config.cid
    }

    /// Spawn the VM (unless attach-only), connect, and handshake.
    ///
    /// On success the container is `ready`. On any failure the container
    /// is `closed` and the spawned process (if any) is stopped.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ContainerState::Init {
            return Err(Error::invalid_state("init", self.state.to_string()));
        }
        self.state = ContainerState::Starting;

        if let Some(binary) = self.config.binary.clone() {
            if let Err(e) = self.spawn_vm(&binary) {
                return Err(self.fail_startup(e));
            }
        } else {
            // Attach mode: no process to spawn, the channel is expected
            // to already be listening (local runs, tests).
            debug!("no vm binary configured, attaching to existing channel");
        }

        self.state = ContainerState::Connecting;
        let socket_path = self.config.vsock_socket.clone();
        let connected = retry_with_backoff(
            RetryConfig::fixed(
                self.config.max_connect_attempts,
                Duration::from_millis(self.config.connect_backoff_ms),
            ),
            "connect to agent",
            || UnixStream::connect(&socket_path),
            is_transient_io_error,
        );
        let mut stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                return Err(self.fail_startup(Error::boot_failed(format!(
                    "agent channel unreachable at {}: {}",
                    socket_path.display(),
                    e
                ))));
            }
        };

        self.state = ContainerState::Handshaking;
        if let Err(e) = client_handshake(&mut stream, self.config.guest_port) {
            return Err(self.fail_startup(Error::handshake(e.to_string())));
        }

        self.stream = Some(stream);
        self.state = ContainerState::Ready;
        info!(cid = self.config.cid, "container ready");
        Ok(())
    }

    fn spawn_vm(&mut self, binary: &std::path::Path) -> Result<()> {
        info!(binary = %binary.display(), "spawning vm");
        let mut command = Command::new(binary);
        command
            .arg("--api-sock")
            .arg(&self.config.api_socket)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(config_file) = &self.config.config_file {
            command.arg("--config-file").arg(config_file);
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::vm_creation(format!("{}: {}", binary.display(), e)))?;

        // Give the kernel time to boot before the first connect attempt,
        // then make sure the process is still with us.
        std::thread::sleep(Duration::from_millis(self.config.boot_grace_ms));
        if let Some(code) = process::try_wait_child(&mut child)? {
            return Err(Error::boot_failed(format!(
                "vm process exited with code {} during boot",
                code
            )));
        }

        self.child = Some(child);
        Ok(())
    }

    fn fail_startup(&mut self, error: Error) -> Error {
        warn!(error = %error, "container startup failed");
        self.shutdown();
        error
    }

    /// Send one job and block for its result.
    ///
    /// A transport failure on either direction closes the container and
    /// surfaces as a transport error; the caller reports the job as an
    /// infrastructure failure.
    pub fn execute(&mut self, request: &JobRequest) -> Result<JobResult> {
        if self.state != ContainerState::Ready {
            return Err(Error::invalid_state("ready", self.state.to_string()));
        }
        let Some(mut stream) = self.stream.take() else {
            return Err(Error::invalid_state("ready", "no channel"));
        };

        self.state = ContainerState::Busy;

        if let Err(e) = send_message(&mut stream, request) {
            self.shutdown();
            return Err(Error::transport("send job", e.to_string()));
        }

        match recv_message::<_, JobResult>(&mut stream) {
            Ok(result) => {
                self.stream = Some(stream);
                self.state = ContainerState::Ready;
                Ok(result)
            }
            Err(e) => {
                self.shutdown();
                Err(Error::transport("receive result", e.to_string()))
            }
        }
    }

    /// Stop the container unconditionally: close the channel, stop the
    /// VM process. Terminal; the container cannot be restarted.
    pub fn stop(&mut self) {
        info!(cid = self.config.cid, "stopping container");
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stream = None;
        if let Some(mut child) = self.child.take() {
            match process::stop_child(&mut child, process::DEFAULT_STOP_TIMEOUT) {
                Ok(code) => debug!(exit_code = code, "vm process stopped"),
                Err(e) => warn!(error = %e, "vm process stop failed"),
            }
        }
        self.state = ContainerState::Closed;
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.state != ContainerState::Closed {
            self.shutdown();
        }
    }
}
