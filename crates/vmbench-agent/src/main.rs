//! vmbench guest agent.
//!
//! Runs inside the benchmark VM and handles:
//! - the connection handshake with the host
//! - compiling and running submitted jobs in scoped temp directories
//! - sampling perf/vmstat/iostat around each run
//!
//! Communication is framed JSON over vsock (or a unix socket for local
//! runs and tests). A job that fails never terminates the agent; every
//! internal error is reported back as a failed job result.

use std::io::{Read, Write};
use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, error, info, warn};

use vmbench_protocol::{
    read_frame, send_message, server_handshake, FrameError, JobRequest, JobResult,
    DEFAULT_GUEST_PORT,
};

mod executor;
mod metrics;
mod process;
mod vsock;

use executor::ExecutorConfig;

/// vmbench guest agent
#[derive(Parser, Debug)]
#[command(name = "vmbench-agent")]
#[command(about = "Compile, run, and profile submitted jobs inside the benchmark VM")]
#[command(version)]
struct Args {
    /// vsock port to listen on
    #[arg(long, default_value_t = DEFAULT_GUEST_PORT)]
    port: u32,

    /// Listen on a unix socket path instead of vsock (local runs, tests)
    #[arg(long)]
    unix_socket: Option<PathBuf>,

    /// Compile step timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    compile_timeout_ms: u64,

    /// Execution timeout in milliseconds
    #[arg(long, default_value_t = 60_000)]
    exec_timeout_ms: u64,

    /// Disable the perf/vmstat/iostat monitors (hosts without the tools)
    #[arg(long)]
    no_monitors: bool,
}

enum Listener {
    Vsock(vsock::VsockListener),
    Unix(std::os::unix::net::UnixListener),
}

/// Combined trait so vsock and unix connections share one handler.
trait ReadWrite: Read + Write {}
impl<T: Read + Write> ReadWrite for T {}

impl Listener {
    fn accept(&self) -> std::io::Result<Box<dyn ReadWrite>> {
        match self {
            Listener::Vsock(listener) => {
                let stream = listener.accept()?;
                debug!(peer_cid = stream.peer_cid, "vsock connection");
                Ok(Box::new(stream))
            }
            Listener::Unix(listener) => {
                let (stream, _addr) = listener.accept()?;
                Ok(Box::new(stream))
            }
        }
    }
}

fn main() {
    let args = Args::parse();

    // Create the listener before logging setup: the host connects as soon
    // as the kernel is up, and the kernel-level backlog holds connections
    // arriving before the accept loop starts.
    let listener = match bind_listener(&args) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to create listener: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vmbench_agent=info".parse().expect("valid directive")),
        )
        .init();

    let config = ExecutorConfig {
        compile_timeout_ms: args.compile_timeout_ms,
        exec_timeout_ms: args.exec_timeout_ms,
        enable_perf: !args.no_monitors,
        enable_vmstat: !args.no_monitors,
        enable_iostat: !args.no_monitors,
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        "vmbench-agent started, listener ready"
    );

    run_server(listener, args.port, &config);
}

fn bind_listener(args: &Args) -> std::io::Result<Listener> {
    match &args.unix_socket {
        Some(path) => {
            // A stale socket file from a previous run blocks the bind.
            let _ = std::fs::remove_file(path);
            Ok(Listener::Unix(std::os::unix::net::UnixListener::bind(
                path,
            )?))
        }
        None => Ok(Listener::Vsock(vsock::listen(args.port)?)),
    }
}

/// Accept loop. Connection errors never terminate the server.
fn run_server(listener: Listener, port: u32, config: &ExecutorConfig) {
    loop {
        match listener.accept() {
            Ok(mut stream) => {
                info!("accepted connection");
                if let Err(e) = handle_connection(stream.as_mut(), port, config) {
                    warn!(error = %e, "connection error");
                }
            }
            Err(e) => {
                warn!(error = %e, "accept error");
            }
        }
    }
}

/// Handle a single connection: handshake, then a framed job loop.
///
/// A malformed request payload produces a failure result on the intact
/// framed stream; a framing violation (oversize, short read) abandons
/// the connection since the stream can no longer be resynchronized.
fn handle_connection(
    mut stream: &mut dyn ReadWrite,
    port: u32,
    config: &ExecutorConfig,
) -> Result<(), FrameError> {
    // The frame helpers are generic over a sized stream; reborrowing the
    // trait object gives them `&mut &mut dyn ReadWrite`, which is one.
    server_handshake(&mut stream, port)?;
    debug!("handshake complete");

    loop {
        let payload = match read_frame(&mut stream) {
            Ok(payload) => payload,
            Err(FrameError::Closed) => {
                debug!("connection closed");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let result = match serde_json::from_slice::<JobRequest>(&payload) {
            Ok(request) => {
                info!(lang = %request.lang, compiler = %request.compiler, "executing job");
                let result = executor::execute_job(&request, config);
                if result.success {
                    info!(
                        execution_time_ms = result.execution_time_ms,
                        "job completed"
                    );
                } else {
                    let kind = result
                        .error_kind
                        .map(|k| k.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    info!(error_kind = %kind, "job failed");
                }
                result
            }
            Err(e) => {
                error!(error = %e, "malformed job request");
                JobResult::infrastructure(format!("malformed job request: {}", e))
            }
        };

        send_message(&mut stream, &result)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use vmbench_protocol::{client_handshake, recv_message};

    fn test_config() -> ExecutorConfig {
        ExecutorConfig {
            compile_timeout_ms: 5_000,
            exec_timeout_ms: 5_000,
            enable_perf: false,
            enable_vmstat: false,
            enable_iostat: false,
        }
    }

    #[test]
    fn connection_serves_jobs_until_close() {
        let (mut client, mut server) = UnixStream::pair().unwrap();
        let config = test_config();

        let server_thread =
            std::thread::spawn(move || handle_connection(&mut server, 5000, &config));

        client_handshake(&mut client, 5000).unwrap();

        let request = JobRequest {
            code: "echo one".to_string(),
            lang: "sh".to_string(),
            compiler: "sh".to_string(),
            opts: String::new(),
        };
        send_message(&mut client, &request).unwrap();
        let result: JobResult = recv_message(&mut client).unwrap();
        assert!(result.success);
        assert!(result.output.contains("one"));

        // Same connection takes another job.
        send_message(&mut client, &request).unwrap();
        let result: JobResult = recv_message(&mut client).unwrap();
        assert!(result.success);

        drop(client);
        server_thread.join().unwrap().unwrap();
    }

    #[test]
    fn boxed_stream_from_the_accept_path_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let listener =
            Listener::Unix(std::os::unix::net::UnixListener::bind(&path).unwrap());
        let config = test_config();

        // Same trait-object stream type the accept loop hands out.
        let server_thread = std::thread::spawn(move || {
            let mut stream = listener.accept().unwrap();
            handle_connection(stream.as_mut(), 5000, &config)
        });

        let mut client = UnixStream::connect(&path).unwrap();
        client_handshake(&mut client, 5000).unwrap();

        let request = JobRequest {
            code: "echo boxed".to_string(),
            lang: "sh".to_string(),
            compiler: "sh".to_string(),
            opts: String::new(),
        };
        send_message(&mut client, &request).unwrap();
        let result: JobResult = recv_message(&mut client).unwrap();
        assert!(result.success);
        assert!(result.output.contains("boxed"));

        drop(client);
        server_thread.join().unwrap().unwrap();
    }

    #[test]
    fn connection_rejects_bad_handshake() {
        let (mut client, mut server) = UnixStream::pair().unwrap();
        let config = test_config();

        let server_thread =
            std::thread::spawn(move || handle_connection(&mut server, 5000, &config));

        client.write_all(b"CONNECT 9999\n").unwrap();
        let mut reply = [0u8; 6];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"ERROR\n");

        assert!(server_thread.join().unwrap().is_err());
    }

    #[test]
    fn malformed_request_yields_failure_result() {
        let (mut client, mut server) = UnixStream::pair().unwrap();
        let config = test_config();

        let server_thread =
            std::thread::spawn(move || handle_connection(&mut server, 5000, &config));

        client_handshake(&mut client, 5000).unwrap();
        vmbench_protocol::write_frame(&mut client, b"{\"not\": \"a job\"}").unwrap();

        let result: JobResult = recv_message(&mut client).unwrap();
        assert!(!result.success);
        assert_eq!(
            result.error_kind,
            Some(vmbench_protocol::ErrorKind::Infrastructure)
        );

        drop(client);
        server_thread.join().unwrap().unwrap();
    }
}
