//! vmbench CLI entry point.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;

/// vmbench - sandboxed benchmark job dispatch
#[derive(Parser, Debug)]
#[command(name = "vmbench")]
#[command(about = "Run untrusted benchmark jobs in isolated microVMs")]
#[command(
    long_about = "vmbench dispatches benchmark jobs to an in-VM agent over vsock \
and records per-job performance metrics.\n\n\
Quick start:\n  \
vmbench submit --file bench.cpp\n  \
vmbench serve\n\n\
Operator tools:\n  \
vmbench queue stats"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Claim and run jobs from the queue until stopped
    Serve(cli::serve::ServeCmd),

    /// Submit a benchmark job to the queue
    Submit(cli::submit::SubmitCmd),

    /// Inspect and repair the job queue
    #[command(subcommand, visible_alias = "q")]
    Queue(cli::queue::QueueCmd),
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on RUST_LOG or default to warn
    init_logging();

    tracing::debug!(version = vmbench::VERSION, "starting vmbench");

    // Execute command
    let result = match cli.command {
        Commands::Serve(cmd) => cmd.run(),
        Commands::Submit(cmd) => cmd.run(),
        Commands::Queue(cmd) => cmd.run(),
    };

    // Handle errors
    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vmbench=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
