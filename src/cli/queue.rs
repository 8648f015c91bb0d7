//! Queue inspection and repair commands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use vmbench::{Config, Result};

/// Inspect and repair the job queue
#[derive(Subcommand, Debug)]
pub enum QueueCmd {
    /// Show queue depths and the next jobs on each list
    Stats(StatsCmd),

    /// Move claimed-but-unfinished jobs back to the queue
    Requeue(RequeueCmd),

    /// Drop every queued and claimed job
    Clear(ClearCmd),

    /// Show the stored record and result for one job
    Status(StatusCmd),
}

impl QueueCmd {
    pub fn run(self) -> Result<()> {
        match self {
            QueueCmd::Stats(cmd) => cmd.run(),
            QueueCmd::Requeue(cmd) => cmd.run(),
            QueueCmd::Clear(cmd) => cmd.run(),
            QueueCmd::Status(cmd) => cmd.run(),
        }
    }
}

/// Show queue depths and the next jobs on each list
#[derive(Args, Debug)]
pub struct StatsCmd {
    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl StatsCmd {
    pub fn run(self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        let queue = super::open_queue(&config)?;

        println!("queue:      {}", config.queue.name);
        println!("queued:     {}", queue.queued_size());
        println!("processing: {}", queue.processing_size());
        println!("capacity:   {}", config.queue.max_size);
        if let Some(id) = queue.peek_queued() {
            println!("next:       {}", id);
        }
        if let Some(id) = queue.peek_processing() {
            println!("claimed:    {}", id);
        }
        Ok(())
    }
}

/// Move claimed-but-unfinished jobs back to the queue
///
/// Run this after a dispatcher crash; jobs it had claimed stay parked on
/// the processing list until requeued.
#[derive(Args, Debug)]
pub struct RequeueCmd {
    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl RequeueCmd {
    pub fn run(self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        let queue = super::open_queue(&config)?;

        let moved = queue.requeue_processing();
        println!("requeued {} job(s)", moved);
        Ok(())
    }
}

/// Drop every queued and claimed job
#[derive(Args, Debug)]
pub struct ClearCmd {
    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Confirm the reset
    #[arg(long)]
    pub yes: bool,
}

impl ClearCmd {
    pub fn run(self) -> Result<()> {
        if !self.yes {
            println!("refusing to clear without --yes");
            return Ok(());
        }
        let config = Config::load(self.config.as_deref())?;
        let queue = super::open_queue(&config)?;

        queue.clear();
        println!("queue '{}' cleared", config.queue.name);
        Ok(())
    }
}

/// Show the stored record and result for one job
#[derive(Args, Debug)]
pub struct StatusCmd {
    /// Job id
    pub id: String,

    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl StatusCmd {
    pub fn run(self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        let store = super::open_store(&config)?;

        match store.record(&self.id)? {
            Some(record) => {
                println!("id:      {}", record.id);
                println!("status:  {}", record.status);
                println!("created: {}", record.created_at);
                if let Some(started) = record.started_at {
                    println!("started: {}", started);
                }
                if let Some(completed) = record.completed_at {
                    println!("done:    {}", completed);
                }
            }
            None => println!("job {} not found", self.id),
        }

        if let Some(result) = store.result(&self.id)? {
            println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
        }
        Ok(())
    }
}
