//! Dispatcher daemon command.

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use vmbench::{Config, Container, DispatchManager, Result};

/// Claim and run jobs from the queue until stopped
#[derive(Args, Debug)]
pub struct ServeCmd {
    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Requeue jobs a previous dispatcher left claimed
    #[arg(long)]
    pub recover: bool,
}

impl ServeCmd {
    pub fn run(self) -> Result<()> {
        let mut config = Config::load(self.config.as_deref())?;
        if self.recover {
            config.dispatch.recover_on_start = true;
        }

        let queue = super::open_queue(&config)?;
        let (store, sink) = super::store_handles(super::open_store(&config)?);

        info!(
            queue = %config.queue.name,
            vsock_socket = %config.vm.vsock_socket.display(),
            "starting dispatcher"
        );

        let container = Container::new(config.vm.clone());
        let mut manager = DispatchManager::new(container, queue, store, sink, &config.dispatch);

        manager.start()?;
        let result = manager.run();
        manager.stop();
        result
    }
}
