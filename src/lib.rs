//! vmbench - sandboxed benchmark job dispatch
//!
//! vmbench runs untrusted benchmark code inside isolated microVMs and
//! reports per-job performance metrics. Submitters push jobs onto a
//! durable queue; a dispatcher claims them one at a time, ships them over
//! the VM's vsock channel to the in-guest agent, and records results.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │  vmbench CLI (submit / serve / queue)           │
//! ├─────────────────────────────────────────────────┤
//! │  DispatchManager (queue -> container -> store)  │
//! ├─────────────────────────────────────────────────┤
//! │  Container (VM lifecycle + framed job channel)  │
//! ├─────────────────────────────────────────────────┤
//! │  vmbench-agent (in-guest compile/run/measure)   │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vmbench::{Config, Container, DispatchManager, MemoryQueue, MemoryStore};
//!
//! let config = Config::default();
//! let queue = Arc::new(MemoryQueue::new(config.queue.max_size));
//! let store = Arc::new(MemoryStore::new());
//!
//! let container = Container::new(config.vm.clone());
//! let mut manager = DispatchManager::new(
//!     container,
//!     queue,
//!     store.clone(),
//!     store,
//!     &config.dispatch,
//! );
//!
//! manager.start().unwrap();
//! manager.run().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod process;
pub mod queue;
pub mod store;
pub mod vm;

// Re-export main types for convenience
pub use config::{Config, DispatchConfig, QueueConfig, VmConfig};
pub use dispatch::DispatchManager;
pub use error::{Error, Result};
pub use queue::{MemoryQueue, QueueBackend, RedisQueue};
pub use store::{JobRecord, JobStatus, JobStore, MemoryStore, RedisStore, ResultSink};
pub use vm::{Container, ContainerState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
