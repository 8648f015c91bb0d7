//! vmbench host configuration.
//!
//! Configuration is a TOML file loaded at startup, with every field
//! defaulted so an empty (or absent) file yields a working local setup.
//! A couple of deployment-facing settings can also be overridden through
//! the environment (`REDIS_URL`, `QUEUE_NAME`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default guest CID for the first (and only) benchmark VM.
pub const DEFAULT_GUEST_CID: u32 = 3;
/// Default queue name.
pub const DEFAULT_QUEUE_NAME: &str = "benchmark_jobs";
/// Default queue capacity (queued + processing).
pub const DEFAULT_QUEUE_MAX_SIZE: usize = 1024;

/// Top-level host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// VM spawn and connection settings.
    pub vm: VmConfig,
    /// Queue backend settings.
    pub queue: QueueConfig,
    /// Dispatch loop settings.
    pub dispatch: DispatchConfig,
}

/// VM spawn and connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Path to the VM binary (e.g. firecracker). When absent the
    /// dispatcher attaches to an already-listening channel instead of
    /// spawning a VM, which is how local runs and tests work.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,
    /// VM configuration file passed to the binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// VM API socket path.
    pub api_socket: PathBuf,
    /// Host-side unix socket exposing the guest vsock channel.
    pub vsock_socket: PathBuf,
    /// Guest CID (host-visible VM address).
    pub cid: u32,
    /// Guest vsock port the agent listens on.
    pub guest_port: u32,
    /// How long to wait after spawning before the first connect attempt.
    pub boot_grace_ms: u64,
    /// Connection attempts before giving up on a booting VM.
    pub max_connect_attempts: u32,
    /// Fixed delay between connection attempts.
    pub connect_backoff_ms: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            binary: None,
            config_file: None,
            api_socket: PathBuf::from("/tmp/vmbench-api.sock"),
            vsock_socket: PathBuf::from("/tmp/vmbench-vsock.sock"),
            cid: DEFAULT_GUEST_CID,
            guest_port: vmbench_protocol::DEFAULT_GUEST_PORT,
            boot_grace_ms: 2_000,
            max_connect_attempts: 10,
            connect_backoff_ms: 500,
        }
    }
}

/// Queue backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue name; storage keys are derived from it.
    pub name: String,
    /// Capacity bound counting both queued and processing jobs.
    pub max_size: usize,
    /// Redis connection URL. Absent means the in-process memory queue,
    /// which only makes sense for single-process runs and tests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_QUEUE_NAME.to_string(),
            max_size: DEFAULT_QUEUE_MAX_SIZE,
            redis_url: None,
        }
    }
}

/// Dispatch loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Blocking wait per `pend` call; the serve loop spins on this.
    pub pend_timeout_ms: u64,
    /// Run `requeue_processing` once at startup. Off by default: jobs
    /// parked in processing stay there until an operator requeues them.
    pub recover_on_start: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pend_timeout_ms: 5_000,
            recover_on_start: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and apply environment overrides.
    ///
    /// A missing path yields the defaults (still subject to overrides).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    Error::config("load", format!("{}: {}", path.display(), e))
                })?;
                toml::from_str(&contents)
                    .map_err(|e| Error::config("parse", format!("{}: {}", path.display(), e)))?
            }
            None => Self::default(),
        };

        config.apply_overrides(
            std::env::var("REDIS_URL").ok(),
            std::env::var("QUEUE_NAME").ok(),
        );
        Ok(config)
    }

    fn apply_overrides(&mut self, redis_url: Option<String>, queue_name: Option<String>) {
        if let Some(url) = redis_url {
            self.queue.redis_url = Some(url);
        }
        if let Some(name) = queue_name {
            self.queue.name = name;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_a_working_local_setup() {
        let config = Config::default();
        assert!(config.vm.binary.is_none());
        assert_eq!(config.vm.cid, 3);
        assert_eq!(config.vm.guest_port, 5000);
        assert_eq!(config.vm.max_connect_attempts, 10);
        assert_eq!(config.queue.name, "benchmark_jobs");
        assert_eq!(config.queue.max_size, 1024);
        assert!(config.queue.redis_url.is_none());
        assert!(!config.dispatch.recover_on_start);
    }

    #[test]
    fn partial_toml_keeps_defaults_elsewhere() {
        let config: Config = toml::from_str(
            r#"
            [queue]
            name = "night-runs"
            max_size = 8

            [vm]
            boot_grace_ms = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.name, "night-runs");
        assert_eq!(config.queue.max_size, 8);
        assert_eq!(config.vm.boot_grace_ms, 100);
        // Untouched sections keep their defaults.
        assert_eq!(config.vm.guest_port, 5000);
        assert_eq!(config.dispatch.pend_timeout_ms, 5_000);
    }

    #[test]
    fn empty_toml_is_valid() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.queue.name, DEFAULT_QUEUE_NAME);
    }

    #[test]
    fn env_overrides_replace_queue_settings() {
        let mut config = Config::default();
        config.apply_overrides(
            Some("redis://queue-host:6379/0".to_string()),
            Some("ci_jobs".to_string()),
        );
        assert_eq!(
            config.queue.redis_url.as_deref(),
            Some("redis://queue-host:6379/0")
        );
        assert_eq!(config.queue.name, "ci_jobs");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/vmbench.toml"))).unwrap_err();
        assert!(err.to_string().contains("config operation failed"));
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.queue.name, config.queue.name);
        assert_eq!(back.vm.connect_backoff_ms, config.vm.connect_backoff_ms);
    }
}
