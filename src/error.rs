//! Error types for vmbench.
//!
//! # Error Message Style Guide
//!
//! All error messages follow a consistent format for clarity and actionability:
//!
//! - **Format**: `"<operation> failed: <reason>"` or `"<entity> not found: <identifier>"`
//! - **Case**: All lowercase (Rust convention for error messages)
//! - **Context**: Include relevant identifiers (job id, queue name, path) when available
//! - **Actionability**: Messages should help users understand what went wrong and how to fix it
//!
//! ## Preferred Patterns
//!
//! ```text
//! // Operation failures (use "failed" consistently)
//! "vm creation failed: binary not found"
//! "queue operation failed: push: connection refused"
//!
//! // Not found errors (use structured variants)
//! "job payload not found: 42"
//!
//! // Invalid state/input errors
//! "invalid container state: expected ready, got closed"
//! ```

use thiserror::Error;

/// Result type alias using vmbench's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in vmbench operations.
///
/// Error messages follow a consistent format. See module documentation for style guide.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Container Lifecycle Errors
    // ========================================================================
    /// Failed to create or spawn the VM.
    #[error("vm creation failed: {0}")]
    VmCreation(String),

    /// The VM process exited or never became reachable during startup.
    #[error("vm boot failed: {0}")]
    BootFailed(String),

    /// Container is in an invalid state for the requested operation.
    #[error("invalid container state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state.
        expected: String,
        /// Actual state.
        actual: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Channel-level failure (short read, bad length prefix, send/recv).
    /// The current job becomes an infrastructure failure and the container
    /// is discarded.
    #[error("transport operation failed: {operation}: {reason}")]
    Transport {
        /// The operation that failed (e.g., "send job", "receive result").
        operation: String,
        /// The reason for the failure.
        reason: String,
    },

    /// The agent rejected or garbled the connection handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    // ========================================================================
    // Queue Errors
    // ========================================================================
    /// Queue storage operation failed. Read-side callers degrade to a safe
    /// default and log instead of propagating this.
    #[error("queue operation failed: {operation}: {reason}")]
    Queue {
        /// The operation that failed (e.g., "push", "pend", "requeue").
        operation: String,
        /// The reason for the failure.
        reason: String,
    },

    // ========================================================================
    // Job Store Errors
    // ========================================================================
    /// Job store operation failed.
    #[error("store operation failed: {operation}: {reason}")]
    Store {
        /// The operation that failed (e.g., "fetch job", "finalize result").
        operation: String,
        /// The reason for the failure.
        reason: String,
    },

    /// A pended job id had no payload in the store.
    #[error("job payload not found: {id}")]
    JobNotFound {
        /// Identifier of the missing job.
        id: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration operation failed.
    #[error("config operation failed: {operation}: {reason}")]
    Config {
        /// The operation that failed (e.g., "load", "parse").
        operation: String,
        /// The reason for the failure.
        reason: String,
    },

    // ========================================================================
    // IO Errors
    // ========================================================================
    /// IO error wrapper.
    #[error("io operation failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a VM creation error.
    pub fn vm_creation(reason: impl Into<String>) -> Self {
        Self::VmCreation(reason.into())
    }

    /// Create a VM boot error.
    pub fn boot_failed(reason: impl Into<String>) -> Self {
        Self::BootFailed(reason.into())
    }

    /// Create an invalid container state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a transport operation error.
    pub fn transport(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a handshake error.
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Handshake(reason.into())
    }

    /// Create a queue operation error.
    pub fn queue(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Queue {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a store operation error.
    pub fn store(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing job payload error.
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound { id: id.into() }
    }

    /// Create a config operation error.
    pub fn config(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}
