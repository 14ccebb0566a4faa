//! Error types for the execution layer

use std::time::Duration;

use thiserror::Error;

use crate::output::Output;

/// Errors that can occur while running commands or managing connections
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Transport-level failure (refused, reset, DNS, tunnel, timed-out
    /// connect attempt); retried only by explicit polling loops
    #[error("connection to {host} failed: {detail}")]
    Connection {
        /// Target host
        host: String,
        /// What went wrong, including the command when raised mid-execution
        detail: String,
    },

    /// Credentials rejected; never retried automatically
    #[error("authentication to {host} failed: {reason}")]
    Authentication {
        /// Target host
        host: String,
        /// Rejection detail
        reason: String,
    },

    /// Nonzero exit from `run_expect_success`
    #[error("command `{command}` failed with exit code {}", .output.exit_code)]
    CommandFailed {
        /// The command that was run
        command: String,
        /// Full output for diagnosis
        output: Output,
    },

    /// An operation exceeded its allotted duration; the in-flight
    /// process or session was terminated before this was raised
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Description of the operation that ran too long
        operation: String,
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Directory sync or single-file transfer failed
    #[error("transfer {spec} failed: {detail}")]
    TransferFailed {
        /// Source/destination description
        spec: String,
        /// Failure detail
        detail: String,
    },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    Spawn(String),

    /// I/O error during execution
    #[error("I/O error: {0}")]
    Io(String),

    /// Background task failed or panicked
    #[error("async task failed: {0}")]
    Task(String),

    /// Connection not established
    #[error("not connected")]
    NotConnected,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Operation not available on this executor kind
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl ExecError {
    /// Whether a retry loop may reasonably attempt the operation again
    ///
    /// Only transport-level failures qualify. Authentication and
    /// configuration errors will not resolve by retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::Connection { .. } | ExecError::Timeout { .. }
        )
    }
}
