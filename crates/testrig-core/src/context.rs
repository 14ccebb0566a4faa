//! Shared run context
//!
//! One `RunContext` exists per test session and is passed explicitly to
//! every component that needs configuration or auditing. It replaces any
//! notion of process-global test state.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::RunConfig;

/// Per-session state shared by all executors
#[derive(Debug)]
pub struct RunContext {
    config: RunConfig,
    command_seq: AtomicU64,
}

impl RunContext {
    /// Create a context from an explicit configuration
    #[must_use]
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            command_seq: AtomicU64::new(0),
        }
    }

    /// Create a context with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RunConfig::default())
    }

    /// The session configuration
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Next command identifier
    ///
    /// Strictly increasing across the whole session; attached to the log
    /// line of every executed command so runs can be audited afterwards.
    pub fn next_command_id(&self) -> u64 {
        self.command_seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::with_defaults()
    }
}
