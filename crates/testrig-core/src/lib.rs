//! testrig-core: run-wide context for the test rig
//!
//! Holds the controller-side configuration and the shared `RunContext`
//! object that the execution layer consults for settings and command
//! identifiers.

pub mod config;
pub mod context;
pub mod error;
pub mod logging;

pub use config::RunConfig;
pub use context::RunContext;
pub use error::CoreError;
pub use logging::init_tracing;
