//! Core error types for testrig-core

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while setting up a run
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration file could not be read
    #[error("failed to read config {path}: {source}")]
    ReadConfig {
        /// Path that was attempted
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Configuration file could not be parsed
    #[error("failed to parse config {path}: {source}")]
    ParseConfig {
        /// Path that was attempted
        path: PathBuf,
        /// Underlying TOML error
        source: toml::de::Error,
    },
}
