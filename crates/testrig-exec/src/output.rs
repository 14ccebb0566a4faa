//! Result type for command execution

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Immutable result of a single command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    /// Exit status code (0 for success)
    pub exit_code: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl Output {
    /// Build an Output from captured byte streams
    ///
    /// Conversion is lossy; DUT output is not guaranteed to be UTF-8.
    #[must_use]
    pub fn from_raw(stdout: &[u8], stderr: &[u8], exit_code: i32, duration: Duration) -> Self {
        Self {
            exit_code,
            stdout: String::from_utf8_lossy(stdout).to_string(),
            stderr: String::from_utf8_lossy(stderr).to_string(),
            duration,
        }
    }

    /// Check if the command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combine stdout and stderr
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success() {
        let output = Output::from_raw(b"ok\n", b"", 0, Duration::from_millis(1));
        assert!(output.success());
        assert_eq!(output.stdout, "ok\n");
    }

    #[test]
    fn test_failure() {
        let output = Output::from_raw(b"", b"boom\n", 3, Duration::from_millis(1));
        assert!(!output.success());
        assert_eq!(output.exit_code, 3);
    }

    #[test]
    fn test_combined_output() {
        let output = Output::from_raw(b"out", b"err", 1, Duration::from_millis(1));
        assert_eq!(output.combined_output(), "out\nerr");

        let quiet = Output::from_raw(b"out", b"", 0, Duration::from_millis(1));
        assert_eq!(quiet.combined_output(), "out");
    }

    #[test]
    fn test_lossy_conversion() {
        let output = Output::from_raw(&[0xff, 0xfe], b"", 0, Duration::from_millis(1));
        assert!(!output.stdout.is_empty());
    }
}
