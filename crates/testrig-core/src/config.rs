//! Controller-side configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const DEFAULT_SHELL_PATH: &str = "/bin/bash";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Settings consumed by the execution layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Shell interpreter used for local commands
    #[serde(default = "default_shell_path")]
    pub shell_path: String,
    /// Default timeout for a single SSH connection attempt, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Upper bound for the reconnect wait after a DUT reboot, in seconds
    pub reboot_timeout_secs: Option<u64>,
    /// SSH client configuration file consulted for host aliases
    ///
    /// Unset means the user's `~/.ssh/config`.
    pub ssh_config_path: Option<PathBuf>,
}

fn default_shell_path() -> String {
    DEFAULT_SHELL_PATH.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            shell_path: default_shell_path(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reboot_timeout_secs: None,
            ssh_config_path: None,
        }
    }
}

impl RunConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| CoreError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    /// Load from the `TESTRIG_CONFIG` env var or common paths, falling back
    /// to defaults when no file exists
    pub fn load_default() -> Result<Self, CoreError> {
        if let Ok(path) = std::env::var("TESTRIG_CONFIG") {
            return Self::load(&PathBuf::from(path));
        }

        let paths = [
            PathBuf::from("testrig.toml"),
            dirs::config_dir()
                .map(|p| p.join("testrig/testrig.toml"))
                .unwrap_or_default(),
        ];

        for path in paths {
            if path.exists() {
                return Self::load(&path);
            }
        }

        tracing::warn!("no config file found, using defaults");
        Ok(Self::default())
    }

    /// Default timeout for a single SSH connection attempt
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Configured reboot wait bound, if any
    #[must_use]
    pub fn reboot_timeout(&self) -> Option<Duration> {
        self.reboot_timeout_secs.map(Duration::from_secs)
    }

    /// Effective SSH client configuration path
    ///
    /// Returns `None` when no path is configured and no home directory can
    /// be determined.
    #[must_use]
    pub fn ssh_config_path(&self) -> Option<PathBuf> {
        self.ssh_config_path
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".ssh").join("config")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.shell_path, "/bin/bash");
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert!(config.reboot_timeout().is_none());
    }

    #[test]
    fn test_load_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
shell_path = "/bin/sh"
connect_timeout_secs = 10
reboot_timeout_secs = 300
ssh_config_path = "/tmp/ssh_config"
"#
        )
        .unwrap();

        let config = RunConfig::load(file.path()).unwrap();
        assert_eq!(config.shell_path, "/bin/sh");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.reboot_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(
            config.ssh_config_path(),
            Some(PathBuf::from("/tmp/ssh_config"))
        );
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"reboot_timeout_secs = 120"#).unwrap();

        let config = RunConfig::load(file.path()).unwrap();
        assert_eq!(config.shell_path, "/bin/bash");
        assert_eq!(config.reboot_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_load_missing_file() {
        let result = RunConfig::load(Path::new("/nonexistent/testrig.toml"));
        assert!(matches!(result, Err(CoreError::ReadConfig { .. })));
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "shell_path = [not toml").unwrap();

        let result = RunConfig::load(file.path());
        assert!(matches!(result, Err(CoreError::ParseConfig { .. })));
    }
}
