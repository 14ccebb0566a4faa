//! SSH identity resolution
//!
//! A DUT's identity key can come from an explicit path, the agent, or a
//! base64-encoded environment variable (CI runners hand keys over that
//! way). Resolution happens once, when the executor is built.

use std::env;
use std::path::PathBuf;

use tracing::{debug, warn};

/// Where the identity key for a DUT comes from
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Explicit path to a key file
    Path(PathBuf),
    /// Use the SSH agent
    Agent,
    /// Base64-encoded key in an environment variable
    Env(String),
}

impl KeySource {
    /// Resolve to a usable key location
    ///
    /// An `Env` source is decoded and written to a temp file that lives as
    /// long as the resolved key.
    ///
    /// # Errors
    /// Returns `KeyError` when the source cannot be materialized (unset
    /// variable, bad base64, loose file permissions).
    pub fn resolve(&self) -> Result<ResolvedKey, KeyError> {
        match self {
            KeySource::Path(path) => {
                check_permissions(path)?;
                Ok(ResolvedKey::Path(path.clone()))
            }
            KeySource::Agent => Ok(ResolvedKey::Agent),
            KeySource::Env(var_name) => {
                let encoded =
                    env::var(var_name).map_err(|_| KeyError::EnvNotSet(var_name.clone()))?;
                let key_data = decode_base64(&encoded).map_err(|_| KeyError::InvalidBase64)?;
                let temp_path = write_temp_key(&key_data)?;
                Ok(ResolvedKey::Temp(temp_path))
            }
        }
    }
}

/// A key location ready to hand to the SSH library
#[derive(Debug)]
pub enum ResolvedKey {
    /// Key file on disk
    Path(PathBuf),
    /// Use the SSH agent
    Agent,
    /// Temp file removed when the key is dropped
    Temp(PathBuf),
}

impl ResolvedKey {
    /// File path, if the key is file-backed
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ResolvedKey::Path(p) | ResolvedKey::Temp(p) => Some(p),
            ResolvedKey::Agent => None,
        }
    }

    /// Whether the SSH agent should be used instead of a file
    #[must_use]
    pub fn use_agent(&self) -> bool {
        matches!(self, ResolvedKey::Agent)
    }
}

impl Drop for ResolvedKey {
    fn drop(&mut self) {
        if let ResolvedKey::Temp(path) = self {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove temp key");
            }
        }
    }
}

/// Key resolution errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("environment variable {0} not set")]
    EnvNotSet(String),

    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("key file permissions too open: {0} (should be 600)")]
    BadPermissions(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn decode_base64(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input.trim())
}

fn check_permissions(path: &PathBuf) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)?;
    let mode = metadata.permissions().mode();

    // Group/other bits must be clear; sshd-style 600 keys only.
    if mode & 0o77 != 0 {
        return Err(KeyError::BadPermissions(path.display().to_string()));
    }

    Ok(())
}

fn write_temp_key(key_data: &[u8]) -> Result<PathBuf, KeyError> {
    use std::fs::File;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let temp_path = std::env::temp_dir().join(format!("testrig_ssh_key_{}", std::process::id()));

    let mut file = File::create(&temp_path)?;
    file.write_all(key_data)?;

    let mut permissions = file.metadata()?.permissions();
    permissions.set_mode(0o600);
    std::fs::set_permissions(&temp_path, permissions)?;

    debug!(path = %temp_path.display(), "wrote temporary SSH key");

    Ok(temp_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_agent_resolution() {
        let resolved = KeySource::Agent.resolve().unwrap();
        assert!(resolved.use_agent());
        assert!(resolved.path().is_none());
    }

    #[test]
    fn test_path_resolution_checks_permissions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"key material").unwrap();
        let path = file.path().to_path_buf();

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(
            KeySource::Path(path.clone()).resolve(),
            Err(KeyError::BadPermissions(_))
        ));

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        let resolved = KeySource::Path(path.clone()).resolve().unwrap();
        assert_eq!(resolved.path(), Some(&path));
    }

    #[test]
    fn test_env_resolution_missing_variable() {
        let result = KeySource::Env("TESTRIG_NO_SUCH_KEY_VAR".to_string()).resolve();
        assert!(matches!(result, Err(KeyError::EnvNotSet(_))));
    }
}
