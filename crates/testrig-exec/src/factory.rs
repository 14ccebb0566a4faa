//! Executor selection by explicit probes
//!
//! Each known executor kind has a probe evaluated against the host entry;
//! exactly one probe must match. Zero matches and ties are both hard
//! configuration errors rather than a silent fallback.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use testrig_core::RunContext;

use crate::error::ExecError;
use crate::keys::KeySource;
use crate::local::LocalExecutor;
use crate::ssh::{ConnectionInfo, SshExecutor};
use crate::traits::Executor;

/// Connection kinds the rig knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Commands run on the controller itself
    Local,
    /// Commands run on a remote DUT over SSH
    Ssh,
}

/// One DUT entry from the rig configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Unique name of the DUT within the run
    pub name: String,
    /// Address or SSH-config alias; absent or loopback means the
    /// controller itself
    pub addr: Option<String>,
    /// SSH user (defaults to root)
    #[serde(default = "default_user")]
    pub user: String,
    /// Path to SSH private key (optional, falls back to ssh-agent)
    pub ssh_key: Option<String>,
}

fn default_user() -> String {
    "root".to_string()
}

fn is_loopback(addr: &str) -> bool {
    addr == "localhost" || addr == "127.0.0.1" || addr == "::1"
}

fn probe_local(config: &HostConfig) -> bool {
    match config.addr.as_deref() {
        None => true,
        Some(addr) => is_loopback(addr),
    }
}

fn probe_ssh(config: &HostConfig) -> bool {
    matches!(config.addr.as_deref(), Some(addr) if !addr.is_empty() && !is_loopback(addr))
}

const PROBES: &[(ExecutorKind, fn(&HostConfig) -> bool)] = &[
    (ExecutorKind::Local, probe_local),
    (ExecutorKind::Ssh, probe_ssh),
];

/// Decide which executor kind serves a host entry
///
/// # Errors
/// `Config` when no probe matches or more than one does.
pub fn detect_kind(config: &HostConfig) -> Result<ExecutorKind, ExecError> {
    let matches: Vec<ExecutorKind> = PROBES
        .iter()
        .filter(|(_, probe)| probe(config))
        .map(|(kind, _)| *kind)
        .collect();

    match matches.as_slice() {
        [kind] => Ok(*kind),
        [] => Err(ExecError::Config(format!(
            "no executor kind matches host {}",
            config.name
        ))),
        _ => Err(ExecError::Config(format!(
            "host {} matches multiple executor kinds: {matches:?}",
            config.name
        ))),
    }
}

/// Build the executor serving a host entry
///
/// # Errors
/// `Config` from kind detection; `Key` when identity resolution fails.
pub fn build_executor(
    ctx: Arc<RunContext>,
    config: &HostConfig,
) -> Result<Arc<dyn Executor>, ExecError> {
    let kind = detect_kind(config)?;
    info!(host = %config.name, kind = ?kind, "building executor");

    match kind {
        ExecutorKind::Local => Ok(Arc::new(LocalExecutor::new(ctx))),
        ExecutorKind::Ssh => {
            let addr = config
                .addr
                .as_deref()
                .ok_or_else(|| ExecError::Config(format!("host {} has no address", config.name)))?;
            let key_source = match &config.ssh_key {
                Some(path) => KeySource::Path(path.clone().into()),
                None => KeySource::Agent,
            };
            let conn_info = ConnectionInfo::new(addr, &config.user);
            let executor = SshExecutor::new(ctx, conn_info, &key_source)?;
            Ok(Arc::new(executor))
        }
    }
}
