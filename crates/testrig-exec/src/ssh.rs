//! SSH-backed executor using the russh crate
//!
//! Owns the session to one DUT: connect (directly or through a ProxyJump
//! bastion), execute commands over exec channels, move files over SFTP,
//! and drive the reconnect polling that survives a DUT power cycle.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

use russh::keys::ssh_key;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect, client};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;

use testrig_core::RunContext;

use crate::error::ExecError;
use crate::keys::{KeySource, ResolvedKey};
use crate::local::run_shell;
use crate::output::Output;
use crate::ssh_config::{ResolvedTarget, SshConfig, resolve_target};
use crate::traits::Executor;
use crate::transfer::{RemoteSpec, TransferDirection, TransferOptions, rsync_command};

/// Timeout for the no-op liveness probe
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for each reconnect probe while waiting for connection loss
const LOSS_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Pause between attempts in the reconnect polling loop
const RETRY_DELAY: Duration = Duration::from_secs(1);
/// Window in which a rebooting DUT must stop accepting connections
const LOSS_TIMEOUT: Duration = Duration::from_secs(60);
/// Reconnect bound after reboot when the config does not set one
const DEFAULT_REBOOT_TIMEOUT: Duration = Duration::from_secs(600);
/// Bound for the reboot command itself; the session usually dies under it
const REBOOT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound for auxiliary commands run on the jump host
const JUMP_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection lifecycle of an SSH executor
///
/// Owned exclusively by its executor; transitions happen on explicit
/// calls and on detected transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// Session established and authenticated
    Connected,
    /// A polling loop is re-attempting after a failure
    Reconnecting,
}

/// Static connection defaults for a DUT, before SSH-config resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Host address or SSH-config alias
    pub host: String,
    /// Port (default 22)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login user
    pub user: String,
    /// Optional SSH key path
    pub ssh_key: Option<String>,
}

fn default_port() -> u16 {
    22
}

impl ConnectionInfo {
    /// Create new connection info
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            ssh_key: None,
        }
    }

    /// Set SSH key path
    #[must_use]
    pub fn with_ssh_key(mut self, path: impl Into<String>) -> Self {
        self.ssh_key = Some(path.into());
        self
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Accepts any server key
///
/// Lab DUTs are re-imaged and re-keyed constantly; a known-hosts store
/// would reject them after every install. Trust-on-first-use only.
#[derive(Debug)]
struct TofuHandler;

impl client::Handler for TofuHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Session slot guarded by one mutex; an executor serializes its own use
struct SessionSlot {
    state: ConnectionState,
    target: Option<client::Handle<TofuHandler>>,
    /// Bastion session backing the tunnel; lives exactly as long as the
    /// target session that runs over it
    jump: Option<client::Handle<TofuHandler>>,
}

impl SessionSlot {
    fn clear(&mut self) {
        self.target = None;
        self.jump = None;
        self.state = ConnectionState::Disconnected;
    }
}

/// SSH command executor for one DUT
pub struct SshExecutor {
    ctx: Arc<RunContext>,
    conn_info: ConnectionInfo,
    key: ResolvedKey,
    slot: Mutex<SessionSlot>,
    /// Parameters resolved at the last successful connect, kept for rsync
    /// transport specs and address resolution
    resolved: Mutex<Option<ResolvedTarget>>,
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor")
            .field("conn_info", &self.conn_info)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl SshExecutor {
    /// Create a new SSH executor
    ///
    /// # Errors
    /// Returns `Key` if identity resolution fails
    pub fn new(
        ctx: Arc<RunContext>,
        conn_info: ConnectionInfo,
        key_source: &KeySource,
    ) -> Result<Self, ExecError> {
        let key = key_source
            .resolve()
            .map_err(|e| ExecError::Key(e.to_string()))?;

        Ok(Self {
            ctx,
            conn_info,
            key,
            slot: Mutex::new(SessionSlot {
                state: ConnectionState::Disconnected,
                target: None,
                jump: None,
            }),
            resolved: Mutex::new(None),
        })
    }

    /// Connection defaults this executor was built with
    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.conn_info
    }

    /// Current lifecycle state
    pub async fn state(&self) -> ConnectionState {
        self.slot.lock().await.state
    }

    fn connect_timeout(&self) -> Duration {
        self.ctx.config().connect_timeout()
    }

    /// Resolve effective parameters for this DUT, consulting the SSH
    /// client config when one exists
    fn resolve(
        &self,
        user: Option<&str>,
        port: Option<u16>,
    ) -> Result<ResolvedTarget, ExecError> {
        let config = match self.ctx.config().ssh_config_path() {
            Some(path) => SshConfig::load(&path)?,
            None => None,
        };
        let default_identity = self
            .conn_info
            .ssh_key
            .as_deref()
            .map(PathBuf::from)
            .or_else(|| self.key.path().cloned());
        resolve_target(
            config.as_ref(),
            &self.conn_info.host,
            user,
            port,
            &self.conn_info.user,
            self.conn_info.port,
            default_identity.as_deref(),
        )
    }

    /// Connect with explicit user/port overrides
    ///
    /// Overrides take precedence over SSH-config values, which take
    /// precedence over the executor's defaults. A no-op when already
    /// connected.
    ///
    /// # Errors
    /// `Authentication` when credentials are rejected (never worth
    /// retrying); `Connection` for every transport-level failure,
    /// including an attempt that exceeds `connect_timeout`.
    pub async fn connect_as(
        &self,
        user: Option<&str>,
        port: Option<u16>,
        connect_timeout: Duration,
    ) -> Result<(), ExecError> {
        let mut slot = self.slot.lock().await;
        if slot.target.is_some() {
            return Ok(());
        }
        slot.state = ConnectionState::Connecting;

        let resolved = match self.resolve(user, port) {
            Ok(resolved) => resolved,
            Err(e) => {
                slot.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        info!(
            host = %resolved.hostname,
            port = resolved.port,
            user = %resolved.user,
            via = ?resolved.proxy.as_ref().map(|p| &p.hostname),
            "connecting to DUT"
        );

        match timeout(connect_timeout, self.open_session(&resolved)).await {
            Ok(Ok((target, jump))) => {
                slot.target = Some(target);
                slot.jump = jump;
                slot.state = ConnectionState::Connected;
                drop(slot);
                info!(host = %resolved.hostname, "connected and authenticated");
                *self.resolved.lock().await = Some(resolved);
                Ok(())
            }
            Ok(Err(e)) => {
                slot.state = ConnectionState::Disconnected;
                Err(e)
            }
            Err(_) => {
                slot.state = ConnectionState::Disconnected;
                Err(ExecError::Connection {
                    host: resolved.hostname.clone(),
                    detail: format!("connect attempt exceeded {connect_timeout:?}"),
                })
            }
        }
    }

    /// Open (and authenticate) the session described by `resolved`,
    /// tunneling through its proxy hop first when one is configured
    async fn open_session(
        &self,
        resolved: &ResolvedTarget,
    ) -> Result<
        (
            client::Handle<TofuHandler>,
            Option<client::Handle<TofuHandler>>,
        ),
        ExecError,
    > {
        let config = Arc::new(client::Config::default());

        match &resolved.proxy {
            None => {
                let mut target = client::connect(
                    config,
                    (resolved.hostname.as_str(), resolved.port),
                    TofuHandler,
                )
                .await
                .map_err(|e| ExecError::Connection {
                    host: resolved.hostname.clone(),
                    detail: e.to_string(),
                })?;
                self.authenticate(&mut target, resolved).await?;
                Ok((target, None))
            }
            Some(proxy) => {
                // Hop 1: the bastion itself.
                let mut jump = client::connect(
                    config.clone(),
                    (proxy.hostname.as_str(), proxy.port),
                    TofuHandler,
                )
                .await
                .map_err(|e| ExecError::Connection {
                    host: proxy.hostname.clone(),
                    detail: format!("proxy connect failed: {e}"),
                })?;
                self.authenticate(&mut jump, proxy).await?;

                // Hop 2: a direct-tcpip tunnel to the DUT, then a full SSH
                // session over the tunneled stream. The bastion resolves
                // the DUT's name on its side of the network.
                let channel = jump
                    .channel_open_direct_tcpip(
                        resolved.hostname.clone(),
                        u32::from(resolved.port),
                        "127.0.0.1".to_string(),
                        22,
                    )
                    .await
                    .map_err(|e| ExecError::Connection {
                        host: resolved.hostname.clone(),
                        detail: format!("tunnel through {} failed: {e}", proxy.hostname),
                    })?;

                let mut target =
                    client::connect_stream(config, channel.into_stream(), TofuHandler)
                        .await
                        .map_err(|e| ExecError::Connection {
                            host: resolved.hostname.clone(),
                            detail: format!("handshake over tunnel failed: {e}"),
                        })?;
                self.authenticate(&mut target, resolved).await?;
                Ok((target, Some(jump)))
            }
        }
    }

    /// Public-key authentication against one hop
    async fn authenticate(
        &self,
        session: &mut client::Handle<TofuHandler>,
        target: &ResolvedTarget,
    ) -> Result<(), ExecError> {
        let key_path = target
            .identity_file
            .clone()
            .or_else(|| self.key.path().cloned());

        let Some(key_path) = key_path else {
            if self.key.use_agent() {
                // TODO: agent forwarding needs russh-agent plumbing
                return Err(ExecError::Authentication {
                    host: target.hostname.clone(),
                    reason: "SSH agent authentication not yet supported".to_string(),
                });
            }
            return Err(ExecError::Authentication {
                host: target.hostname.clone(),
                reason: "no authentication method available".to_string(),
            });
        };

        let key_pair =
            load_secret_key(&key_path, None).map_err(|e| ExecError::Key(e.to_string()))?;

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        let auth_res = session
            .authenticate_publickey(
                &target.user,
                PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
            )
            .await
            .map_err(|e| ExecError::Authentication {
                host: target.hostname.clone(),
                reason: e.to_string(),
            })?;

        if !auth_res.success() {
            return Err(ExecError::Authentication {
                host: target.hostname.clone(),
                reason: format!("public key {} rejected", key_path.display()),
            });
        }

        Ok(())
    }

    /// Execute on the established session
    ///
    /// Transport failures and timeouts tear the session down before the
    /// error is raised; no channel lingers afterwards.
    async fn execute_remote(
        &self,
        command: &str,
        timeout_duration: Duration,
    ) -> Result<Output, ExecError> {
        let mut slot = self.slot.lock().await;
        let session = slot.target.as_mut().ok_or(ExecError::NotConnected)?;

        let id = self.ctx.next_command_id();
        let start = Instant::now();
        debug!(id, command = %command, host = %self.conn_info.host, "executing remote command");

        match timeout(timeout_duration, run_channel(session, command)).await {
            Ok(Ok((exit_code, stdout, stderr))) => {
                let output = Output::from_raw(&stdout, &stderr, exit_code, start.elapsed());
                debug!(
                    id,
                    exit_code = output.exit_code,
                    duration = ?output.duration,
                    "remote command completed"
                );
                Ok(output)
            }
            Ok(Err(e)) => {
                // The connection failed, not the command; make that
                // distinction visible without transport internals.
                slot.clear();
                Err(ExecError::Connection {
                    host: self.conn_info.host.clone(),
                    detail: format!("while executing `{command}`: {e}"),
                })
            }
            Err(_) => {
                slot.clear();
                Err(ExecError::Timeout {
                    operation: format!("command `{command}` on {}", self.conn_info.host),
                    timeout: timeout_duration,
                })
            }
        }
    }

    /// Cached resolution from the last connect, or a fresh one
    async fn resolved_or_resolve(&self) -> Result<ResolvedTarget, ExecError> {
        if let Some(resolved) = self.resolved.lock().await.clone() {
            return Ok(resolved);
        }
        self.resolve(None, None)
    }

    /// Open an SFTP session on the established connection
    async fn open_sftp(
        slot: &mut SessionSlot,
        host: &str,
    ) -> Result<SftpSession, ExecError> {
        let session = slot.target.as_mut().ok_or(ExecError::NotConnected)?;
        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::Connection {
                host: host.to_string(),
                detail: format!("opening sftp channel: {e}"),
            })?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| ExecError::Connection {
                host: host.to_string(),
                detail: format!("requesting sftp subsystem: {e}"),
            })?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ExecError::Connection {
                host: host.to_string(),
                detail: format!("starting sftp session: {e}"),
            })
    }

    /// Upload a single file over SFTP
    async fn sftp_put(&self, src: &str, dst: &str) -> Result<(), ExecError> {
        let mut slot = self.slot.lock().await;
        let sftp = Self::open_sftp(&mut slot, &self.conn_info.host).await?;

        let spec = format!("{src} -> {}:{dst}", self.conn_info.host);
        let contents = tokio::fs::read(src)
            .await
            .map_err(|e| ExecError::TransferFailed {
                spec: spec.clone(),
                detail: e.to_string(),
            })?;

        let mut remote_file = sftp
            .open_with_flags(
                dst,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await
            .map_err(|e| ExecError::TransferFailed {
                spec: spec.clone(),
                detail: e.to_string(),
            })?;
        remote_file
            .write_all(&contents)
            .await
            .map_err(|e| ExecError::TransferFailed {
                spec: spec.clone(),
                detail: e.to_string(),
            })?;
        remote_file
            .flush()
            .await
            .map_err(|e| ExecError::TransferFailed {
                spec: spec.clone(),
                detail: e.to_string(),
            })?;
        remote_file
            .shutdown()
            .await
            .map_err(|e| ExecError::TransferFailed {
                spec,
                detail: e.to_string(),
            })?;
        Ok(())
    }

    /// Download a single file over SFTP
    async fn sftp_get(&self, src: &str, dst: &str) -> Result<(), ExecError> {
        let mut slot = self.slot.lock().await;
        let sftp = Self::open_sftp(&mut slot, &self.conn_info.host).await?;

        let spec = format!("{}:{src} -> {dst}", self.conn_info.host);
        let mut remote_file = sftp
            .open_with_flags(src, OpenFlags::READ)
            .await
            .map_err(|e| ExecError::TransferFailed {
                spec: spec.clone(),
                detail: e.to_string(),
            })?;

        let mut contents = Vec::new();
        remote_file
            .read_to_end(&mut contents)
            .await
            .map_err(|e| ExecError::TransferFailed {
                spec: spec.clone(),
                detail: e.to_string(),
            })?;

        tokio::fs::write(dst, contents)
            .await
            .map_err(|e| ExecError::TransferFailed {
                spec,
                detail: e.to_string(),
            })?;
        Ok(())
    }

    /// Run a command on the jump host over a session scoped to this call
    async fn run_on_jump(
        &self,
        proxy: &ResolvedTarget,
        command: &str,
    ) -> Result<Output, ExecError> {
        let config = Arc::new(client::Config::default());
        let mut session =
            client::connect(config, (proxy.hostname.as_str(), proxy.port), TofuHandler)
                .await
                .map_err(|e| ExecError::Connection {
                    host: proxy.hostname.clone(),
                    detail: e.to_string(),
                })?;
        self.authenticate(&mut session, proxy).await?;

        let start = Instant::now();
        let result = match timeout(JUMP_COMMAND_TIMEOUT, run_channel(&mut session, command)).await
        {
            Ok(Ok((exit_code, stdout, stderr))) => {
                Ok(Output::from_raw(&stdout, &stderr, exit_code, start.elapsed()))
            }
            Ok(Err(e)) => Err(ExecError::Connection {
                host: proxy.hostname.clone(),
                detail: format!("while executing `{command}`: {e}"),
            }),
            Err(_) => Err(ExecError::Timeout {
                operation: format!("command `{command}` on {}", proxy.hostname),
                timeout: JUMP_COMMAND_TIMEOUT,
            }),
        };

        let _ = session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;
        result
    }
}

/// Drain one exec channel to completion
async fn run_channel(
    session: &mut client::Handle<TofuHandler>,
    command: &str,
) -> Result<(i32, Vec<u8>, Vec<u8>), russh::Error> {
    let mut channel = session.channel_open_session().await?;
    channel.exec(true, command).await?;

    let mut exit_code = -1;
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                stdout.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                if ext == 1 {
                    stderr.extend_from_slice(&data);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                exit_code = exit_status.cast_signed();
            }
            Some(ChannelMsg::Eof) | None => break,
            _ => {}
        }
    }

    Ok((exit_code, stdout, stderr))
}

#[async_trait]
impl Executor for SshExecutor {
    async fn run(&self, command: &str, timeout_duration: Duration) -> Result<Output, ExecError> {
        self.execute_remote(command, timeout_duration).await
    }

    async fn copy_to(&self, src: &str, dst: &str, timeout_duration: Duration) -> Result<(), ExecError> {
        debug!(src, dst, host = %self.conn_info.host, "sftp upload");
        match timeout(timeout_duration, self.sftp_put(src, dst)).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::Timeout {
                operation: format!("copy {src} -> {}:{dst}", self.conn_info.host),
                timeout: timeout_duration,
            }),
        }
    }

    async fn copy_from(&self, src: &str, dst: &str, timeout_duration: Duration) -> Result<(), ExecError> {
        debug!(src, dst, host = %self.conn_info.host, "sftp download");
        match timeout(timeout_duration, self.sftp_get(src, dst)).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::Timeout {
                operation: format!("copy {}:{src} -> {dst}", self.conn_info.host),
                timeout: timeout_duration,
            }),
        }
    }

    async fn sync(
        &self,
        src: &str,
        dst: &str,
        direction: TransferDirection,
        options: &TransferOptions,
        timeout_duration: Duration,
    ) -> Result<(), ExecError> {
        let resolved = self.resolved_or_resolve().await?;
        let identity = resolved
            .identity_file
            .clone()
            .or_else(|| self.key.path().cloned());
        let spec = RemoteSpec {
            user: &resolved.user,
            host: &resolved.hostname,
            port: resolved.port,
            identity_file: identity.as_deref(),
        };
        let command = rsync_command(src, dst, direction, options, Some(&spec));
        let output = run_shell(&self.ctx, &command, timeout_duration).await?;
        if output.success() {
            Ok(())
        } else {
            Err(ExecError::TransferFailed {
                spec: format!("{src} -> {dst} ({direction:?})"),
                detail: output.combined_output(),
            })
        }
    }

    fn is_remote(&self) -> bool {
        true
    }

    async fn connect(&self, timeout_duration: Duration) -> Result<(), ExecError> {
        self.connect_as(None, None, timeout_duration).await
    }

    async fn disconnect(&self) -> Result<(), ExecError> {
        let mut slot = self.slot.lock().await;
        let target = slot.target.take();
        let jump = slot.jump.take();
        slot.state = ConnectionState::Disconnected;
        drop(slot);

        match target {
            Some(session) => {
                session
                    .disconnect(Disconnect::ByApplication, "", "English")
                    .await
                    .map_err(|e| ExecError::Io(e.to_string()))?;
                if let Some(jump_session) = jump {
                    let _ = jump_session
                        .disconnect(Disconnect::ByApplication, "", "English")
                        .await;
                }
                info!(host = %self.conn_info.host, "disconnected");
            }
            None => {
                debug!(host = %self.conn_info.host, "already disconnected");
            }
        }
        Ok(())
    }

    async fn is_active(&self) -> bool {
        self.execute_remote("true", LIVENESS_TIMEOUT).await.is_ok()
    }

    async fn wait_for_connection(&self, timeout_duration: Duration) -> Result<(), ExecError> {
        info!(host = %self.conn_info.host, timeout = ?timeout_duration, "waiting for DUT ssh connection");
        let deadline = Instant::now() + timeout_duration;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ExecError::Connection {
                    host: self.conn_info.host.clone(),
                    detail: format!("not reachable within {timeout_duration:?}"),
                });
            }

            let attempt_timeout = remaining.min(self.connect_timeout());
            match self.connect_as(None, None, attempt_timeout).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    debug!(host = %self.conn_info.host, error = %e, "connect attempt failed, retrying");
                    self.slot.lock().await.state = ConnectionState::Reconnecting;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                // Authentication and configuration failures will not
                // resolve by retrying.
                Err(e) => return Err(e),
            }
        }
    }

    async fn wait_for_connection_loss(&self, timeout_duration: Duration) -> Result<(), ExecError> {
        info!(host = %self.conn_info.host, timeout = ?timeout_duration, "waiting for DUT ssh connection loss");
        let deadline = Instant::now() + timeout_duration;

        while Instant::now() < deadline {
            // A closed local handle proves nothing; only a failed
            // reconnect attempt shows the DUT is actually down.
            let _ = self.disconnect().await;
            match self.connect_as(None, None, LOSS_PROBE_TIMEOUT).await {
                Ok(()) => continue,
                Err(e) if e.is_retryable() => {
                    debug!(host = %self.conn_info.host, "reconnect probe failed; DUT is down");
                    return Ok(());
                }
                Err(ExecError::Authentication { .. }) => {
                    // The transport answered, so the host is still up.
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ExecError::Connection {
            host: self.conn_info.host.clone(),
            detail: format!("still reachable after {timeout_duration:?}"),
        })
    }

    async fn reboot(&self, wait_for_connection: bool) -> Result<(), ExecError> {
        info!(host = %self.conn_info.host, "rebooting DUT");
        match self.run("reboot", REBOOT_COMMAND_TIMEOUT).await {
            Ok(_) => {}
            // The session dying under the reboot command is expected.
            Err(e) if e.is_retryable() => {
                debug!(host = %self.conn_info.host, error = %e, "session dropped during reboot command");
            }
            Err(e) => return Err(e),
        }

        self.wait_for_connection_loss(LOSS_TIMEOUT).await?;

        if wait_for_connection {
            let bound = self
                .ctx
                .config()
                .reboot_timeout()
                .unwrap_or(DEFAULT_REBOOT_TIMEOUT);
            self.wait_for_connection(bound).await?;
        }
        Ok(())
    }

    async fn resolve_ip_address(&self) -> Option<String> {
        let resolved = match self.resolved_or_resolve().await {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!(host = %self.conn_info.host, error = %e, "address resolution failed");
                return None;
            }
        };

        if resolved.hostname.parse::<IpAddr>().is_ok() {
            return Some(resolved.hostname);
        }

        match &resolved.proxy {
            None => {
                let addrs = tokio::net::lookup_host((resolved.hostname.as_str(), resolved.port))
                    .await
                    .ok()?;
                addrs
                    .filter(|addr| addr.is_ipv4())
                    .map(|addr| addr.ip().to_string())
                    .next()
            }
            Some(proxy) => {
                // The DUT's name may only resolve on the bastion's side of
                // the network; ask the bastion.
                let output = match self
                    .run_on_jump(proxy, &format!("nslookup {}", resolved.hostname))
                    .await
                {
                    Ok(output) => output,
                    Err(e) => {
                        debug!(host = %resolved.hostname, error = %e, "lookup on jump host failed");
                        return None;
                    }
                };
                parse_nslookup(&output.combined_output())
            }
        }
    }
}

/// Last resolved address in nslookup output; the first `Address:` line is
/// the DNS server itself
fn parse_nslookup(text: &str) -> Option<String> {
    let re = Regex::new(r"(?m)^Address:\s+(\d+\.\d+\.\d+\.\d+)\s*$").ok()?;
    re.captures_iter(text)
        .last()
        .map(|caps| caps[1].to_string())
}

/// Builder for `SshExecutor`
pub struct SshExecutorBuilder {
    ctx: Arc<RunContext>,
    conn_info: ConnectionInfo,
    key_source: KeySource,
}

impl SshExecutorBuilder {
    /// Create builder with required fields
    pub fn new(ctx: Arc<RunContext>, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            ctx,
            conn_info: ConnectionInfo::new(host, user),
            key_source: KeySource::Agent,
        }
    }

    /// Set SSH key path
    #[must_use]
    pub fn with_key_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.key_source = KeySource::Path(path.into());
        self
    }

    /// Use SSH agent
    #[must_use]
    pub fn with_agent(mut self) -> Self {
        self.key_source = KeySource::Agent;
        self
    }

    /// Set key from environment variable (base64)
    #[must_use]
    pub fn with_env_key(mut self, var_name: impl Into<String>) -> Self {
        self.key_source = KeySource::Env(var_name.into());
        self
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.conn_info.port = port;
        self
    }

    /// Build the executor
    ///
    /// # Errors
    /// Returns `Key` if identity resolution fails
    pub fn build(self) -> Result<SshExecutor, ExecError> {
        SshExecutor::new(self.ctx, self.conn_info, &self.key_source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nslookup_takes_answer_not_server() {
        let text = "Server:\t\t10.0.0.1\nAddress:\t10.0.0.1#53\n\nName:\tdut2.lab.internal\nAddress: 192.168.50.12\n";
        assert_eq!(parse_nslookup(text), Some("192.168.50.12".to_string()));
    }

    #[test]
    fn test_parse_nslookup_no_answer() {
        assert_eq!(parse_nslookup("server can't find dut9: NXDOMAIN"), None);
    }

    #[test]
    fn test_connection_info_builder() {
        let info = ConnectionInfo::new("dut1", "root")
            .with_port(2222)
            .with_ssh_key("/keys/dut1");
        assert_eq!(info.host, "dut1");
        assert_eq!(info.port, 2222);
        assert_eq!(info.ssh_key.as_deref(), Some("/keys/dut1"));
    }

    #[tokio::test]
    async fn test_executor_starts_disconnected() {
        let ctx = Arc::new(RunContext::with_defaults());
        let executor = SshExecutorBuilder::new(ctx, "dut1", "root")
            .with_agent()
            .build()
            .unwrap();
        assert_eq!(executor.state().await, ConnectionState::Disconnected);
        assert!(executor.is_remote());
    }

    #[tokio::test]
    async fn test_run_without_connect_is_not_connected() {
        let ctx = Arc::new(RunContext::with_defaults());
        let executor = SshExecutorBuilder::new(ctx, "dut1", "root")
            .with_agent()
            .build()
            .unwrap();
        let result = executor.run("true", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ExecError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let ctx = Arc::new(RunContext::with_defaults());
        let executor = SshExecutorBuilder::new(ctx, "dut1", "root")
            .with_agent()
            .build()
            .unwrap();
        executor.disconnect().await.unwrap();
        executor.disconnect().await.unwrap();
        assert_eq!(executor.state().await, ConnectionState::Disconnected);
    }

    // Live-connection paths need a lab DUT behind them.
    #[tokio::test]
    #[ignore = "requires SSH server"]
    async fn test_connect_and_run() {}
}
