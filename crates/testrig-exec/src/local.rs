//! Local command execution using `tokio::process`

use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error};

use testrig_core::RunContext;

use crate::error::ExecError;
use crate::output::Output;
use crate::traits::Executor;
use crate::transfer::{TransferDirection, TransferOptions, rsync_command};

/// Executes commands on the controller itself
///
/// Always ready; connection lifecycle calls are logged no-ops.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    ctx: Arc<RunContext>,
}

impl LocalExecutor {
    /// Create a local executor bound to a run context
    #[must_use]
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }
}

/// Run `command` through the configured controller shell
///
/// Shared by the local executor and by remote rsync invocations, which
/// always start on the controller side.
pub(crate) async fn run_shell(
    ctx: &RunContext,
    command: &str,
    timeout_duration: Duration,
) -> Result<Output, ExecError> {
    let shell = ctx.config().shell_path.clone();
    let id = ctx.next_command_id();
    let start = Instant::now();

    debug!(id, command = %command, shell = %shell, "executing local command");

    let child = Command::new(&shell)
        .arg("-c")
        .arg(command)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExecError::Spawn(e.to_string()))?;

    match timeout(timeout_duration, child.wait_with_output()).await {
        Ok(Ok(raw)) => {
            let output = Output::from_raw(
                &raw.stdout,
                &raw.stderr,
                raw.status.code().unwrap_or(-1),
                start.elapsed(),
            );
            debug!(
                id,
                exit_code = output.exit_code,
                duration = ?output.duration,
                "command completed"
            );
            Ok(output)
        }
        Ok(Err(e)) => Err(ExecError::Io(e.to_string())),
        Err(_) => {
            // The dropped future takes the child with it; kill_on_drop
            // reaps the process.
            error!(id, command = %command, timeout = ?timeout_duration, "local command timed out");
            Err(ExecError::Timeout {
                operation: format!("command `{command}`"),
                timeout: timeout_duration,
            })
        }
    }
}

/// Recursive controller-side copy; files and directories both allowed
fn copy_path<'a>(
    src: &'a Path,
    dst: &'a Path,
) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let metadata = tokio::fs::metadata(src).await?;
        if metadata.is_dir() {
            tokio::fs::create_dir_all(dst).await?;
            let mut entries = tokio::fs::read_dir(src).await?;
            while let Some(entry) = entries.next_entry().await? {
                copy_path(&entry.path(), &dst.join(entry.file_name())).await?;
            }
        } else {
            if let Some(parent) = dst.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(src, dst).await?;
        }
        Ok(())
    })
}

impl LocalExecutor {
    async fn copy_local(&self, src: &str, dst: &str, timeout_duration: Duration) -> Result<(), ExecError> {
        debug!(src, dst, "local copy");
        match timeout(timeout_duration, copy_path(Path::new(src), Path::new(dst))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ExecError::TransferFailed {
                spec: format!("{src} -> {dst}"),
                detail: e.to_string(),
            }),
            Err(_) => Err(ExecError::Timeout {
                operation: format!("copy {src} -> {dst}"),
                timeout: timeout_duration,
            }),
        }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn run(&self, command: &str, timeout_duration: Duration) -> Result<Output, ExecError> {
        run_shell(&self.ctx, command, timeout_duration).await
    }

    async fn copy_to(&self, src: &str, dst: &str, timeout_duration: Duration) -> Result<(), ExecError> {
        self.copy_local(src, dst, timeout_duration).await
    }

    async fn copy_from(&self, src: &str, dst: &str, timeout_duration: Duration) -> Result<(), ExecError> {
        self.copy_local(src, dst, timeout_duration).await
    }

    async fn sync(
        &self,
        src: &str,
        dst: &str,
        _direction: TransferDirection,
        options: &TransferOptions,
        timeout_duration: Duration,
    ) -> Result<(), ExecError> {
        let command = rsync_command(src, dst, TransferDirection::ToDut, options, None);
        let output = run_shell(&self.ctx, &command, timeout_duration).await?;
        if output.success() {
            Ok(())
        } else {
            Err(ExecError::TransferFailed {
                spec: format!("{src} -> {dst}"),
                detail: output.combined_output(),
            })
        }
    }

    fn is_remote(&self) -> bool {
        false
    }

    async fn connect(&self, _timeout: Duration) -> Result<(), ExecError> {
        debug!("local executor is always connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ExecError> {
        debug!("local executor has no session to close");
        Ok(())
    }

    async fn is_active(&self) -> bool {
        true
    }

    async fn wait_for_connection(&self, _timeout: Duration) -> Result<(), ExecError> {
        Ok(())
    }

    async fn wait_for_connection_loss(&self, _timeout: Duration) -> Result<(), ExecError> {
        Err(ExecError::Unsupported(
            "the controller cannot lose its own connection".to_string(),
        ))
    }

    async fn reboot(&self, _wait_for_connection: bool) -> Result<(), ExecError> {
        Err(ExecError::Unsupported(
            "rebooting the controller is not supported".to_string(),
        ))
    }

    async fn resolve_ip_address(&self) -> Option<String> {
        Some("127.0.0.1".to_string())
    }
}
