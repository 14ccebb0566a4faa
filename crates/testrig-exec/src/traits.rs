//! The polymorphic executor contract

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::output::Output;
use crate::transfer::{TransferDirection, TransferOptions};

/// One capability surface for running commands and moving files on the
/// controller or on a remote DUT
///
/// A single executor serializes its own session usage; concurrent
/// operations against different DUTs use independent executor instances.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `command` through a shell, bounded by `timeout`
    ///
    /// Nonzero exit is a normal, non-exceptional result; callers inspect
    /// the returned [`Output`] themselves.
    ///
    /// # Errors
    /// `Timeout` when execution exceeds `timeout`; transport failures as
    /// `Connection`.
    async fn run(&self, command: &str, timeout: Duration) -> Result<Output, ExecError>;

    /// Run `command` and treat nonzero exit as an error
    ///
    /// # Errors
    /// `CommandFailed` carrying the full output on nonzero exit, plus
    /// everything `run` can raise.
    async fn run_expect_success(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<Output, ExecError> {
        let output = self.run(command, timeout).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(ExecError::CommandFailed {
                command: command.to_string(),
                output,
            })
        }
    }

    /// Copy a single item from the controller to the DUT
    async fn copy_to(&self, src: &str, dst: &str, timeout: Duration) -> Result<(), ExecError>;

    /// Copy a single item from the DUT to the controller
    async fn copy_from(&self, src: &str, dst: &str, timeout: Duration) -> Result<(), ExecError>;

    /// Synchronize a directory across the controller/DUT boundary
    ///
    /// One rsync invocation per call; re-running with identical inputs and
    /// no intervening changes produces no additional side effects.
    async fn sync(
        &self,
        src: &str,
        dst: &str,
        direction: TransferDirection,
        options: &TransferOptions,
        timeout: Duration,
    ) -> Result<(), ExecError>;

    /// True only for SSH-backed executors
    fn is_remote(&self) -> bool;

    /// Establish the session, bounded by `timeout`
    async fn connect(&self, timeout: Duration) -> Result<(), ExecError>;

    /// Close the session; disconnecting twice is not an error but is
    /// reported
    async fn disconnect(&self) -> Result<(), ExecError>;

    /// Cheap liveness probe; false on any failure
    ///
    /// Not a substitute for `connect`.
    async fn is_active(&self) -> bool;

    /// Poll `connect` until it succeeds or `timeout` elapses
    ///
    /// # Errors
    /// Authentication failures abort immediately; `Connection` after the
    /// deadline.
    async fn wait_for_connection(&self, timeout: Duration) -> Result<(), ExecError>;

    /// Poll until the DUT actually stops accepting connections
    ///
    /// # Errors
    /// `Connection` if the DUT remains reachable for the whole window.
    async fn wait_for_connection_loss(&self, timeout: Duration) -> Result<(), ExecError>;

    /// Reboot the DUT, wait for it to go down, and optionally wait for it
    /// to come back
    async fn reboot(&self, wait_for_connection: bool) -> Result<(), ExecError>;

    /// Best-effort resolution of the literal IP address behind the
    /// configured hostname; `None` on any failure
    async fn resolve_ip_address(&self) -> Option<String>;
}
