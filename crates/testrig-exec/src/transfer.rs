//! Directory synchronization options and rsync invocation building

use std::path::Path;

/// Direction of a controller/DUT transfer
///
/// Always explicit on the call, never inferred from paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Controller to DUT
    ToDut,
    /// DUT to controller
    FromDut,
}

/// Flags governing directory synchronization
///
/// Orthogonal, independently composable.
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Delete extraneous files from the destination
    pub delete: bool,
    /// Copy symlinks as symlinks
    pub preserve_symlinks: bool,
    /// Compare by checksum instead of size and mtime
    pub verify_checksum: bool,
    /// Patterns excluded from the transfer
    pub exclude: Vec<String>,
}

impl TransferOptions {
    /// Options with every flag off
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete extraneous destination files
    #[must_use]
    pub fn with_delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Copy symlinks as symlinks
    #[must_use]
    pub fn with_symlinks(mut self) -> Self {
        self.preserve_symlinks = true;
        self
    }

    /// Compare by checksum
    #[must_use]
    pub fn with_checksum(mut self) -> Self {
        self.verify_checksum = true;
        self
    }

    /// Exclude a pattern
    #[must_use]
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    /// rsync flags for these options
    #[must_use]
    pub fn to_rsync_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.delete {
            flags.push("--delete".to_string());
        }
        if self.preserve_symlinks {
            flags.push("--links".to_string());
        }
        if self.verify_checksum {
            flags.push("--checksum".to_string());
        }
        for pattern in &self.exclude {
            flags.push(format!("--exclude {pattern}"));
        }
        flags
    }
}

/// Remote endpoint of an rsync-over-ssh invocation
#[derive(Debug)]
pub(crate) struct RemoteSpec<'a> {
    pub user: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub identity_file: Option<&'a Path>,
}

/// Build the full rsync command line for one sync call
///
/// With a `remote` spec, the transport goes over ssh with host-key
/// checking disabled (the lab network re-images hosts constantly) and the
/// remote side is selected by `direction`. Without one, both endpoints are
/// controller paths.
pub(crate) fn rsync_command(
    src: &str,
    dst: &str,
    direction: TransferDirection,
    options: &TransferOptions,
    remote: Option<&RemoteSpec<'_>>,
) -> String {
    let flags = options.to_rsync_flags().join(" ");

    match remote {
        None => format!("rsync -r {src} {dst} {flags}"),
        Some(spec) => {
            let identity = spec
                .identity_file
                .map(|path| format!(" -i {}", path.display()))
                .unwrap_or_default();
            let transport = format!(
                "ssh -p {}{identity} -o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no",
                spec.port
            );
            let endpoints = match direction {
                TransferDirection::FromDut => {
                    format!("{}@{}:{src} {dst}", spec.user, spec.host)
                }
                TransferDirection::ToDut => {
                    format!("{src} {}@{}:{dst}", spec.user, spec.host)
                }
            };
            format!("rsync -r -e \"{transport}\" {endpoints} {flags}")
        }
    }
}
