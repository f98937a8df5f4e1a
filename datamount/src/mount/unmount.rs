use std::path::Path;
use std::process::Output;

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::mount::mountpoint;
use crate::mount::registry::UnmountTicket;

struct UmountResult {
    success: bool,
    output: String,
}

impl From<Output> for UmountResult {
    fn from(out: Output) -> Self {
        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        let output = if stderr.is_empty() {
            String::from_utf8_lossy(&out.stdout).trim().to_string()
        } else {
            stderr
        };
        UmountResult {
            success: out.status.success(),
            output: if output.is_empty() && !out.status.success() {
                format!("umount exited with {}", out.status)
            } else {
                output
            },
        }
    }
}

async fn umount(bin: &Path, mount_point: &Path, lazy: bool) -> UmountResult {
    let mut cmd = Command::new(bin);
    if lazy {
        cmd.arg("-l");
    }
    match cmd.arg(mount_point).kill_on_drop(true).output().await {
        Ok(out) => out.into(),
        Err(e) => UmountResult {
            success: false,
            output: format!("failed to run {}: {e}", bin.display()),
        },
    }
}

/// Unmounts, stops the mount process and removes the mount point.
///
/// Without `force` a failing `umount` aborts before anything else happens and
/// the caller keeps the mount. With `force` a lazy unmount is issued instead
/// and the teardown continues regardless of its result.
pub async fn unmount(config: &Config, ticket: &mut UnmountTicket, force: bool) -> Result<(), AppError> {
    let mount_point = ticket.mount_point.clone();

    let primary = umount(&config.umount_bin, &mount_point, false).await;
    if !primary.success {
        if !force {
            return Err(AppError::UnmountFailed {
                path: ticket.path.clone(),
                output: primary.output,
            });
        }
        warn!(
            "umount {} failed ({}), falling back to lazy unmount",
            mount_point.display(),
            primary.output
        );
        let lazy = umount(&config.umount_bin, &mount_point, true).await;
        if !lazy.success {
            warn!("Lazy unmount of {} failed: {}", mount_point.display(), lazy.output);
        }
    }

    let state = ticket.process.terminate(config.terminate_timeout).await;
    info!("Mount process of {} stopped: {state:?}", ticket.path);

    if let Err(e) = mountpoint::remove(&config.mount_root, &mount_point).await {
        warn!("Failed to remove mount point {}: {e}", mount_point.display());
    }
    Ok(())
}
