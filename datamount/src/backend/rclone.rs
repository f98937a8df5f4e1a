use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::backend::secret::{self, SecretArtifact};
use crate::backend::{Backend, Launch, require};
use crate::config::Config;
use crate::domain::{BackendKind, MountRequest};
use crate::error::AppError;

/// Any remote rclone can reach, mounted with `rclone mount`.
pub struct RcloneBackend {
    config: Arc<Config>,
}

impl RcloneBackend {
    pub fn new(config: Arc<Config>) -> Self {
        RcloneBackend { config }
    }

    /// Name of the config section; falls back to the remote type.
    pub fn template<'a>(&self, req: &'a MountRequest) -> &'a str {
        req.options
            .template
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| req.config("type"))
            .unwrap_or("remote")
    }

    fn remote(&self, req: &MountRequest) -> String {
        format!(
            "{}:{}",
            self.template(req),
            req.config("remotepath").unwrap_or_default()
        )
    }

    fn readonly(req: &MountRequest) -> bool {
        req.options.readonly || req.config("readonly") == Some("true")
    }

    pub fn build_command(
        &self,
        req: &MountRequest,
        config_path: &Path,
        mount_point: &Path,
    ) -> Vec<String> {
        let mut cmd = vec![
            self.config.rclone_bin.display().to_string(),
            "mount".to_string(),
            "--config".to_string(),
            config_path.display().to_string(),
            self.remote(req),
            mount_point.display().to_string(),
            "--vfs-cache-max-size=10G".to_string(),
            "--vfs-read-chunk-size=64M".to_string(),
            "--vfs-cache-mode=writes".to_string(),
            "--allow-other".to_string(),
            format!("--uid={}", self.config.uid),
            format!("--gid={}", self.config.gid),
        ];
        cmd.extend(vendor_flags(req));
        if Self::readonly(req) {
            cmd.push("--read-only".to_string());
        }
        cmd
    }

    pub fn probe_command(&self, req: &MountRequest, config_path: &Path) -> Vec<String> {
        let mut cmd = vec![
            self.config.rclone_bin.display().to_string(),
            "lsd".to_string(),
            "--config".to_string(),
            config_path.display().to_string(),
            self.remote(req),
        ];
        cmd.extend(vendor_flags(req));
        cmd
    }

    /// Lists the remote root with the materialized config.
    async fn probe(&self, req: &MountRequest, artifact: &SecretArtifact) -> Result<(), AppError> {
        info!("Check rclone config ...");
        let cmd = self.probe_command(req, artifact.path());
        let output = Command::new(&cmd[0])
            .args(&cmd[1..])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::BackendUnreachable {
                message: format!("Config not working. Failed to run {}", cmd[0]),
                output: e.to_string(),
                config: None,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            info!("Check rclone config ... failed: {stderr}");
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| output.status.to_string());
            return Err(AppError::BackendUnreachable {
                message: format!("Config not working. Exit Code {code}"),
                output: stderr,
                config: (!req.is_external()).then(|| artifact.content.clone()),
            });
        }
        info!("Check rclone config ... successful");
        Ok(())
    }
}

/// Per-vendor tuning, matched exactly on type, vendor and url suffix.
pub fn vendor_flags(req: &MountRequest) -> Vec<String> {
    let url = req.config("url").unwrap_or_default();
    if req.config("type") == Some("webdav")
        && req.config("vendor") == Some("nextcloud")
        && (url.ends_with("/webdav") || url.ends_with("/webdav/"))
    {
        return vec!["--webdav-nextcloud-chunk-size=0".to_string()];
    }
    Vec::new()
}

#[async_trait]
impl Backend for RcloneBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::GenericRemote
    }

    fn validate(&self, req: &MountRequest) -> Result<(), AppError> {
        if !self.config.rclone_enabled {
            return Err(AppError::ConfigRejected("rclone disabled".to_string()));
        }
        require(req, "type")?;
        require(req, "remotepath")?;
        Ok(())
    }

    async fn prepare(&self, req: &MountRequest, mount_point: &Path) -> Result<Launch, AppError> {
        let artifact =
            secret::materialize(&self.config.rclone_bin, self.template(req), &req.options.config)
                .await?;
        self.probe(req, &artifact).await?;
        let argv = self.build_command(req, artifact.path(), mount_point);
        Ok(Launch {
            argv,
            secrets: Some(artifact.path),
        })
    }
}
