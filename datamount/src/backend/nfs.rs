use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ipnetwork::IpNetwork;

use crate::backend::{Backend, Launch, require};
use crate::config::Config;
use crate::domain::{BackendKind, MountRequest};
use crate::error::AppError;

// Mounts, then stays in the foreground until the kernel mount disappears.
// $1 = options, $2 = source, $3 = mount point.
const NFS_SCRIPT: &str = r#"mount -t nfs -o "$1" "$2" "$3" && while grep -qs "$3 " /proc/mounts; do sleep 1; done"#;

pub struct NfsBackend {
    config: Arc<Config>,
}

impl NfsBackend {
    pub fn new(config: Arc<Config>) -> Self {
        NfsBackend { config }
    }

    pub fn build_command(&self, req: &MountRequest, mount_point: &Path) -> Vec<String> {
        let server = req.config("server").unwrap_or_default();
        let remotepath = req.config("remotepath").unwrap_or_default();

        let mut options = vec!["vers=4"];
        if req.options.readonly {
            options.push("ro");
        }

        vec![
            "sh".to_string(),
            "-c".to_string(),
            NFS_SCRIPT.to_string(),
            "sh".to_string(),
            options.join(","),
            format!("{server}:{remotepath}"),
            mount_point.display().to_string(),
        ]
    }
}

/// First blocked range containing `ip`, if any.
pub fn blocked_by(ip: IpAddr, blocked: &[IpNetwork]) -> Option<&IpNetwork> {
    blocked.iter().find(|network| network.contains(ip))
}

#[async_trait]
impl Backend for NfsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NetworkShare
    }

    fn validate(&self, req: &MountRequest) -> Result<(), AppError> {
        if !self.config.nfs_enabled {
            return Err(AppError::ConfigRejected("nfs disabled".to_string()));
        }
        let server = require(req, "server")?;
        require(req, "remotepath")?;

        let ip: IpAddr = server.parse().map_err(|_| {
            AppError::ConfigRejected(format!("Server {server} is not an IP address"))
        })?;
        if let Some(network) = blocked_by(ip, &self.config.nfs_blocked_networks) {
            tracing::warn!("NFS server {server} rejected, inside blocked range {network}");
            return Err(AppError::ConfigRejected(format!("Server {server} forbidden")));
        }
        Ok(())
    }

    async fn prepare(&self, req: &MountRequest, mount_point: &Path) -> Result<Launch, AppError> {
        Ok(Launch::new(self.build_command(req, mount_point)))
    }
}
