//! Pluggable storage backends.
//!
//! A backend turns a [`MountRequest`] into the argv of a long-running mount
//! process. `validate` is cheap and runs before anything touches the disk;
//! `prepare` may talk to the network and is where handshakes and reachability
//! probes happen.

pub mod nfs;
pub mod rclone;
pub mod secret;
pub mod uftp;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempPath;

use crate::config::Config;
use crate::domain::{BackendKind, MountRequest};
use crate::error::AppError;

pub use nfs::NfsBackend;
pub use rclone::RcloneBackend;
pub use uftp::UftpBackend;

/// Everything needed to start the mount process.
pub struct Launch {
    pub argv: Vec<String>,
    /// Materialized config the process reads; deleted once the mount ends.
    pub secrets: Option<TempPath>,
}

impl Launch {
    pub fn new(argv: Vec<String>) -> Self {
        Launch { argv, secrets: None }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Checks required fields and policy. Never launches anything.
    fn validate(&self, req: &MountRequest) -> Result<(), AppError>;

    /// Performs the network-facing preparation and assembles the launch command.
    async fn prepare(&self, req: &MountRequest, mount_point: &Path) -> Result<Launch, AppError>;
}

pub struct BackendResolver {
    nfs: NfsBackend,
    uftp: UftpBackend,
    rclone: RcloneBackend,
}

impl BackendResolver {
    pub fn new(config: Arc<Config>) -> Result<Self, AppError> {
        Ok(BackendResolver {
            nfs: NfsBackend::new(config.clone()),
            uftp: UftpBackend::new(config.clone())?,
            rclone: RcloneBackend::new(config),
        })
    }

    pub fn resolve(&self, kind: &str) -> Result<&dyn Backend, AppError> {
        let backend: &dyn Backend = match kind.parse::<BackendKind>()? {
            BackendKind::NetworkShare => &self.nfs,
            BackendKind::TokenRemote => &self.uftp,
            BackendKind::GenericRemote => &self.rclone,
        };
        Ok(backend)
    }
}

pub(crate) fn require<'a>(req: &'a MountRequest, key: &str) -> Result<&'a str, AppError> {
    req.config(key)
        .ok_or_else(|| AppError::ConfigRejected(format!("{key} required")))
}
