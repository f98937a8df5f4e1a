use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::backend::{Backend, BackendResolver};
use crate::config::Config;
use crate::domain::MountRequest;
use crate::error::AppError;
use crate::mount::registry::{MountEntry, MountRegistry, Rejected};
use crate::mount::supervisor::{self, ExitState};
use crate::mount::{init, mountpoint, unmount};
use crate::utils::validation::validate_request;

/// The mount lifecycle: admission, backend preparation, launch, registration
/// and teardown. Cheap to share behind an `Arc`.
pub struct MountService {
    config: Arc<Config>,
    registry: Arc<MountRegistry>,
    resolver: BackendResolver,
    // startup manifest loader, still running or finished
    init: Mutex<Option<JoinHandle<usize>>>,
}

impl MountService {
    pub fn new(config: Arc<Config>) -> Result<Self, AppError> {
        Ok(MountService {
            resolver: BackendResolver::new(config.clone())?,
            registry: Arc::new(MountRegistry::new()),
            init: Mutex::new(None),
            config,
        })
    }

    /// Replays the startup manifest in the background.
    pub async fn start_init_mounts(self: &Arc<Self>, manifest: PathBuf) {
        let service = self.clone();
        let handle = tokio::spawn(async move { init::init_mounts(&service, &manifest).await });
        *self.init.lock().await = Some(handle);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &MountRegistry {
        &self.registry
    }

    #[instrument(name = "create_mount", skip_all, fields(path = %req.path, kind = %req.kind))]
    pub async fn create_mount(&self, req: MountRequest) -> Result<(), AppError> {
        validate_request(&req)?;
        self.registry.reserve(&req.path).await?;

        info!("Mount {} ...", req.path);
        let result = self.mount_reserved(&req).await;
        // no-op when the entry got registered
        self.registry.release(&req.path).await;

        match &result {
            Ok(()) => info!("Mount {} ... successful", req.path),
            Err(e) => info!("Mount {} ... failed. Error: {e}", req.path),
        }
        result
    }

    async fn mount_reserved(&self, req: &MountRequest) -> Result<(), AppError> {
        let backend = self.resolver.resolve(&req.kind)?;
        backend.validate(req)?;

        let mount_point = self.config.mount_point(&req.path);
        let created = mountpoint::prepare(&mount_point, self.config.uid, self.config.gid).await?;

        let result = self.launch(backend, req, &mount_point).await;
        // an unusable mount stays registered and keeps its directory
        if created && result.as_ref().is_err_and(|e| !matches!(e, AppError::Unusable { .. })) {
            mountpoint::discard(&self.config.mount_root, &mount_point).await;
        }
        result
    }

    async fn launch(&self, backend: &dyn Backend, req: &MountRequest, mount_point: &Path) -> Result<(), AppError> {
        let launch = backend.prepare(req, mount_point).await?;
        let running = supervisor::launch(&launch.argv, self.config.grace_window, &req.path).await?;
        info!("Mount process of {} running (pid {:?})", req.path, running.pid());

        let id = Uuid::new_v4();
        let registry = self.registry.clone();
        let path = req.path.clone();
        let (process, _watcher) = running.supervise(launch.secrets, move |state| async move {
            match state {
                ExitState::Exited(Some(status)) => info!("Mount process of {path} exited with {status}"),
                _ => info!("Mount process of {path} exited"),
            }
            registry.reap(&path, id).await;
        });

        let entry = MountEntry::new(id, req.clone(), mount_point.to_path_buf(), process);
        if let Err(rejected) = self.registry.register(entry).await {
            let Rejected { reason, mut entry } = *rejected;
            if let Some(mut process) = entry.take_process() {
                let state = process.terminate(self.config.terminate_timeout).await;
                warn!("Stopped rejected mount process of {}: {state:?}", req.path);
            }
            return Err(reason);
        }

        if let Err(e) = mountpoint::ensure_listable(mount_point).await {
            error!("Mount point {} is not usable: {e}", mount_point.display());
            return Err(AppError::Unusable {
                path: req.path.clone(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    /// Current mounts keyed by path. External mounts come back without config.
    pub async fn list_mounts(&self) -> BTreeMap<String, MountRequest> {
        self.registry
            .snapshot()
            .await
            .into_iter()
            .map(|(req, _)| (req.path.clone(), req.redacted()))
            .collect()
    }

    #[instrument(name = "remove_mount", skip(self))]
    pub async fn remove_mount(&self, path: &str, force: bool) -> Result<(), AppError> {
        let mut ticket = self.registry.begin_unmount(path).await?;
        info!("Unmount {path} ...");

        match unmount::unmount(&self.config, &mut ticket, force).await {
            Ok(()) => {
                self.registry.unregister(&ticket.path, ticket.id).await;
                info!("Unmount {path} ... successful");
                Ok(())
            }
            Err(e) => {
                self.registry.abort_unmount(ticket).await;
                warn!("Unmount {path} ... failed: {e}");
                Err(e)
            }
        }
    }

    /// Force-unmounts everything; used when the service stops. A running
    /// manifest loader is waited for first so none of its mounts outlive us.
    pub async fn shutdown(&self) {
        let init = self.init.lock().await.take();
        if let Some(init) = init {
            match init.await {
                Ok(mounted) => info!("Init mounts finished before shutdown ({mounted} mounted)"),
                Err(e) => warn!("Init mounts task failed: {e}"),
            }
        }
        for path in self.registry.paths().await {
            if let Err(e) = self.remove_mount(&path, true).await {
                error!("Failed to unmount {path} on shutdown: {e}");
            }
        }
    }
}
