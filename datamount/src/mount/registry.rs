use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::MountRequest;
use crate::error::AppError;
use crate::mount::supervisor::ProcessHandle;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MountState {
    Active,
    Unmounting,
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountState::Active => f.write_str("active"),
            MountState::Unmounting => f.write_str("unmounting"),
        }
    }
}

#[derive(Debug)]
pub struct MountEntry {
    /// Distinguishes successive mounts of the same path.
    pub id: Uuid,
    pub request: MountRequest,
    pub mount_point: PathBuf,
    pub state: MountState,
    // `None` only while an unmount holds it.
    process: Option<ProcessHandle>,
}

impl MountEntry {
    pub fn new(id: Uuid, request: MountRequest, mount_point: PathBuf, process: ProcessHandle) -> Self {
        MountEntry {
            id,
            request,
            mount_point,
            state: MountState::Active,
            process: Some(process),
        }
    }

    pub fn path(&self) -> &str {
        &self.request.path
    }

    pub fn take_process(&mut self) -> Option<ProcessHandle> {
        self.process.take()
    }
}

/// Returned when `register` refuses an entry, so its process can be cleaned up.
#[derive(Debug)]
pub struct Rejected {
    pub reason: AppError,
    pub entry: MountEntry,
}

/// Everything an unmount needs, taken out of the registry for its duration.
#[derive(Debug)]
pub struct UnmountTicket {
    pub path: String,
    pub id: Uuid,
    pub mount_point: PathBuf,
    pub process: ProcessHandle,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, MountEntry>,
    // paths admitted but still being mounted
    reserved: HashSet<String>,
}

/// All mounts of this instance, behind a single lock.
///
/// No `.await` happens while the lock is held, so each method is atomic with
/// respect to every other.
#[derive(Default)]
pub struct MountRegistry {
    inner: Mutex<Inner>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admission: claims `path` for an in-flight create.
    pub async fn reserve(&self, path: &str) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        if inner.entries.contains_key(path) || inner.reserved.contains(path) {
            return Err(AppError::AlreadyMounted(path.to_string()));
        }
        inner.reserved.insert(path.to_string());
        Ok(())
    }

    /// Drops a reservation; no-op once the entry is registered.
    pub async fn release(&self, path: &str) {
        self.inner.lock().await.reserved.remove(path);
    }

    /// Commits a mount. Refuses duplicates and processes that already exited.
    pub async fn register(&self, entry: MountEntry) -> Result<(), Box<Rejected>> {
        let mut inner = self.inner.lock().await;
        let path = entry.path().to_string();
        if inner.entries.contains_key(&path) {
            return Err(Box::new(Rejected {
                reason: AppError::AlreadyMounted(path),
                entry,
            }));
        }
        // The watcher publishes the exit before it reaps, so checking here under
        // the lock means a process cannot die unnoticed between launch and commit.
        if entry.process.as_ref().is_none_or(ProcessHandle::has_exited) {
            inner.reserved.remove(&path);
            return Err(Box::new(Rejected {
                reason: AppError::LaunchFailed {
                    message: "Mount process exited before it was registered".to_string(),
                    output: String::new(),
                },
                entry,
            }));
        }
        inner.reserved.remove(&path);
        debug!("Registered {path} ({})", entry.id);
        inner.entries.insert(path, entry);
        Ok(())
    }

    /// Natural-exit removal. Only removes the mount `id` and leaves entries
    /// that an unmount is already working on.
    pub async fn reap(&self, path: &str, id: Uuid) -> bool {
        let mut inner = self.inner.lock().await;
        let reapable = inner
            .entries
            .get(path)
            .is_some_and(|e| e.id == id && e.state == MountState::Active);
        if reapable {
            inner.entries.remove(path);
            info!("Removed {path}: mount process exited");
        }
        reapable
    }

    /// Moves the entry to `Unmounting` and hands its process handle to the caller.
    pub async fn begin_unmount(&self, path: &str) -> Result<UnmountTicket, AppError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .entries
            .get_mut(path)
            .ok_or_else(|| AppError::NotFound(path.to_string()))?;
        if entry.state == MountState::Unmounting {
            return Err(AppError::UnmountInProgress(path.to_string()));
        }
        let process = entry
            .process
            .take()
            .ok_or_else(|| AppError::UnmountInProgress(path.to_string()))?;
        entry.state = MountState::Unmounting;
        Ok(UnmountTicket {
            path: path.to_string(),
            id: entry.id,
            mount_point: entry.mount_point.clone(),
            process,
        })
    }

    /// A failed, non-forced unmount gives the handle back. If the process died
    /// in the meantime the entry goes away instead.
    pub async fn abort_unmount(&self, ticket: UnmountTicket) {
        let mut inner = self.inner.lock().await;
        let owned = inner
            .entries
            .get(&ticket.path)
            .is_some_and(|e| e.id == ticket.id);
        if !owned {
            return;
        }
        if ticket.process.has_exited() {
            inner.entries.remove(&ticket.path);
            info!("Removed {}: mount process exited during unmount", ticket.path);
            return;
        }
        if let Some(entry) = inner.entries.get_mut(&ticket.path) {
            entry.process = Some(ticket.process);
            entry.state = MountState::Active;
        }
    }

    /// Removes mount `id` at `path`. Idempotent: absent or replaced entries are left alone.
    pub async fn unregister(&self, path: &str, id: Uuid) {
        let mut inner = self.inner.lock().await;
        if inner.entries.get(path).is_some_and(|e| e.id == id) {
            inner.entries.remove(path);
        }
    }

    /// Point-in-time copy of all registered requests.
    pub async fn snapshot(&self) -> Vec<(MountRequest, MountState)> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .values()
            .map(|e| (e.request.clone(), e.state))
            .collect()
    }

    pub async fn paths(&self) -> Vec<String> {
        self.inner.lock().await.entries.keys().cloned().collect()
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.inner.lock().await.entries.contains_key(path)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
