use std::io;
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid, chown};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::AppError;

/// Creates the mount point owned by `uid:gid` if absent and rejects it if it has entries.
/// Missing parents are created with the same owner.
/// Returns whether the directory was created by this call.
pub async fn prepare(mount_point: &Path, uid: u32, gid: u32) -> Result<bool, AppError> {
    let created = match fs::metadata(mount_point).await {
        Ok(meta) if meta.is_dir() => false,
        Ok(_) => {
            return Err(AppError::ConfigRejected(format!(
                "{} exists and is not a directory.",
                mount_point.display()
            )));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let missing = missing_dirs(mount_point).await;
            fs::create_dir_all(mount_point).await?;
            // outermost first
            for dir in missing.iter().rev() {
                chown(dir.as_path(), Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
                    .map_err(io::Error::from)?;
            }
            debug!("Created mount point {} ({uid}:{gid})", mount_point.display());
            true
        }
        Err(e) => return Err(e.into()),
    };

    if !is_empty(mount_point).await? {
        return Err(AppError::ConfigRejected(format!(
            "Directory {} is not empty.",
            mount_point.display()
        )));
    }
    Ok(created)
}

/// `path` and those of its ancestors that do not exist yet, innermost first.
async fn missing_dirs(path: &Path) -> Vec<PathBuf> {
    let mut missing = Vec::new();
    for dir in path.ancestors() {
        if dir.as_os_str().is_empty() || fs::try_exists(dir).await.unwrap_or(true) {
            break;
        }
        missing.push(dir.to_path_buf());
    }
    missing
}

async fn is_empty(dir: &Path) -> io::Result<bool> {
    let mut entries = fs::read_dir(dir).await?;
    Ok(entries.next_entry().await?.is_none())
}

/// The final usability check: the mount point must be listable.
pub async fn ensure_listable(mount_point: &Path) -> io::Result<()> {
    let mut entries = fs::read_dir(mount_point).await?;
    entries.next_entry().await?;
    Ok(())
}

/// Removes an (empty) mount point and then every parent below `root` that
/// is left empty. A missing directory is fine.
pub async fn remove(root: &Path, mount_point: &Path) -> io::Result<()> {
    match fs::remove_dir(mount_point).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        other => other?,
    }
    for dir in mount_point.ancestors().skip(1) {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        // stops at the first parent still holding other mounts
        if fs::remove_dir(dir).await.is_err() {
            break;
        }
        debug!("Removed empty directory {}", dir.display());
    }
    Ok(())
}

/// Cleanup after a failed create; errors are only logged.
pub async fn discard(root: &Path, mount_point: &Path) {
    if let Err(e) = remove(root, mount_point).await {
        warn!("Failed to remove mount point {}: {e}", mount_point.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{getgid, getuid};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_prepare_creates_missing_directory() {
        let root = tempdir().unwrap();
        let mp = root.path().join("team/data1");
        let created = prepare(&mp, getuid().as_raw(), getgid().as_raw()).await.unwrap();
        assert!(created);
        assert!(mp.is_dir());

        // a second prepare of the same, still empty, directory is fine
        assert!(!prepare(&mp, getuid().as_raw(), getgid().as_raw()).await.unwrap());
    }

    #[tokio::test]
    async fn test_prepare_rejects_non_empty_directory() {
        let root = tempdir().unwrap();
        let mp = root.path().join("data1");
        std::fs::create_dir(&mp).unwrap();
        std::fs::write(mp.join("leftover"), b"x").unwrap();

        let res = prepare(&mp, getuid().as_raw(), getgid().as_raw()).await;
        assert!(matches!(res, Err(AppError::ConfigRejected(msg)) if msg.contains("not empty")));
    }

    #[tokio::test]
    async fn test_prepare_owns_created_parents() {
        use std::os::unix::fs::MetadataExt;

        let root = tempdir().unwrap();
        let (uid, gid) = (getuid().as_raw(), getgid().as_raw());
        assert!(prepare(&root.path().join("team/data1"), uid, gid).await.unwrap());

        let missing = missing_dirs(&root.path().join("team/data2/deep")).await;
        assert_eq!(
            missing,
            vec![root.path().join("team/data2/deep"), root.path().join("team/data2")]
        );

        let team = std::fs::metadata(root.path().join("team")).unwrap();
        assert_eq!((team.uid(), team.gid()), (uid, gid));
    }

    #[tokio::test]
    async fn test_remove_tolerates_missing_directory() {
        let root = tempdir().unwrap();
        let mp = root.path().join("gone");
        assert!(remove(root.path(), &mp).await.is_ok());
        std::fs::create_dir(&mp).unwrap();
        ensure_listable(&mp).await.unwrap();
        remove(root.path(), &mp).await.unwrap();
        assert!(!mp.exists());
        assert!(root.path().is_dir());
    }

    #[tokio::test]
    async fn test_remove_prunes_empty_parents_only() {
        let root = tempdir().unwrap();
        let first = root.path().join("team/data1");
        let second = root.path().join("team/data2");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();

        remove(root.path(), &first).await.unwrap();
        assert!(root.path().join("team").is_dir());

        remove(root.path(), &second).await.unwrap();
        assert!(!root.path().join("team").exists());
        assert!(root.path().is_dir());
    }
}
