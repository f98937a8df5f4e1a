use std::io;
use std::path::Path;

use serde_json::Value;
use tracing::{error, info};

use crate::domain::MountRequest;
use crate::error::AppError;
use crate::mount::service::MountService;

/// Reads the startup manifest as raw entries. A missing file means no
/// pre-seeded mounts. Entries are decoded one by one by [`parse_entry`].
pub async fn read_manifest(path: &Path) -> Result<Option<Vec<Value>>, AppError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&content)?))
}

/// Decodes one manifest entry and marks it external.
pub fn parse_entry(entry: Value) -> Result<MountRequest, AppError> {
    let mut req: MountRequest = serde_json::from_value(entry)?;
    req.options.external = true;
    Ok(req)
}

fn entry_path(entry: &Value) -> &str {
    entry.get("path").and_then(Value::as_str).unwrap_or("<unnamed>")
}

/// Replays the manifest through the regular create pipeline, in order.
/// Failures are logged per entry and never stop the remaining ones.
/// Returns how many mounts were created.
pub async fn init_mounts(service: &MountService, manifest: &Path) -> usize {
    let entries = match read_manifest(manifest).await {
        Ok(Some(entries)) => entries,
        Ok(None) => {
            info!("No init mounts at {}", manifest.display());
            return 0;
        }
        Err(e) => {
            error!("Failed to read init mounts from {}: {e}", manifest.display());
            return 0;
        }
    };

    info!("Init mounts ...");
    let total = entries.len();
    let mut mounted = 0;
    for entry in entries {
        let path = entry_path(&entry).to_string();
        let result = match parse_entry(entry) {
            Ok(req) => service.create_mount(req).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => mounted += 1,
            Err(e) => error!("Mount {path} failed: {e}"),
        }
    }
    info!("Init mounts ... {mounted}/{total} mounted");
    mounted
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_manifest_is_not_an_error() {
        let dir = tempdir().unwrap();
        assert!(read_manifest(&dir.path().join("mounts.json")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_manifest_entries_are_marked_external() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("mounts.json");
        std::fs::write(
            &file,
            r#"[
                {"path": "a", "kind": "rclone", "options": {"config": {"type": "s3"}}},
                {"path": "b", "kind": "nfs"}
            ]"#,
        )
        .unwrap();

        let entries = read_manifest(&file).await.unwrap().unwrap();
        assert_eq!(entries.len(), 2);
        let requests: Vec<MountRequest> = entries
            .into_iter()
            .map(|e| parse_entry(e).unwrap())
            .collect();
        assert_eq!(requests[0].path, "a");
        assert!(requests.iter().all(MountRequest::is_external));
    }

    #[tokio::test]
    async fn test_malformed_entry_is_isolated() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("mounts.json");
        std::fs::write(
            &file,
            r#"[{"path": "no-kind"}, {"path": "ok", "kind": "nfs"}, 42]"#,
        )
        .unwrap();

        let entries = read_manifest(&file).await.unwrap().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entry_path(&entries[0]), "no-kind");
        assert_eq!(entry_path(&entries[2]), "<unnamed>");

        let parsed: Vec<_> = entries.into_iter().map(parse_entry).collect();
        assert!(matches!(parsed[0], Err(AppError::Json(_))));
        assert!(parsed[1].is_ok());
        assert!(matches!(parsed[2], Err(AppError::Json(_))));
    }

    #[tokio::test]
    async fn test_malformed_manifest() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("mounts.json");
        std::fs::write(&file, "{ not json").unwrap();
        assert!(matches!(read_manifest(&file).await, Err(AppError::Json(_))));
    }
}
