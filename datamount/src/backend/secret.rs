use std::collections::BTreeMap;
use std::path::Path;

use tempfile::{NamedTempFile, TempPath};
use tokio::process::Command;
use tracing::debug;

use crate::error::AppError;

/// Keys consumed as command arguments, never written to the config file.
pub const SKIP_KEYS: [&str; 3] = ["readonly", "displayName", "remotepath"];

/// Values of keys with this prefix are passed through `rclone obscure`.
pub const OBSCURE_PREFIX: &str = "obscure_";

/// A private, on-disk rclone config. The file lives as long as `path`.
pub struct SecretArtifact {
    pub path: TempPath,
    pub content: String,
}

impl SecretArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Writes `config` as a single `[section]` into a fresh 0600 temp file.
pub async fn materialize(
    rclone_bin: &Path,
    section: &str,
    config: &BTreeMap<String, String>,
) -> Result<SecretArtifact, AppError> {
    let content = render(rclone_bin, section, config).await?;

    let file = NamedTempFile::with_prefix("datamount-")?;
    let path = file.into_temp_path();
    tokio::fs::write(&path, content.as_bytes()).await?;
    debug!("Materialized config for [{section}] at {}", path.display());

    Ok(SecretArtifact { path, content })
}

pub async fn render(
    rclone_bin: &Path,
    section: &str,
    config: &BTreeMap<String, String>,
) -> Result<String, AppError> {
    check_line_safe("template", section)?;

    let mut lines = vec![format!("[{section}]")];
    for (key, value) in config {
        if SKIP_KEYS.contains(&key.as_str()) {
            continue;
        }
        check_line_safe(key, key)?;
        check_line_safe(key, value)?;

        match key.strip_prefix(OBSCURE_PREFIX) {
            Some(stripped) => {
                let obscured = obscure(rclone_bin, value).await?;
                lines.push(format!("{stripped} = {obscured}"));
            }
            None => lines.push(format!("{key} = {value}")),
        }
    }
    let mut content = lines.join("\n");
    content.push('\n');
    Ok(content)
}

async fn obscure(rclone_bin: &Path, value: &str) -> Result<String, AppError> {
    let output = Command::new(rclone_bin)
        .arg("obscure")
        .arg(value)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            AppError::SecretMaterialization(format!(
                "failed to run {} obscure: {e}",
                rclone_bin.display()
            ))
        })?;
    if !output.status.success() {
        return Err(AppError::SecretMaterialization(format!(
            "{} obscure exited with {}: {}",
            rclone_bin.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

// A newline in a key or value would let a caller inject extra config lines.
fn check_line_safe(key: &str, value: &str) -> Result<(), AppError> {
    if value.contains(['\n', '\r']) {
        return Err(AppError::ConfigRejected(format!(
            "{key} must not contain line breaks"
        )));
    }
    Ok(())
}
