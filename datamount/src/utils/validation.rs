use std::path::{Component, Path};

use crate::domain::MountRequest;
use crate::error::AppError;

/// A mount path must stay inside the mount root: relative, no `.`/`..`, no empty segments.
pub fn is_valid_mount_path(path: &str) -> bool {
    if path.is_empty() || path.contains('\0') || path.starts_with('/') || path.ends_with('/') {
        return false;
    }
    if path.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return false;
    }
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

pub fn validate_request(req: &MountRequest) -> Result<(), AppError> {
    if req.path.is_empty() {
        return Err(AppError::Validation("path not provided".to_string()));
    }
    if !is_valid_mount_path(&req.path) {
        return Err(AppError::Validation(format!(
            "path `{}` must be a relative path without `.` or `..` segments",
            req.path
        )));
    }
    if req.kind.trim().is_empty() {
        return Err(AppError::Validation("kind not provided".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_path_rules() {
        assert!(is_valid_mount_path("data1"));
        assert!(is_valid_mount_path("team/data1"));
        assert!(!is_valid_mount_path(""));
        assert!(!is_valid_mount_path("/etc"));
        assert!(!is_valid_mount_path("../escape"));
        assert!(!is_valid_mount_path("a/./b"));
        assert!(!is_valid_mount_path("a//b"));
        assert!(!is_valid_mount_path("trailing/"));
    }
}
