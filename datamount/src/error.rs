use std::io;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    // Rejected before any side effect
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unknown backend kind `{0}`")]
    UnknownBackend(String),

    // Backend preconditions
    #[error("Config not working. {0}")]
    ConfigRejected(String),

    #[error("{message}")]
    BackendUnreachable {
        message: String,
        output: String,
        // Raw backend config, never set for external mounts.
        config: Option<String>,
    },

    #[error("failed to materialize backend secrets: {0}")]
    SecretMaterialization(String),

    // Process lifecycle
    #[error("{message}")]
    LaunchFailed { message: String, output: String },

    #[error("mount point of {path} is not usable: {reason}")]
    Unusable { path: String, reason: String },

    #[error("{0} already mounted")]
    AlreadyMounted(String),

    #[error("mount {0} not found")]
    NotFound(String),

    #[error("unmount of {path} failed: {output}")]
    UnmountFailed { path: String, output: String },

    #[error("unmount of {0} already in progress")]
    UnmountInProgress(String),

    // Internal
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub detail: serde_json::Value,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::UnknownBackend(_) => "UNKNOWN_BACKEND",
            Self::ConfigRejected(_) => "CONFIG_REJECTED",
            Self::BackendUnreachable { .. } => "BACKEND_UNREACHABLE",
            Self::SecretMaterialization(_) => "SECRET_MATERIALIZATION_FAILED",
            Self::LaunchFailed { .. } => "LAUNCH_FAILED",
            Self::Unusable { .. } => "UNUSABLE",
            Self::AlreadyMounted(_) => "ALREADY_MOUNTED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::UnmountFailed { .. } => "UNMOUNT_FAILED",
            Self::UnmountInProgress(_) => "UNMOUNT_IN_PROGRESS",
            Self::Io(_) | Self::Http(_) | Self::Json(_) | Self::Join(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::UnknownBackend(_)
            | Self::ConfigRejected(_)
            | Self::BackendUnreachable { .. }
            | Self::LaunchFailed { .. } => StatusCode::BAD_REQUEST,
            Self::AlreadyMounted(_) | Self::UnmountInProgress(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unusable { .. }
            | Self::UnmountFailed { .. }
            | Self::SecretMaterialization(_)
            | Self::Io(_)
            | Self::Http(_)
            | Self::Json(_)
            | Self::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn detail(&self) -> serde_json::Value {
        match self {
            Self::BackendUnreachable { output, config, .. } => match config {
                Some(config) => json!({ "error": output, "config": config }),
                None => json!({ "error": output }),
            },
            Self::LaunchFailed { output, .. } => json!({ "error": output }),
            Self::Unusable { path, reason } => json!({ "path": path, "reason": reason }),
            Self::UnmountFailed { path, output } => json!({ "path": path, "error": output }),
            Self::AlreadyMounted(path) | Self::NotFound(path) | Self::UnmountInProgress(path) => {
                json!({ "path": path })
            }
            Self::UnknownBackend(kind) => json!({ "kind": kind }),
            _ => json!({}),
        }
    }

    pub fn body(&self) -> ErrorBody {
        let message = match self {
            Self::Io(_) | Self::Http(_) | Self::Json(_) | Self::Join(_) => {
                "an internal server error occurred".to_string()
            }
            _ => self.to_string(),
        };
        ErrorBody {
            error: self.code(),
            message,
            detail: self.detail(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::error!("Generating response for AppError: {:?}", self);
        } else {
            tracing::warn!("Generating response for AppError: {}", self);
        }
        (self.status(), Json(self.body())).into_response()
    }
}
