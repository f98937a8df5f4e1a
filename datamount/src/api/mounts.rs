use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::domain::MountRequest;
use crate::error::AppError;
use crate::utils::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RemoveParams {
    #[serde(default)]
    force: bool,
}

// Mount work runs in its own task so a disconnecting caller cannot cancel it halfway.
pub async fn create_mount(
    State(state): State<Arc<AppState>>,
    body: Result<Json<MountRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Json(req) = body.map_err(|e| AppError::Validation(e.body_text()))?;
    let service = state.service.clone();
    tokio::spawn(async move { service.create_mount(req).await }).await??;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_mounts(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, MountRequest>> {
    Json(state.service.list_mounts().await)
}

pub async fn remove_mount(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(params): Query<RemoveParams>,
) -> Result<StatusCode, AppError> {
    let service = state.service.clone();
    tokio::spawn(async move { service.remove_mount(&path, params.force).await }).await??;
    Ok(StatusCode::NO_CONTENT)
}
