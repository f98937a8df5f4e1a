pub mod mounts;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get};
use tower_http::trace::TraceLayer;

use crate::utils::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(mounts::list_mounts).post(mounts::create_mount))
        .route("/{*path}", delete(mounts::remove_mount))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
