//! HTTP REST API routes

mod storage_routes;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use crate::infrastructure::state::AppState;

/// Create all API routes
pub fn create_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/storage", get(storage_routes::list_storage))
        .route("/api/storage/events", get(storage_routes::storage_event_feed))
        .route(
            "/api/worlds/{world_id}/storage",
            post(storage_routes::initialize_storage).get(storage_routes::get_storage),
        )
        .route(
            "/api/worlds/{world_id}/storage/allocation",
            put(storage_routes::increase_allocation),
        )
        .route(
            "/api/worlds/{world_id}/storage/entities",
            post(storage_routes::store_entity),
        )
        .route(
            "/api/worlds/{world_id}/storage/entities/restore",
            post(storage_routes::restore_entity),
        )
        .route(
            "/api/worlds/{world_id}/storage/entities/discard",
            post(storage_routes::discard_entity),
        )
        .route(
            "/api/worlds/{world_id}/storage/events",
            get(storage_routes::list_storage_events),
        )
        .route(
            "/api/worlds/{world_id}/storage/rebuild",
            post(storage_routes::rebuild_storage),
        )
        .route(
            "/api/worlds/{world_id}/storage/audit",
            get(storage_routes::audit_storage),
        )
}
