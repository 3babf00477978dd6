//! Storage API routes
//!
//! Admin surface over the quota ledger: command handlers report size changes
//! here and operators read usage, history and audits.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::application::dto::{
    IncreaseAllocationRequestDto, InitializeStorageRequestDto, LedgerResponseDto,
    RecordedEventDto, StorageAuditDto, StoreEntityRequestDto, StoreResponseDto,
};
use crate::application::services::{StorageError, StorageProjectionService, StorageService};
use crate::domain::value_objects::WorldId;
use crate::infrastructure::state::AppState;

type ApiError = (StatusCode, String);

const DEFAULT_FEED_LIMIT: u32 = 100;
const MAX_FEED_LIMIT: u32 = 1000;

fn parse_world_id(id: &str) -> Result<WorldId, ApiError> {
    WorldId::parse(id).map_err(|_| (StatusCode::BAD_REQUEST, "Invalid world ID".to_string()))
}

/// Map a storage failure onto its HTTP status
pub fn storage_error_response(error: StorageError) -> ApiError {
    let status = match &error {
        StorageError::QuotaExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StorageError::AlreadyInitialized(_) => StatusCode::CONFLICT,
        StorageError::NotInitialized(_) => StatusCode::NOT_FOUND,
        StorageError::InvalidAllocation(_) | StorageError::InvalidSize { .. } => {
            StatusCode::BAD_REQUEST
        }
        StorageError::NegativeResultingUsage(_)
        | StorageError::Ledger(_)
        | StorageError::EventStore(_)
        | StorageError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string())
}

/// List every world's ledger
pub async fn list_storage(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LedgerResponseDto>>, ApiError> {
    let ledgers = state
        .storage_service
        .list_usage()
        .await
        .map_err(storage_error_response)?;

    Ok(Json(ledgers.into_iter().map(LedgerResponseDto::from).collect()))
}

/// Grant a world its quota
pub async fn initialize_storage(
    State(state): State<Arc<AppState>>,
    Path(world_id): Path<String>,
    body: Option<Json<InitializeStorageRequestDto>>,
) -> Result<(StatusCode, Json<LedgerResponseDto>), ApiError> {
    let world_id = parse_world_id(&world_id)?;
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let ledger = state
        .storage_service
        .initialize(world_id, req.allocated_bytes)
        .await
        .map_err(storage_error_response)?;

    Ok((StatusCode::CREATED, Json(LedgerResponseDto::from(ledger))))
}

/// Current usage of a world
pub async fn get_storage(
    State(state): State<Arc<AppState>>,
    Path(world_id): Path<String>,
) -> Result<Json<LedgerResponseDto>, ApiError> {
    let world_id = parse_world_id(&world_id)?;

    let ledger = state
        .storage_service
        .usage(world_id)
        .await
        .map_err(storage_error_response)?;

    Ok(Json(LedgerResponseDto::from(ledger)))
}

/// Raise a world's quota
pub async fn increase_allocation(
    State(state): State<Arc<AppState>>,
    Path(world_id): Path<String>,
    Json(req): Json<IncreaseAllocationRequestDto>,
) -> Result<Json<LedgerResponseDto>, ApiError> {
    let world_id = parse_world_id(&world_id)?;

    let ledger = state
        .storage_service
        .increase_allocation(world_id, req.allocated_bytes)
        .await
        .map_err(storage_error_response)?;

    Ok(Json(LedgerResponseDto::from(ledger)))
}

/// Account for a created or changed entity
pub async fn store_entity(
    State(state): State<Arc<AppState>>,
    Path(world_id): Path<String>,
    Json(req): Json<StoreEntityRequestDto>,
) -> Result<Json<StoreResponseDto>, ApiError> {
    let world_id = parse_world_id(&world_id)?;
    let previous_size = req.previous_size;
    let entity = req
        .into_snapshot(world_id)
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;

    let outcome = state
        .storage_service
        .store(&entity, previous_size)
        .await
        .map_err(storage_error_response)?;

    Ok(Json(StoreResponseDto::from(outcome)))
}

/// Count an undeleted entity in full again
pub async fn restore_entity(
    State(state): State<Arc<AppState>>,
    Path(world_id): Path<String>,
    Json(req): Json<StoreEntityRequestDto>,
) -> Result<Json<StoreResponseDto>, ApiError> {
    let world_id = parse_world_id(&world_id)?;
    let entity = req
        .into_snapshot(world_id)
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;

    let outcome = state
        .storage_service
        .restore(&entity)
        .await
        .map_err(storage_error_response)?;

    Ok(Json(StoreResponseDto::from(outcome)))
}

/// Release a deleted entity's footprint
pub async fn discard_entity(
    State(state): State<Arc<AppState>>,
    Path(world_id): Path<String>,
    Json(req): Json<StoreEntityRequestDto>,
) -> Result<Json<StoreResponseDto>, ApiError> {
    let world_id = parse_world_id(&world_id)?;
    let entity = req
        .into_snapshot(world_id)
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;

    let outcome = state
        .storage_service
        .discard(&entity)
        .await
        .map_err(storage_error_response)?;

    Ok(Json(StoreResponseDto::from(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct EventFeedQuery {
    /// Sequence of the last event already seen; 0 reads from the start
    #[serde(default)]
    pub after: i64,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Storage events of all worlds after a sequence number
pub async fn storage_event_feed(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventFeedQuery>,
) -> Result<Json<Vec<RecordedEventDto>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_FEED_LIMIT)
        .clamp(1, MAX_FEED_LIMIT);

    let events = state
        .projection_service
        .events_since(query.after, limit)
        .await
        .map_err(storage_error_response)?;

    Ok(Json(events.into_iter().map(RecordedEventDto::from).collect()))
}

/// A world's storage events in append order
pub async fn list_storage_events(
    State(state): State<Arc<AppState>>,
    Path(world_id): Path<String>,
) -> Result<Json<Vec<RecordedEventDto>>, ApiError> {
    let world_id = parse_world_id(&world_id)?;

    let history = state
        .projection_service
        .history(world_id)
        .await
        .map_err(storage_error_response)?;

    Ok(Json(history.into_iter().map(RecordedEventDto::from).collect()))
}

/// Recompute a world's usage from its event history
pub async fn rebuild_storage(
    State(state): State<Arc<AppState>>,
    Path(world_id): Path<String>,
) -> Result<Json<LedgerResponseDto>, ApiError> {
    let world_id = parse_world_id(&world_id)?;

    let ledger = state
        .projection_service
        .rebuild(world_id)
        .await
        .map_err(storage_error_response)?;

    Ok(Json(LedgerResponseDto::from(ledger)))
}

/// Compare a world's ledger with its event history
pub async fn audit_storage(
    State(state): State<Arc<AppState>>,
    Path(world_id): Path<String>,
) -> Result<Json<StorageAuditDto>, ApiError> {
    let world_id = parse_world_id(&world_id)?;

    let audit = state
        .projection_service
        .audit(world_id)
        .await
        .map_err(storage_error_response)?;

    Ok(Json(StorageAuditDto::from(audit)))
}
