//! HTTP handlers for the sync trigger surface.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::ApiError;
use crate::github::RateLimitSnapshot;
use crate::models::ServiceInfo;
use crate::server::AppState;
use crate::store::{SyncLogRecord, SyncType};
use crate::sync::SyncRequest;

#[derive(Debug, Deserialize, ToSchema)]
pub struct TriggerSyncRequest {
    /// "full" or "incremental"
    pub sync_type: String,
    /// Optional subset of configured organizations
    #[serde(default)]
    pub organizations: Option<Vec<String>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TriggerSyncResponse {
    pub sync_log_id: Uuid,
    pub status: String,
    pub items_processed: i64,
    pub error_summary: Vec<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListSyncsQuery {
    /// Max rows to return, newest first (default 20, cap 100)
    pub limit: Option<u64>,
}

/// Service metadata.
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service info", body = ServiceInfo))
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::current())
}

/// Liveness and database health.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Healthy"),
        (status = 503, description = "Database unreachable", body = ApiError)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    crate::db::health_check(&state.db).await.map_err(|err| {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "DATABASE_UNAVAILABLE",
            err.to_string(),
        )
    })?;
    Ok(StatusCode::OK)
}

/// Trigger a sync run and wait for its terminal state.
#[utoipa::path(
    post,
    path = "/syncs",
    request_body = TriggerSyncRequest,
    responses(
        (status = 200, description = "Run finished", body = TriggerSyncResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 409, description = "A run is already in flight", body = ApiError)
    )
)]
pub async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TriggerSyncRequest>,
) -> Result<Json<TriggerSyncResponse>, ApiError> {
    let sync_type = SyncType::parse(&payload.sync_type).ok_or_else(|| {
        ApiError::validation_error(format!(
            "sync_type must be 'full' or 'incremental', got '{}'",
            payload.sync_type
        ))
    })?;

    // One run at a time; overlapping runs would fight over the cursor.
    let Ok(_guard) = state.run_guard.try_lock() else {
        return Err(ApiError::conflict("a sync run is already in progress"));
    };

    info!(sync_type = sync_type.as_str(), "sync triggered via api");
    let outcome = state
        .runner
        .run(
            SyncRequest {
                sync_type,
                organizations: payload.organizations,
            },
            CancellationToken::new(),
        )
        .await?;

    Ok(Json(TriggerSyncResponse {
        sync_log_id: outcome.sync_log_id,
        status: outcome.status.as_str().to_string(),
        items_processed: outcome.items_processed,
        error_summary: outcome.error_summary,
    }))
}

/// Recent sync runs.
#[utoipa::path(
    get,
    path = "/syncs",
    params(ListSyncsQuery),
    responses((status = 200, description = "Sync runs, newest first", body = [SyncLogRecord]))
)]
pub async fn list_syncs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListSyncsQuery>,
) -> Result<Json<Vec<SyncLogRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(20).min(100);
    let logs = state.store.list_sync_logs(limit).await?;
    Ok(Json(logs))
}

/// One sync run by id.
#[utoipa::path(
    get,
    path = "/syncs/{id}",
    params(("id" = Uuid, Path, description = "Sync log id")),
    responses(
        (status = 200, description = "Sync run", body = SyncLogRecord),
        (status = 404, description = "Unknown id", body = ApiError)
    )
)]
pub async fn get_sync(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncLogRecord>, ApiError> {
    let log = state
        .store
        .get_sync_log(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no sync run with id {id}")))?;
    Ok(Json(log))
}

/// Tracked rate-limit budget.
#[utoipa::path(
    get,
    path = "/rate-limit",
    responses((status = 200, description = "Current quota window", body = RateLimitSnapshot))
)]
pub async fn rate_limit(State(state): State<Arc<AppState>>) -> Json<RateLimitSnapshot> {
    Json(state.limiter.snapshot())
}
