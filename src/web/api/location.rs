use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::locator::{LocationItem, PollConfig, PositionRecord, RuntimeStats, StreamDefaults};
use crate::monitor::MonitorMode;
use crate::web::api::error::{ApiResult, ErrorResponse};
use crate::web::auth::{require_permission, AppState, AuthenticatedUser};
use crate::web::config::Permission;

#[derive(Debug, Serialize, ToSchema)]
pub struct LatestResponse {
    pub updated_at: Option<DateTime<Utc>>,
    /// Position record or normalized error record, as emitted by the stream.
    #[schema(value_type = Option<Object>)]
    pub item: Option<LocationItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PositionResponse {
    #[schema(value_type = Option<Object>)]
    pub position: Option<PositionRecord>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct StartRequest {
    pub satellite: Option<String>,
    pub interval_ms: Option<u64>,
    #[schema(value_type = Option<Object>)]
    pub options: Option<Map<String, Value>>,
}

#[utoipa::path(
    get,
    path = "/api/location/latest",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Most recent stream item", body = LatestResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse)
    ),
    tag = "location"
)]
pub async fn latest(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<LatestResponse>> {
    require_permission(&user, Permission::ReadLocation)?;
    let status = state.monitor.lock().await.status();
    Ok(Json(LatestResponse {
        updated_at: status.updated_at,
        item: status.last_item,
    }))
}

#[utoipa::path(
    get,
    path = "/api/location/position",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Most recent successful position", body = PositionResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse)
    ),
    tag = "location"
)]
pub async fn position(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<PositionResponse>> {
    require_permission(&user, Permission::ReadLocation)?;
    let status = state.monitor.lock().await.status();
    Ok(Json(PositionResponse {
        position: status.last_position,
    }))
}

#[utoipa::path(
    get,
    path = "/api/location/stats",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Polling counters", body = RuntimeStats),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse)
    ),
    tag = "location"
)]
pub async fn stats(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<RuntimeStats>> {
    require_permission(&user, Permission::ReadLocation)?;
    let monitor = state.monitor.lock().await;
    Ok(Json(monitor.status().stats))
}

#[utoipa::path(
    get,
    path = "/api/location/mode",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Monitor mode", body = MonitorMode),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse)
    ),
    tag = "location"
)]
pub async fn mode(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<MonitorMode>> {
    require_permission(&user, Permission::ReadLocation)?;
    let monitor = state.monitor.lock().await;
    Ok(Json(monitor.status().mode))
}

#[utoipa::path(
    post,
    path = "/api/location/start",
    request_body = StartRequest,
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Monitor started", body = MonitorMode),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
        (status = 409, description = "Monitor already running", body = ErrorResponse),
        (status = 500, description = "HTTP client could not be built", body = ErrorResponse)
    ),
    tag = "location"
)]
pub async fn start(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<StartRequest>,
) -> ApiResult<Json<MonitorMode>> {
    require_permission(&user, Permission::ControlStream)?;

    let config = PollConfig::resolve(
        &StreamDefaults::default(),
        request.satellite.as_deref(),
        request.interval_ms,
        request.options.as_ref(),
    );

    let stream_config = &state.config.stream;
    let mut monitor = state.monitor.lock().await;
    monitor.start_http(
        config,
        &stream_config.base_url,
        stream_config.request_timeout(),
    )?;
    Ok(Json(monitor.status().mode))
}

#[utoipa::path(
    post,
    path = "/api/location/stop",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Monitor stopped", body = MonitorMode),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse)
    ),
    tag = "location"
)]
pub async fn stop(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<MonitorMode>> {
    require_permission(&user, Permission::ControlStream)?;
    let mut monitor = state.monitor.lock().await;
    monitor.stop().await;
    Ok(Json(monitor.status().mode))
}

#[utoipa::path(
    post,
    path = "/api/location/pause",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Polling paused", body = MonitorMode),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
        (status = 409, description = "Monitor not running", body = ErrorResponse)
    ),
    tag = "location"
)]
pub async fn pause(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<MonitorMode>> {
    require_permission(&user, Permission::ControlStream)?;
    let mut monitor = state.monitor.lock().await;
    monitor.pause()?;
    Ok(Json(monitor.status().mode))
}

#[utoipa::path(
    post,
    path = "/api/location/resume",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Polling resumed", body = MonitorMode),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
        (status = 409, description = "Monitor not running", body = ErrorResponse)
    ),
    tag = "location"
)]
pub async fn resume(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<MonitorMode>> {
    require_permission(&user, Permission::ControlStream)?;
    let mut monitor = state.monitor.lock().await;
    monitor.resume()?;
    Ok(Json(monitor.status().mode))
}
