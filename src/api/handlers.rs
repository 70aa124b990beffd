use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use utoipa::OpenApi;

use super::{
    dto::{
        CommandAuditDto, CommandRequestDto, CommandResponseDto, DeviceDocumentDto, ReadingDto,
    },
    errors::AppError,
    AppState,
};
use crate::db::models::{CommandPayload, DeviceStatus, LastUpdate, ListQuery, NewReading};

/// Default page size for listing endpoints.
pub const DEFAULT_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub device_id: Option<String>,
    pub limit: Option<usize>,
}

impl From<ListParams> for ListQuery {
    fn from(p: ListParams) -> Self {
        Self {
            device_id: p.device_id.filter(|id| !id.is_empty()),
            limit: p.limit.unwrap_or(DEFAULT_LIMIT),
        }
    }
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Fetch the most recent reading of every known device (one entry per device).
#[utoipa::path(
    get,
    path = "/api/readings/latest",
    responses(
        (status = 200, description = "Latest reading per device_id", body = Vec<ReadingDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn get_latest_readings(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReadingDto>>, AppError> {
    let rows = state.store.latest_per_device().await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Fetch the most recent readings, newest first, optionally for one device.
#[utoipa::path(
    get,
    path = "/api/readings",
    params(
        ("device_id" = Option<String>, Query, description = "Only readings from this device"),
        ("limit"     = Option<usize>,  Query, description = "Maximum number of readings (default 100)"),
    ),
    responses(
        (status = 200, description = "Readings, newest first", body = Vec<ReadingDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn list_readings(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ReadingDto>>, AppError> {
    let rows = state.store.list_readings(&params.into()).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Store a reading pushed by a device. The body is a flat object of metric
/// values plus the required `device_id`.
#[utoipa::path(
    post,
    path = "/api/readings",
    request_body = ReadingDto,
    responses(
        (status = 201, description = "Reading stored", body = ReadingDto),
        (status = 400, description = "device_id missing"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn create_reading(
    State(state): State<AppState>,
    Json(mut body): Json<Map<String, Value>>,
) -> Result<(StatusCode, Json<ReadingDto>), AppError> {
    let device_id = match body.remove("device_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id,
        _ => return Err(AppError::BadRequest("device_id is required".to_owned())),
    };
    // Server-assigned fields are never taken from the body.
    body.remove("id");
    body.remove("received_at");

    let stored = state
        .store
        .insert_reading(NewReading {
            device_id,
            values: body,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(stored.into())))
}

// ---------------------------------------------------------------------------
// Device state
// ---------------------------------------------------------------------------

/// Fetch the aggregate device document maintained by the ingestion loop.
#[utoipa::path(
    get,
    path = "/api/device",
    responses(
        (status = 200, description = "Device document", body = DeviceDocumentDto),
        (status = 404, description = "No device document yet"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "device"
)]
pub async fn get_device(
    State(state): State<AppState>,
) -> Result<Json<DeviceDocumentDto>, AppError> {
    let record = state
        .store
        .find_device(&state.device_key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no document for device {}", state.device_key)))?;
    Ok(Json(record.into()))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Publish a command to `<namespace>/<device_id>/commands` and record it.
#[utoipa::path(
    post,
    path = "/api/command",
    request_body = CommandRequestDto,
    responses(
        (status = 200, description = "Command published", body = CommandResponseDto),
        (status = 400, description = "device_id missing"),
        (status = 502, description = "Publish to the message broker failed"),
    ),
    tag = "commands"
)]
pub async fn send_command(
    State(state): State<AppState>,
    Json(body): Json<CommandRequestDto>,
) -> Result<Json<CommandResponseDto>, AppError> {
    let sent = state
        .control
        .dispatch(body.into())
        .await
        .map_err(AppError::from_dispatch)?;

    Ok(Json(CommandResponseDto {
        status: "sent".to_owned(),
        topic: sent.topic,
        payload: sent.payload,
    }))
}

/// Fetch the command audit trail, newest first.
#[utoipa::path(
    get,
    path = "/api/commands",
    params(
        ("device_id" = Option<String>, Query, description = "Only commands for this device"),
        ("limit"     = Option<usize>,  Query, description = "Maximum number of events (default 100)"),
    ),
    responses(
        (status = 200, description = "Audit events", body = Vec<CommandAuditDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "commands"
)]
pub async fn list_commands(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<CommandAuditDto>>, AppError> {
    let events = state.store.list_audit(&params.into()).await?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

pub async fn home() -> &'static str {
    "Sensor Server is Running"
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        get_latest_readings,
        list_readings,
        create_reading,
        get_device,
        send_command,
        list_commands,
        health
    ),
    components(schemas(
        ReadingDto,
        DeviceDocumentDto,
        DeviceStatus,
        LastUpdate,
        CommandRequestDto,
        CommandResponseDto,
        CommandPayload,
        CommandAuditDto
    )),
    tags(
        (name = "readings", description = "Device reading endpoints"),
        (name = "device",   description = "Aggregate device state"),
        (name = "commands", description = "Operator command dispatch"),
        (name = "system",   description = "System endpoints"),
    ),
    info(
        title = "Hydro Telemetry API",
        version = "0.1.0",
        description = "Sensor telemetry and device command API"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
