pub mod dto;
pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::{control::ControlService, db::Store};

use handlers::ApiDoc;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub control: ControlService,
    /// Key of the aggregate device document served by `GET /api/device`.
    pub device_key: String,
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/api/readings/latest", get(handlers::get_latest_readings))
        .route(
            "/api/readings",
            get(handlers::list_readings).post(handlers::create_reading),
        )
        .route("/api/device", get(handlers::get_device))
        .route("/api/command", post(handlers::send_command))
        .route("/api/commands", get(handlers::list_commands))
        .route("/health", get(handlers::health))
        .route("/", get(handlers::home))
        .with_state(state)
        .split_for_parts();

    router.route(
        "/api-docs/openapi.json",
        get(move || async move { axum::Json(api) }),
    )
}
