use axum::{Json, extract::State};
use chrono::Utc;

use crate::AppState;
use crate::api::models::health::HealthResponse;

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    summary = "Liveness check",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::ok(&state.config.service_name, Utc::now()))
}
