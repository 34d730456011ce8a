use axum::{
    extract::State,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::http::server::EngineServerState;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub tracked_owners: u64,
}

#[utoipa::path(
    get,
    operation_id = "health",
    path = "/health",
    tag = "Admin",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse, content_type = "application/json"),
    )
)]
/// Health
pub async fn health(State(state): State<EngineServerState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        tracked_owners: state.discovery.tracked_owners(),
    })
}
