use axum::response::Json;
use utoipa::OpenApi;

pub mod admin;
pub mod health;
pub mod plans;

#[derive(OpenApi)]
#[openapi(
    info(title = "SIP plan discovery engine"),
    paths(
        plans::list_plans,
        plans::refresh_plans,
        plans::check_plan,
        health::health,
    ),
    tags(
        (name = "Plans", description = "Plan discovery for an owner"),
        (name = "Admin", description = "Service status"),
    )
)]
pub struct ApiDoc;

/// OpenAPI document of the HTTP surface
pub async fn api_doc() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
