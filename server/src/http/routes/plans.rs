use alloy::primitives::Address;
use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;
use sip_core::error::SipError;
use utoipa::ToSchema;

use crate::http::{
    error::{ApiSipError, SipResult},
    server::EngineServerState, types::SuccessResponse,
};

// ===== TYPES =====

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    #[schema(value_type = String)]
    pub owner: Address,
    /// Current generation of the owner's controller
    pub generation: u64,
    /// A run was in flight; the refresh starts when it finishes
    pub queued: bool,
}

fn parse_owner(owner: &str) -> Result<Address, ApiSipError> {
    owner.parse::<Address>().map_err(|e| {
        ApiSipError(SipError::ValidationError {
            message: format!("Invalid owner address `{owner}`: {e}"),
        })
    })
}

// ===== ROUTE HANDLERS =====

#[utoipa::path(
    get,
    operation_id = "listPlans",
    path = "/v1/owners/{owner}/plans",
    tag = "Plans",
    responses(
        (status = 200, description = "Active plans of the owner with views and portfolio summary", content_type = "application/json"),
        (status = 400, description = "Owner is not an address"),
    ),
    params(
        ("owner" = String, Path, description = "Owner address"),
    )
)]
/// List Plans
///
/// Returns the latest discovery result for an owner. The first request for an
/// owner waits for its first discovery run.
#[debug_handler]
pub async fn list_plans(
    State(state): State<EngineServerState>,
    Path(owner): Path<String>,
) -> Result<impl IntoResponse, ApiSipError> {
    let owner = parse_owner(&owner)?;
    let plans = state.discovery.plans(owner).await;

    Ok((StatusCode::OK, Json(SuccessResponse::new(plans))))
}

#[utoipa::path(
    post,
    operation_id = "refreshPlans",
    path = "/v1/owners/{owner}/refresh",
    tag = "Plans",
    responses(
        (status = 202, description = "Discovery run started", body = SuccessResponse<RefreshResponse>, content_type = "application/json"),
    ),
    params(
        ("owner" = String, Path, description = "Owner address"),
    )
)]
/// Refresh Plans
///
/// Starts a discovery run for the owner. When a run is already in flight, one
/// follow-up run is queued behind it.
#[debug_handler]
pub async fn refresh_plans(
    State(state): State<EngineServerState>,
    Path(owner): Path<String>,
) -> Result<impl IntoResponse, ApiSipError> {
    let owner = parse_owner(&owner)?;
    let status = state.discovery.refresh(owner).await;

    tracing::info!(
        owner = %owner,
        generation = status.generation,
        queued = status.queued,
        "Refresh requested"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SuccessResponse::new(RefreshResponse {
            owner,
            generation: status.generation,
            queued: status.queued,
        })),
    ))
}

#[utoipa::path(
    get,
    operation_id = "checkPlan",
    path = "/v1/owners/{owner}/plans/{plan_key}",
    tag = "Plans",
    responses(
        (status = 200, description = "The plan is active and now registered", content_type = "application/json"),
        (status = 404, description = "No active plan under this key"),
    ),
    params(
        ("owner" = String, Path, description = "Owner address"),
        ("plan_key" = String, Path, description = "Plan key to look up"),
    )
)]
/// Check Plan Key
///
/// Looks up a single plan key. Active plans are added to the owner's registry
/// so later discovery runs include them.
#[debug_handler]
pub async fn check_plan(
    State(state): State<EngineServerState>,
    Path((owner, plan_key)): Path<(String, String)>,
) -> Result<Response, ApiSipError> {
    let owner = parse_owner(&owner)?;

    match state
        .discovery
        .check_plan_key(owner, &plan_key)
        .await
        .api_error()?
    {
        Some(view) => Ok((StatusCode::OK, Json(SuccessResponse::new(view))).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": {
                    "message": format!("No active plan `{plan_key}` for {owner}"),
                }
            })),
        )
            .into_response()),
    }
}
