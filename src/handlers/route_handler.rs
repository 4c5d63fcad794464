// src/handlers/route_handler.rs
use axum::{extract::State, Json};
use std::sync::Arc;

use crate::{
    errors::{DispatchError, DispatchResult},
    handlers::{extract::Caller, ApiResponse},
    services::route_service::{RouteEstimate, RouteEstimator, RouteRequest},
    state::AppState,
};

/// Distance and duration shown to the passenger before requesting a ride.
pub async fn estimate_route(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Json(request): Json<RouteRequest>,
) -> DispatchResult<Json<ApiResponse<RouteEstimate>>> {
    DispatchError::check(request.validate())?;
    let estimate = state.routes.estimate_route(request.origin, request.destination).await?;
    Ok(ApiResponse::ok(estimate))
}
