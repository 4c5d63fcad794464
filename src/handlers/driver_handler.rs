// src/handlers/driver_handler.rs
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::{
    errors::DispatchResult,
    handlers::{
        extract::{DriverCaller, ID_HEADER, ROLE_HEADER},
        ApiResponse,
    },
    models::ride::{Ride, RideId, RideOffer, RideView},
    services::dispatch_service::DispatchOperations,
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct AcceptInstructions {
    pub method: &'static str,
    pub path: String,
    pub headers: [&'static str; 2],
}

#[derive(Debug, Serialize)]
pub struct AcceptPage {
    pub offer: RideOffer,
    pub accept: AcceptInstructions,
}

/// Target of the broadcast link. A tapped link carries no actor headers, so
/// this is public and only describes the ride and how to accept it.
pub async fn view_offer(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<RideId>,
) -> DispatchResult<Json<ApiResponse<AcceptPage>>> {
    let offer = state.dispatch.ride_offer(ride_id).await?;
    Ok(ApiResponse::ok(AcceptPage {
        offer,
        accept: AcceptInstructions {
            method: "POST",
            path: format!("/api/rides/{}/accept", ride_id),
            headers: [ROLE_HEADER, ID_HEADER],
        },
    }))
}

pub async fn accept_ride(
    State(state): State<Arc<AppState>>,
    DriverCaller(driver): DriverCaller,
    Path(ride_id): Path<RideId>,
) -> DispatchResult<Json<ApiResponse<RideView>>> {
    let outcome = state.dispatch.accept_ride(&driver, ride_id).await?;
    Ok(Json(outcome.into()))
}

pub async fn start_ride(
    State(state): State<Arc<AppState>>,
    DriverCaller(driver): DriverCaller,
    Path(ride_id): Path<RideId>,
) -> DispatchResult<Json<ApiResponse<Ride>>> {
    let outcome = state.dispatch.start_ride(&driver, ride_id).await?;
    Ok(Json(outcome.into()))
}

pub async fn complete_ride(
    State(state): State<Arc<AppState>>,
    DriverCaller(driver): DriverCaller,
    Path(ride_id): Path<RideId>,
) -> DispatchResult<Json<ApiResponse<Ride>>> {
    let outcome = state.dispatch.complete_ride(&driver, ride_id).await?;
    Ok(Json(outcome.into()))
}

pub async fn get_active_ride(
    State(state): State<Arc<AppState>>,
    DriverCaller(driver): DriverCaller,
) -> DispatchResult<Json<ApiResponse<Option<RideView>>>> {
    let ride = state.dispatch.active_ride_for_driver(driver.id).await?;
    Ok(ApiResponse::ok(ride))
}

pub async fn get_ride_history(
    State(state): State<Arc<AppState>>,
    DriverCaller(driver): DriverCaller,
) -> DispatchResult<Json<ApiResponse<Vec<RideView>>>> {
    let rides = state.dispatch.ride_history_for_driver(driver.id).await?;
    Ok(ApiResponse::ok(rides))
}
