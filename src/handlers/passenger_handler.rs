// src/handlers/passenger_handler.rs
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::{
    errors::DispatchResult,
    handlers::{
        extract::{Caller, PassengerCaller},
        ApiResponse,
    },
    models::{
        passenger::{Passenger, PassengerRegistration},
        ride::{Ride, RideId, RideRequest, RideView},
    },
    services::dispatch_service::DispatchOperations,
    state::AppState,
};

pub async fn register_passenger(
    State(state): State<Arc<AppState>>,
    Json(registration): Json<PassengerRegistration>,
) -> DispatchResult<Json<ApiResponse<Passenger>>> {
    let passenger = state.identity.register_passenger(registration).await?;
    Ok(ApiResponse::ok(passenger))
}

pub async fn request_ride(
    State(state): State<Arc<AppState>>,
    PassengerCaller(passenger): PassengerCaller,
    Json(request): Json<RideRequest>,
) -> DispatchResult<(StatusCode, Json<ApiResponse<Ride>>)> {
    let outcome = state.dispatch.request_ride(&passenger, request).await?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}

pub async fn get_active_ride(
    State(state): State<Arc<AppState>>,
    PassengerCaller(passenger): PassengerCaller,
) -> DispatchResult<Json<ApiResponse<Option<RideView>>>> {
    let ride = state.dispatch.active_ride_for_passenger(passenger.id).await?;
    Ok(ApiResponse::ok(ride))
}

pub async fn get_ride_history(
    State(state): State<Arc<AppState>>,
    PassengerCaller(passenger): PassengerCaller,
) -> DispatchResult<Json<ApiResponse<Vec<RideView>>>> {
    let rides = state.dispatch.ride_history_for_passenger(passenger.id).await?;
    Ok(ApiResponse::ok(rides))
}

/// Passengers and drivers share this route; the caller's role picks the rule.
pub async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(ride_id): Path<RideId>,
) -> DispatchResult<Json<ApiResponse<Ride>>> {
    let outcome = state.dispatch.cancel_ride(&identity, ride_id).await?;
    Ok(Json(outcome.into()))
}
