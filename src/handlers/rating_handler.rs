// src/handlers/rating_handler.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::{
    errors::DispatchResult,
    handlers::{
        extract::{AdminCaller, Caller, PassengerCaller},
        ApiResponse,
    },
    models::{
        rating::{DriverRatingSummary, Rating, RatingFilter, RatingRequest, RatingUpdate},
        ride::RideId,
    },
    services::rating_service::RatingOperations,
    state::AppState,
};

pub async fn rate_ride(
    State(state): State<Arc<AppState>>,
    PassengerCaller(passenger): PassengerCaller,
    Path(ride_id): Path<RideId>,
    Json(request): Json<RatingRequest>,
) -> DispatchResult<(StatusCode, Json<ApiResponse<Rating>>)> {
    let rating = state.ratings.rate_ride(&passenger, ride_id, request).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(rating)))
}

pub async fn get_ride_rating(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(ride_id): Path<RideId>,
) -> DispatchResult<Json<ApiResponse<Option<Rating>>>> {
    let rating = state.ratings.rating_for_ride(ride_id).await?;
    Ok(ApiResponse::ok(rating))
}

pub async fn get_driver_ratings(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(driver_id): Path<u64>,
) -> DispatchResult<Json<ApiResponse<Vec<Rating>>>> {
    let ratings = state.ratings.driver_ratings(driver_id).await?;
    Ok(ApiResponse::ok(ratings))
}

pub async fn get_driver_summary(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(driver_id): Path<u64>,
) -> DispatchResult<Json<ApiResponse<DriverRatingSummary>>> {
    let summary = state.ratings.driver_summary(driver_id).await?;
    Ok(ApiResponse::ok(summary))
}

// Admin

pub async fn list_ratings(
    State(state): State<Arc<AppState>>,
    _admin: AdminCaller,
    Query(filter): Query<RatingFilter>,
) -> DispatchResult<Json<ApiResponse<Vec<Rating>>>> {
    let ratings = state.ratings.list_ratings(filter).await?;
    Ok(ApiResponse::ok(ratings))
}

pub async fn update_rating(
    State(state): State<Arc<AppState>>,
    _admin: AdminCaller,
    Path(rating_id): Path<u64>,
    Json(update): Json<RatingUpdate>,
) -> DispatchResult<Json<ApiResponse<Rating>>> {
    let rating = state.ratings.update_rating(rating_id, update).await?;
    Ok(ApiResponse::ok(rating))
}

pub async fn delete_rating(
    State(state): State<Arc<AppState>>,
    _admin: AdminCaller,
    Path(rating_id): Path<u64>,
) -> DispatchResult<StatusCode> {
    state.ratings.delete_rating(rating_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
