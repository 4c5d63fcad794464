// src/handlers/admin_handler.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    errors::{DispatchError, DispatchResult},
    handlers::{extract::AdminCaller, ApiResponse},
    models::{
        driver::{Driver, DriverRegistration, DriverUpdate},
        passenger::{Passenger, PassengerUpdate},
        ride::{DispatchStats, Ride, RideFilter, RideId, RideStatus, RideView},
    },
    services::admin_service::AdminOperations,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}

impl SearchQuery {
    fn needle(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct RideQuery {
    pub status: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl RideQuery {
    fn into_filter(self) -> DispatchResult<RideFilter> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<RideStatus>()
                    .map_err(|e| DispatchError::ValidationFailed(vec![e]))?,
            ),
        };
        Ok(RideFilter {
            status,
            start: self.start,
            end: self.end,
        })
    }
}

pub async fn create_driver(
    State(state): State<Arc<AppState>>,
    _admin: AdminCaller,
    Json(registration): Json<DriverRegistration>,
) -> DispatchResult<(StatusCode, Json<ApiResponse<Driver>>)> {
    let driver = state.admin.create_driver(registration).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(driver)))
}

pub async fn list_drivers(
    State(state): State<Arc<AppState>>,
    _admin: AdminCaller,
    Query(query): Query<SearchQuery>,
) -> DispatchResult<Json<ApiResponse<Vec<Driver>>>> {
    let drivers = state.admin.list_drivers(query.needle()).await?;
    Ok(ApiResponse::ok(drivers))
}

pub async fn update_driver(
    State(state): State<Arc<AppState>>,
    _admin: AdminCaller,
    Path(driver_id): Path<u64>,
    Json(update): Json<DriverUpdate>,
) -> DispatchResult<Json<ApiResponse<Driver>>> {
    let driver = state.admin.update_driver(driver_id, update).await?;
    Ok(ApiResponse::ok(driver))
}

pub async fn reconcile_driver(
    State(state): State<Arc<AppState>>,
    _admin: AdminCaller,
    Path(driver_id): Path<u64>,
) -> DispatchResult<Json<ApiResponse<Driver>>> {
    let driver = state.admin.reconcile_driver(driver_id).await?;
    Ok(ApiResponse::ok(driver))
}

pub async fn list_passengers(
    State(state): State<Arc<AppState>>,
    _admin: AdminCaller,
    Query(query): Query<SearchQuery>,
) -> DispatchResult<Json<ApiResponse<Vec<Passenger>>>> {
    let passengers = state.admin.list_passengers(query.needle()).await?;
    Ok(ApiResponse::ok(passengers))
}

pub async fn update_passenger(
    State(state): State<Arc<AppState>>,
    _admin: AdminCaller,
    Path(passenger_id): Path<u64>,
    Json(update): Json<PassengerUpdate>,
) -> DispatchResult<Json<ApiResponse<Passenger>>> {
    let passenger = state.admin.update_passenger(passenger_id, update).await?;
    Ok(ApiResponse::ok(passenger))
}

pub async fn list_rides(
    State(state): State<Arc<AppState>>,
    _admin: AdminCaller,
    Query(query): Query<RideQuery>,
) -> DispatchResult<Json<ApiResponse<Vec<Ride>>>> {
    let rides = state.admin.list_rides(query.into_filter()?).await?;
    Ok(ApiResponse::ok(rides))
}

pub async fn get_ride(
    State(state): State<Arc<AppState>>,
    _admin: AdminCaller,
    Path(ride_id): Path<RideId>,
) -> DispatchResult<Json<ApiResponse<RideView>>> {
    let ride = state.admin.ride_details(ride_id).await?;
    Ok(ApiResponse::ok(ride))
}

pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    _admin: AdminCaller,
) -> DispatchResult<Json<ApiResponse<DispatchStats>>> {
    let stats = state.admin.stats().await?;
    Ok(ApiResponse::ok(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ride_query_parses_status() {
        let query = RideQuery {
            status: Some("in_progress".to_string()),
            start: None,
            end: None,
        };
        assert_eq!(query.into_filter().unwrap().status, Some(RideStatus::InProgress));

        let query = RideQuery {
            status: Some("lost".to_string()),
            start: None,
            end: None,
        };
        assert!(matches!(query.into_filter(), Err(DispatchError::ValidationFailed(_))));
    }

    #[test]
    fn test_blank_search_is_ignored() {
        let query = SearchQuery {
            search: Some("  ".to_string()),
        };
        assert_eq!(query.needle(), None);
    }
}
