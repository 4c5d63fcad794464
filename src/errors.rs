use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::ride::{RideId, RideStatus};

/// Main error type for the ride dispatch service.
///
/// Every variant is something the caller can be shown as-is; none of them
/// signals a programming defect. Only [`DispatchError::StoreUnavailable`]
/// is worth retrying.
#[derive(Debug)]
pub enum DispatchError {
    // Ride lifecycle
    ActiveRideExists,
    RideNotFound(RideId),
    RideAlreadyTaken(RideId),
    InvalidTransition { ride_id: RideId, status: RideStatus },
    NotOwner(RideId),

    // Ratings
    RideNotRateable { ride_id: RideId, status: RideStatus },
    RideAlreadyRated(RideId),
    RatingNotFound(u64),

    // Actor state
    DriverBusy,
    DriverBlocked,
    DriverExpired,
    AccountBlocked,
    DriverNotFound(u64),
    PassengerNotFound(u64),

    // Persistence and collaborators
    StoreUnavailable(String),
    RouteUnavailable(String),

    // API and validation
    Unauthorized(String),
    Conflict(String),
    ValidationFailed(Vec<ValidationError>),

    // Configuration and setup
    MissingEnvironmentVariable(String),
    InvalidConfiguration(String),

    Internal(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::ActiveRideExists => write!(f, "Passenger already has an active ride"),
            DispatchError::RideNotFound(id) => write!(f, "Ride not found: {}", id),
            DispatchError::RideAlreadyTaken(id) => {
                write!(f, "Ride {} was already accepted or cancelled", id)
            }
            DispatchError::InvalidTransition { ride_id, status } => {
                write!(f, "Ride {} cannot change state from {}", ride_id, status)
            }
            DispatchError::NotOwner(id) => write!(f, "Caller does not own ride {}", id),

            DispatchError::RideNotRateable { ride_id, status } => {
                write!(f, "Ride {} is {}, only completed rides can be rated", ride_id, status)
            }
            DispatchError::RideAlreadyRated(id) => write!(f, "Ride {} has already been rated", id),
            DispatchError::RatingNotFound(id) => write!(f, "Rating not found: {}", id),

            DispatchError::DriverBusy => write!(f, "Driver is already on a ride"),
            DispatchError::DriverBlocked => write!(f, "Driver account is blocked"),
            DispatchError::DriverExpired => write!(f, "Driver registration has expired"),
            DispatchError::AccountBlocked => write!(f, "Account is blocked"),
            DispatchError::DriverNotFound(id) => write!(f, "Driver not found: {}", id),
            DispatchError::PassengerNotFound(id) => write!(f, "Passenger not found: {}", id),

            DispatchError::StoreUnavailable(msg) => write!(f, "Ride store unavailable: {}", msg),
            DispatchError::RouteUnavailable(msg) => write!(f, "Route estimate unavailable: {}", msg),

            DispatchError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            DispatchError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            DispatchError::ValidationFailed(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }

            DispatchError::MissingEnvironmentVariable(var) => {
                write!(f, "Missing environment variable: {}", var)
            }
            DispatchError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),

            DispatchError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for DispatchError {}

impl DispatchError {
    /// Stable machine-readable name, used as the `error` field of responses.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::ActiveRideExists => "active_ride_exists",
            DispatchError::RideNotFound(_) => "ride_not_found",
            DispatchError::RideAlreadyTaken(_) => "ride_already_taken",
            DispatchError::InvalidTransition { .. } => "invalid_transition",
            DispatchError::NotOwner(_) => "not_owner",
            DispatchError::RideNotRateable { .. } => "ride_not_rateable",
            DispatchError::RideAlreadyRated(_) => "ride_already_rated",
            DispatchError::RatingNotFound(_) => "rating_not_found",
            DispatchError::DriverBusy => "driver_busy",
            DispatchError::DriverBlocked => "driver_blocked",
            DispatchError::DriverExpired => "driver_expired",
            DispatchError::AccountBlocked => "account_blocked",
            DispatchError::DriverNotFound(_) => "driver_not_found",
            DispatchError::PassengerNotFound(_) => "passenger_not_found",
            DispatchError::StoreUnavailable(_) => "store_unavailable",
            DispatchError::RouteUnavailable(_) => "route_unavailable",
            DispatchError::Unauthorized(_) => "unauthorized",
            DispatchError::Conflict(_) => "conflict",
            DispatchError::ValidationFailed(_) => "validation_failed",
            DispatchError::MissingEnvironmentVariable(_) => "missing_environment_variable",
            DispatchError::InvalidConfiguration(_) => "invalid_configuration",
            DispatchError::Internal(_) => "internal_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::StoreUnavailable(_))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::RideNotFound(_)
            | DispatchError::DriverNotFound(_)
            | DispatchError::PassengerNotFound(_)
            | DispatchError::RatingNotFound(_) => StatusCode::NOT_FOUND,

            DispatchError::ActiveRideExists
            | DispatchError::RideAlreadyTaken(_)
            | DispatchError::InvalidTransition { .. }
            | DispatchError::RideNotRateable { .. }
            | DispatchError::RideAlreadyRated(_)
            | DispatchError::DriverBusy
            | DispatchError::Conflict(_) => StatusCode::CONFLICT,

            DispatchError::NotOwner(_)
            | DispatchError::DriverBlocked
            | DispatchError::DriverExpired
            | DispatchError::AccountBlocked => StatusCode::FORBIDDEN,

            DispatchError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DispatchError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            DispatchError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::RouteUnavailable(_) => StatusCode::BAD_GATEWAY,

            DispatchError::MissingEnvironmentVariable(_)
            | DispatchError::InvalidConfiguration(_)
            | DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let details = match &self {
            DispatchError::ValidationFailed(errors) => serde_json::to_value(errors).ok(),
            DispatchError::InvalidTransition { status, .. } | DispatchError::RideNotRateable { status, .. } => {
                Some(serde_json::json!({ "current_status": status }))
            }
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let error_response = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
            details,
        };

        (status, axum::Json(error_response)).into_response()
    }
}

// Convenience type alias for Results
pub type DispatchResult<T> = Result<T, DispatchError>;

// Conversion implementations for common error types
impl From<redis::RedisError> for DispatchError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::TypeError => DispatchError::Internal(err.to_string()),
            _ => DispatchError::StoreUnavailable(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Internal(format!("Corrupt record: {}", err))
    }
}

// Helper functions for creating common errors
impl DispatchError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        DispatchError::Unauthorized(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        DispatchError::Conflict(msg.into())
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        DispatchError::Internal(msg.into())
    }

    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        DispatchError::ValidationFailed(vec![ValidationError::new(field, message)])
    }

    /// `Ok(())` for an empty list, otherwise `ValidationFailed`.
    pub fn check(errors: Vec<ValidationError>) -> DispatchResult<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::ValidationFailed(errors))
        }
    }
}
