// src/models/ride.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::ValidationError;
use crate::models::driver::DriverContact;
use crate::models::passenger::PassengerContact;

pub type RideId = u64;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Waiting,              // Created, advertised to drivers
    Accepted,             // A driver won the assignment
    InProgress,           // Passenger picked up
    Completed,
    CancelledByPassenger,
    CancelledByDriver,
}

impl RideStatus {
    pub const ALL: [RideStatus; 6] = [
        RideStatus::Waiting,
        RideStatus::Accepted,
        RideStatus::InProgress,
        RideStatus::Completed,
        RideStatus::CancelledByPassenger,
        RideStatus::CancelledByDriver,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Waiting => "waiting",
            RideStatus::Accepted => "accepted",
            RideStatus::InProgress => "in_progress",
            RideStatus::Completed => "completed",
            RideStatus::CancelledByPassenger => "cancelled_by_passenger",
            RideStatus::CancelledByDriver => "cancelled_by_driver",
        }
    }

    /// Waiting, accepted or in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RideStatus::Waiting | RideStatus::Accepted | RideStatus::InProgress
        )
    }

    /// Accepted or in progress: the statuses that hold a driver.
    pub fn holds_driver(&self) -> bool {
        matches!(self, RideStatus::Accepted | RideStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Edges of the ride state machine. Everything else is rejected.
    pub fn can_transition_to(&self, next: RideStatus) -> bool {
        use RideStatus::*;
        matches!(
            (self, next),
            (Waiting, Accepted)
                | (Accepted, InProgress)
                | (InProgress, Completed)
                | (Waiting, CancelledByPassenger)
                | (Accepted, CancelledByPassenger)
                | (InProgress, CancelledByPassenger)
                | (Accepted, CancelledByDriver)
                | (InProgress, CancelledByDriver)
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RideStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError {
                field: "status".to_string(),
                message: format!("Unknown ride status: {}", s),
            })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Ride {
    pub id: RideId,
    pub passenger_id: u64,
    pub driver_id: Option<u64>, // Written once, at waiting -> accepted

    // Route
    pub origin_address: String,
    pub origin: Coordinates,
    pub destination_address: String,
    pub destination: Coordinates,
    pub distance_km: f64,
    pub duration_min: u32,

    pub status: RideStatus,

    // Each written at most once
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to insert a ride in `waiting`.
#[derive(Debug, Clone)]
pub struct NewRide {
    pub passenger_id: u64,
    pub origin_address: String,
    pub origin: Coordinates,
    pub destination_address: String,
    pub destination: Coordinates,
    pub distance_km: f64,
    pub duration_min: u32,
}

impl NewRide {
    pub fn into_ride(self, id: RideId, now: DateTime<Utc>) -> Ride {
        Ride {
            id,
            passenger_id: self.passenger_id,
            driver_id: None,
            origin_address: self.origin_address,
            origin: self.origin,
            destination_address: self.destination_address,
            destination: self.destination,
            distance_km: self.distance_km,
            duration_min: self.duration_min,
            status: RideStatus::Waiting,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampField {
    AcceptedAt,
    StartedAt,
    CompletedAt,
    CancelledAt,
}

impl TimestampField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimestampField::AcceptedAt => "accepted_at",
            TimestampField::StartedAt => "started_at",
            TimestampField::CompletedAt => "completed_at",
            TimestampField::CancelledAt => "cancelled_at",
        }
    }
}

impl Ride {
    pub fn stamp(&mut self, field: TimestampField, at: DateTime<Utc>) {
        let slot = match field {
            TimestampField::AcceptedAt => &mut self.accepted_at,
            TimestampField::StartedAt => &mut self.started_at,
            TimestampField::CompletedAt => &mut self.completed_at,
            TimestampField::CancelledAt => &mut self.cancelled_at,
        };
        if slot.is_none() {
            *slot = Some(at);
        }
        self.updated_at = at;
    }
}

// Request/Response Models
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RideRequest {
    pub origin_address: String,
    pub origin: Coordinates,
    pub destination_address: String,
    pub destination: Coordinates,
    pub distance_km: f64,
    pub duration_min: u32,
}

impl RideRequest {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.origin_address.trim().is_empty() {
            errors.push(ValidationError::new("origin_address", "Origin address is required"));
        }
        if self.destination_address.trim().is_empty() {
            errors.push(ValidationError::new(
                "destination_address",
                "Destination address is required",
            ));
        }
        if !self.origin.is_valid() {
            errors.push(ValidationError::new("origin", "Coordinates out of range"));
        }
        if !self.destination.is_valid() {
            errors.push(ValidationError::new("destination", "Coordinates out of range"));
        }
        if !self.distance_km.is_finite() || self.distance_km < 0.0 {
            errors.push(ValidationError::new("distance_km", "Distance must be a non-negative number"));
        }
        errors
    }

    pub fn for_passenger(self, passenger_id: u64) -> NewRide {
        NewRide {
            passenger_id,
            origin_address: self.origin_address.trim().to_string(),
            origin: self.origin,
            destination_address: self.destination_address.trim().to_string(),
            destination: self.destination,
            distance_km: self.distance_km,
            duration_min: self.duration_min,
        }
    }
}

/// A ride plus the counterpart's contact details, as shown to each actor.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RideView {
    #[serde(flatten)]
    pub ride: Ride,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverContact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passenger: Option<PassengerContact>,
}

/// What a driver sees after following the new-ride link. Same details as
/// the broadcast; the passenger's phone is only shared on acceptance.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RideOffer {
    pub ride_id: RideId,
    pub status: RideStatus,
    pub open: bool, // Still waiting for a driver
    pub passenger_name: String,
    pub passenger_total_rides: u32,
    pub origin_address: String,
    pub destination_address: String,
    pub distance_km: f64,
    pub duration_min: u32,
}

impl RideOffer {
    pub fn new(ride: &Ride, passenger_name: String, passenger_total_rides: u32) -> Self {
        Self {
            ride_id: ride.id,
            status: ride.status,
            open: ride.status == RideStatus::Waiting,
            passenger_name,
            passenger_total_rides,
            origin_address: ride.origin_address.clone(),
            destination_address: ride.destination_address.clone(),
            distance_km: ride.distance_km,
            duration_min: ride.duration_min,
        }
    }
}

// Search and Filter Models
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RideFilter {
    pub status: Option<RideStatus>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl RideFilter {
    pub fn matches(&self, ride: &Ride) -> bool {
        if let Some(status) = self.status {
            if ride.status != status {
                return false;
            }
        }
        if let Some(start) = self.start {
            if ride.created_at < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if ride.created_at > end {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DispatchStats {
    pub total_passengers: u64,
    pub total_drivers: u64,
    pub total_rides: u64,
    pub rides_today: u64,
    pub rides_by_status: BTreeMap<RideStatus, u64>,
}
