// src/services/store/mod.rs
//! Durable state for rides, drivers and passengers.
//!
//! Every method that changes a ride's status checks its precondition and
//! writes in one atomic step, so concurrent callers can never both win.
//! Driver availability, active-ride pointers and completion counters are
//! updated inside that same step.

use async_trait::async_trait;

use crate::{
    errors::DispatchResult,
    models::{
        driver::{Driver, DriverRegistration, DriverUpdate},
        passenger::{Passenger, PassengerRegistration, PassengerUpdate},
        rating::{NewRating, Rating, RatingFilter, RatingUpdate},
        ride::{DispatchStats, NewRide, Ride, RideFilter, RideId, RideStatus, TimestampField},
    },
};

pub mod memory;
pub mod redis;

pub use self::memory::MemoryRideStore;
pub use self::redis::{RedisRideStore, StoreConfig};

/// Which record a counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Passenger,
    Driver,
}

/// Who must own the ride for a transition to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideOwner {
    Passenger(u64),
    Driver(u64),
}

impl RideOwner {
    pub fn owns(&self, ride: &Ride) -> bool {
        match self {
            RideOwner::Passenger(id) => ride.passenger_id == *id,
            RideOwner::Driver(id) => ride.driver_id == Some(*id),
        }
    }
}

/// Side effects applied in the same atomic step as a successful transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionEffects {
    /// Set the assigned driver's availability back to true.
    pub release_driver: bool,
    /// Increment `total_rides` on both the passenger and the driver.
    pub count_completion: bool,
}

/// A conditional status change: applies only if the ride is currently in one
/// of `expected` and `owner` matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub expected: &'static [RideStatus],
    pub next: RideStatus,
    pub owner: RideOwner,
    pub stamp: TimestampField,
    pub effects: TransitionEffects,
}

impl Transition {
    pub fn start(driver_id: u64) -> Self {
        Self {
            expected: &[RideStatus::Accepted],
            next: RideStatus::InProgress,
            owner: RideOwner::Driver(driver_id),
            stamp: TimestampField::StartedAt,
            effects: TransitionEffects::default(),
        }
    }

    pub fn complete(driver_id: u64) -> Self {
        Self {
            expected: &[RideStatus::InProgress],
            next: RideStatus::Completed,
            owner: RideOwner::Driver(driver_id),
            stamp: TimestampField::CompletedAt,
            effects: TransitionEffects {
                release_driver: true,
                count_completion: true,
            },
        }
    }

    pub fn cancel_by_passenger(passenger_id: u64) -> Self {
        Self {
            expected: &[RideStatus::Waiting, RideStatus::Accepted],
            next: RideStatus::CancelledByPassenger,
            owner: RideOwner::Passenger(passenger_id),
            stamp: TimestampField::CancelledAt,
            effects: TransitionEffects {
                release_driver: true,
                count_completion: false,
            },
        }
    }

    pub fn cancel_by_driver(driver_id: u64) -> Self {
        Self {
            expected: &[RideStatus::Accepted, RideStatus::InProgress],
            next: RideStatus::CancelledByDriver,
            owner: RideOwner::Driver(driver_id),
            stamp: TimestampField::CancelledAt,
            effects: TransitionEffects {
                release_driver: true,
                count_completion: false,
            },
        }
    }

    /// Precondition check shared by every backend. Status is checked before
    /// ownership, so an unassigned `waiting` ride reports `InvalidTransition`.
    pub fn check(&self, ride: &Ride) -> Option<TransitionOutcome> {
        if !self.expected.contains(&ride.status) || !ride.status.can_transition_to(self.next) {
            return Some(TransitionOutcome::InvalidTransition(ride.status));
        }
        if !self.owner.owns(ride) {
            return Some(TransitionOutcome::NotOwner);
        }
        None
    }
}

#[derive(Debug, Clone)]
pub enum AssignOutcome {
    Assigned(Ride),
    AlreadyTaken,
    DriverBusy,
    RideNotFound,
    DriverNotFound,
}

#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The ride after the transition. `released_driver` is the driver freed by
    /// this step, if any.
    Applied { ride: Ride, released_driver: Option<u64> },
    NotFound,
    NotOwner,
    InvalidTransition(RideStatus),
}

#[derive(Debug, Clone)]
pub enum RatingOutcome {
    Rated(Rating),
    AlreadyRated,
    RideNotFound,
    NotOwner,
    NotCompleted(RideStatus),
}

impl RatingOutcome {
    /// Checks shared by every backend, in the order they are reported.
    pub fn check(ride: &Ride, rating: &NewRating) -> Option<RatingOutcome> {
        if ride.passenger_id != rating.passenger_id {
            return Some(RatingOutcome::NotOwner);
        }
        if ride.status != RideStatus::Completed {
            return Some(RatingOutcome::NotCompleted(ride.status));
        }
        None
    }
}

#[async_trait]
pub trait RideStore: Send + Sync {
    // Rides
    /// Inserts a `waiting` ride unless the passenger already has an active one.
    async fn create_ride(&self, ride: NewRide) -> DispatchResult<Ride>;
    /// `waiting -> accepted` for a driver that is currently available.
    async fn conditional_assign(&self, ride_id: RideId, driver_id: u64) -> DispatchResult<AssignOutcome>;
    async fn conditional_transition(&self, ride_id: RideId, transition: Transition) -> DispatchResult<TransitionOutcome>;
    async fn get_ride(&self, ride_id: RideId) -> DispatchResult<Option<Ride>>;
    async fn active_ride_for_passenger(&self, passenger_id: u64) -> DispatchResult<Option<Ride>>;
    async fn active_ride_for_driver(&self, driver_id: u64) -> DispatchResult<Option<Ride>>;
    async fn rides_for_passenger(&self, passenger_id: u64) -> DispatchResult<Vec<Ride>>;
    async fn rides_for_driver(&self, driver_id: u64) -> DispatchResult<Vec<Ride>>;
    /// Newest first.
    async fn list_rides(&self, filter: &RideFilter) -> DispatchResult<Vec<Ride>>;

    // Drivers
    async fn insert_driver(&self, registration: DriverRegistration) -> DispatchResult<Driver>;
    async fn get_driver(&self, driver_id: u64) -> DispatchResult<Option<Driver>>;
    async fn update_driver(&self, driver_id: u64, update: DriverUpdate) -> DispatchResult<Option<Driver>>;
    /// Sets availability to `available` only if that agrees with the driver's
    /// active-ride pointer; returns the stored value afterwards.
    async fn set_driver_availability(&self, driver_id: u64, available: bool) -> DispatchResult<Option<bool>>;
    async fn list_drivers(&self, search: Option<&str>) -> DispatchResult<Vec<Driver>>;

    // Passengers
    /// Returns the existing passenger for the phone, or creates one.
    async fn find_or_create_passenger(&self, registration: PassengerRegistration) -> DispatchResult<Passenger>;
    async fn get_passenger(&self, passenger_id: u64) -> DispatchResult<Option<Passenger>>;
    async fn update_passenger(&self, passenger_id: u64, update: PassengerUpdate) -> DispatchResult<Option<Passenger>>;
    async fn list_passengers(&self, search: Option<&str>) -> DispatchResult<Vec<Passenger>>;

    // Ratings
    /// Stores the rating if the ride is completed, belongs to the rating
    /// passenger and has no rating yet. Checked and written in one step.
    async fn insert_rating(&self, rating: NewRating) -> DispatchResult<RatingOutcome>;
    async fn get_rating(&self, rating_id: u64) -> DispatchResult<Option<Rating>>;
    async fn rating_for_ride(&self, ride_id: RideId) -> DispatchResult<Option<Rating>>;
    /// Newest first.
    async fn list_ratings(&self, filter: &RatingFilter) -> DispatchResult<Vec<Rating>>;
    async fn update_rating(&self, rating_id: u64, update: RatingUpdate) -> DispatchResult<Option<Rating>>;
    /// `false` if there was no such rating.
    async fn delete_rating(&self, rating_id: u64) -> DispatchResult<bool>;

    async fn stats(&self) -> DispatchResult<DispatchStats>;
}
