// src/services/store/memory.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{AssignOutcome, EntityType, RatingOutcome, RideStore, Transition, TransitionOutcome};
use crate::{
    errors::{DispatchError, DispatchResult},
    models::{
        driver::{Driver, DriverRegistration, DriverUpdate},
        passenger::{Passenger, PassengerRegistration, PassengerUpdate},
        rating::{NewRating, Rating, RatingFilter, RatingUpdate},
        ride::{DispatchStats, NewRide, Ride, RideFilter, RideId, RideStatus, TimestampField},
    },
    utils::phone::normalize_phone,
};

#[derive(Default)]
struct Tables {
    rides: BTreeMap<RideId, Ride>,
    drivers: BTreeMap<u64, Driver>,
    passengers: BTreeMap<u64, Passenger>,
    ratings: BTreeMap<u64, Rating>,
    rating_by_ride: HashMap<RideId, u64>,
    active_by_passenger: HashMap<u64, RideId>,
    active_by_driver: HashMap<u64, RideId>,
    driver_phones: HashMap<String, u64>,
    passenger_phones: HashMap<String, u64>,
    last_ride_id: u64,
    last_driver_id: u64,
    last_passenger_id: u64,
    last_rating_id: u64,
}

impl Tables {
    fn set_driver_availability(&mut self, driver_id: u64, available: bool, now: DateTime<Utc>) {
        if let Some(driver) = self.drivers.get_mut(&driver_id) {
            driver.is_available = available;
            driver.updated_at = now;
        }
    }

    fn increment_ride_counter(&mut self, entity: EntityType, id: u64, now: DateTime<Utc>) {
        match entity {
            EntityType::Passenger => {
                if let Some(passenger) = self.passengers.get_mut(&id) {
                    passenger.total_rides += 1;
                    passenger.updated_at = now;
                }
            }
            EntityType::Driver => {
                if let Some(driver) = self.drivers.get_mut(&id) {
                    driver.total_rides += 1;
                    driver.updated_at = now;
                }
            }
        }
    }

    fn newest_first(&self, ids: impl Iterator<Item = RideId>) -> Vec<Ride> {
        let mut rides: Vec<Ride> = ids.filter_map(|id| self.rides.get(&id).cloned()).collect();
        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rides
    }
}

/// In-process store for development and tests. A single write lock covers
/// every check-and-write, which makes each operation atomic.
#[derive(Default)]
pub struct MemoryRideStore {
    tables: RwLock<Tables>,
}

impl MemoryRideStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RideStore for MemoryRideStore {
    async fn create_ride(&self, ride: NewRide) -> DispatchResult<Ride> {
        let mut tables = self.tables.write().await;

        if !tables.passengers.contains_key(&ride.passenger_id) {
            return Err(DispatchError::PassengerNotFound(ride.passenger_id));
        }
        if tables.active_by_passenger.contains_key(&ride.passenger_id) {
            return Err(DispatchError::ActiveRideExists);
        }

        tables.last_ride_id += 1;
        let ride = ride.into_ride(tables.last_ride_id, Utc::now());
        tables.active_by_passenger.insert(ride.passenger_id, ride.id);
        tables.rides.insert(ride.id, ride.clone());
        Ok(ride)
    }

    async fn conditional_assign(&self, ride_id: RideId, driver_id: u64) -> DispatchResult<AssignOutcome> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();

        let Some(driver) = tables.drivers.get(&driver_id) else {
            return Ok(AssignOutcome::DriverNotFound);
        };
        let driver_available = driver.is_available;
        let Some(ride) = tables.rides.get_mut(&ride_id) else {
            return Ok(AssignOutcome::RideNotFound);
        };
        if !driver_available {
            return Ok(AssignOutcome::DriverBusy);
        }
        if ride.status != RideStatus::Waiting {
            return Ok(AssignOutcome::AlreadyTaken);
        }

        ride.status = RideStatus::Accepted;
        ride.driver_id = Some(driver_id);
        ride.stamp(TimestampField::AcceptedAt, now);
        let ride = ride.clone();

        tables.set_driver_availability(driver_id, false, now);
        tables.active_by_driver.insert(driver_id, ride_id);
        Ok(AssignOutcome::Assigned(ride))
    }

    async fn conditional_transition(&self, ride_id: RideId, transition: Transition) -> DispatchResult<TransitionOutcome> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();

        let Some(ride) = tables.rides.get_mut(&ride_id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if let Some(rejected) = transition.check(ride) {
            return Ok(rejected);
        }

        ride.status = transition.next;
        ride.stamp(transition.stamp, now);
        let ride = ride.clone();

        let mut released_driver = None;
        if let Some(driver_id) = ride.driver_id {
            if transition.effects.release_driver {
                tables.set_driver_availability(driver_id, true, now);
                released_driver = Some(driver_id);
            }
            if transition.effects.count_completion {
                tables.increment_ride_counter(EntityType::Driver, driver_id, now);
            }
            if transition.next.is_terminal() {
                tables.active_by_driver.remove(&driver_id);
            }
        }
        if transition.effects.count_completion {
            tables.increment_ride_counter(EntityType::Passenger, ride.passenger_id, now);
        }
        if transition.next.is_terminal() {
            tables.active_by_passenger.remove(&ride.passenger_id);
        }

        Ok(TransitionOutcome::Applied { ride, released_driver })
    }

    async fn get_ride(&self, ride_id: RideId) -> DispatchResult<Option<Ride>> {
        Ok(self.tables.read().await.rides.get(&ride_id).cloned())
    }

    async fn active_ride_for_passenger(&self, passenger_id: u64) -> DispatchResult<Option<Ride>> {
        let tables = self.tables.read().await;
        Ok(tables
            .active_by_passenger
            .get(&passenger_id)
            .and_then(|id| tables.rides.get(id))
            .cloned())
    }

    async fn active_ride_for_driver(&self, driver_id: u64) -> DispatchResult<Option<Ride>> {
        let tables = self.tables.read().await;
        Ok(tables
            .active_by_driver
            .get(&driver_id)
            .and_then(|id| tables.rides.get(id))
            .filter(|ride| ride.status.holds_driver())
            .cloned())
    }

    async fn rides_for_passenger(&self, passenger_id: u64) -> DispatchResult<Vec<Ride>> {
        let tables = self.tables.read().await;
        let ids = tables
            .rides
            .values()
            .filter(|ride| ride.passenger_id == passenger_id)
            .map(|ride| ride.id);
        Ok(tables.newest_first(ids))
    }

    async fn rides_for_driver(&self, driver_id: u64) -> DispatchResult<Vec<Ride>> {
        let tables = self.tables.read().await;
        let ids = tables
            .rides
            .values()
            .filter(|ride| ride.driver_id == Some(driver_id))
            .map(|ride| ride.id);
        Ok(tables.newest_first(ids))
    }

    async fn list_rides(&self, filter: &RideFilter) -> DispatchResult<Vec<Ride>> {
        let tables = self.tables.read().await;
        let ids = tables
            .rides
            .values()
            .filter(|ride| filter.matches(ride))
            .map(|ride| ride.id);
        Ok(tables.newest_first(ids))
    }

    async fn insert_driver(&self, registration: DriverRegistration) -> DispatchResult<Driver> {
        let mut tables = self.tables.write().await;
        let phone = normalize_phone(&registration.phone);
        if tables.driver_phones.contains_key(&phone) {
            return Err(DispatchError::conflict(format!("Driver already registered: {}", phone)));
        }

        tables.last_driver_id += 1;
        let driver = registration.into_driver(tables.last_driver_id, Utc::now());
        tables.driver_phones.insert(driver.phone.clone(), driver.id);
        tables.drivers.insert(driver.id, driver.clone());
        Ok(driver)
    }

    async fn get_driver(&self, driver_id: u64) -> DispatchResult<Option<Driver>> {
        Ok(self.tables.read().await.drivers.get(&driver_id).cloned())
    }

    async fn update_driver(&self, driver_id: u64, update: DriverUpdate) -> DispatchResult<Option<Driver>> {
        let mut tables = self.tables.write().await;
        Ok(tables.drivers.get_mut(&driver_id).map(|driver| {
            update.apply(driver, Utc::now());
            driver.clone()
        }))
    }

    async fn set_driver_availability(&self, driver_id: u64, available: bool) -> DispatchResult<Option<bool>> {
        let mut tables = self.tables.write().await;
        let holds_ride = tables.active_by_driver.contains_key(&driver_id);
        let Some(current) = tables.drivers.get(&driver_id).map(|d| d.is_available) else {
            return Ok(None);
        };
        if available == holds_ride {
            tracing::warn!(driver_id, available, "Refusing availability that contradicts the driver's active ride");
            return Ok(Some(current));
        }
        tables.set_driver_availability(driver_id, available, Utc::now());
        Ok(Some(available))
    }

    async fn list_drivers(&self, search: Option<&str>) -> DispatchResult<Vec<Driver>> {
        let tables = self.tables.read().await;
        let mut drivers: Vec<Driver> = tables
            .drivers
            .values()
            .filter(|driver| search.map_or(true, |needle| driver.matches_search(needle)))
            .cloned()
            .collect();
        drivers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(drivers)
    }

    async fn find_or_create_passenger(&self, registration: PassengerRegistration) -> DispatchResult<Passenger> {
        let mut tables = self.tables.write().await;
        let phone = normalize_phone(&registration.phone);
        if let Some(existing) = tables.passenger_phones.get(&phone).and_then(|id| tables.passengers.get(id)) {
            return Ok(existing.clone());
        }

        tables.last_passenger_id += 1;
        let passenger = registration.into_passenger(tables.last_passenger_id, Utc::now());
        tables.passenger_phones.insert(passenger.phone.clone(), passenger.id);
        tables.passengers.insert(passenger.id, passenger.clone());
        Ok(passenger)
    }

    async fn get_passenger(&self, passenger_id: u64) -> DispatchResult<Option<Passenger>> {
        Ok(self.tables.read().await.passengers.get(&passenger_id).cloned())
    }

    async fn update_passenger(&self, passenger_id: u64, update: PassengerUpdate) -> DispatchResult<Option<Passenger>> {
        let mut tables = self.tables.write().await;
        Ok(tables.passengers.get_mut(&passenger_id).map(|passenger| {
            update.apply(passenger, Utc::now());
            passenger.clone()
        }))
    }

    async fn list_passengers(&self, search: Option<&str>) -> DispatchResult<Vec<Passenger>> {
        let tables = self.tables.read().await;
        let mut passengers: Vec<Passenger> = tables
            .passengers
            .values()
            .filter(|passenger| search.map_or(true, |needle| passenger.matches_search(needle)))
            .cloned()
            .collect();
        passengers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(passengers)
    }

    async fn insert_rating(&self, rating: NewRating) -> DispatchResult<RatingOutcome> {
        let mut tables = self.tables.write().await;

        let Some(ride) = tables.rides.get(&rating.ride_id) else {
            return Ok(RatingOutcome::RideNotFound);
        };
        if let Some(rejected) = RatingOutcome::check(ride, &rating) {
            return Ok(rejected);
        }
        let Some(driver_id) = ride.driver_id else {
            return Err(DispatchError::internal_error(format!("Completed ride {} has no driver", ride.id)));
        };
        if tables.rating_by_ride.contains_key(&rating.ride_id) {
            return Ok(RatingOutcome::AlreadyRated);
        }

        tables.last_rating_id += 1;
        let rating = rating.into_rating(tables.last_rating_id, driver_id, Utc::now());
        tables.rating_by_ride.insert(rating.ride_id, rating.id);
        tables.ratings.insert(rating.id, rating.clone());
        Ok(RatingOutcome::Rated(rating))
    }

    async fn get_rating(&self, rating_id: u64) -> DispatchResult<Option<Rating>> {
        Ok(self.tables.read().await.ratings.get(&rating_id).cloned())
    }

    async fn rating_for_ride(&self, ride_id: RideId) -> DispatchResult<Option<Rating>> {
        let tables = self.tables.read().await;
        Ok(tables
            .rating_by_ride
            .get(&ride_id)
            .and_then(|id| tables.ratings.get(id))
            .cloned())
    }

    async fn list_ratings(&self, filter: &RatingFilter) -> DispatchResult<Vec<Rating>> {
        let tables = self.tables.read().await;
        let mut ratings: Vec<Rating> = tables
            .ratings
            .values()
            .filter(|rating| filter.matches(rating))
            .cloned()
            .collect();
        ratings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(ratings)
    }

    async fn update_rating(&self, rating_id: u64, update: RatingUpdate) -> DispatchResult<Option<Rating>> {
        let mut tables = self.tables.write().await;
        Ok(tables.ratings.get_mut(&rating_id).map(|rating| {
            update.apply(rating, Utc::now());
            rating.clone()
        }))
    }

    async fn delete_rating(&self, rating_id: u64) -> DispatchResult<bool> {
        let mut tables = self.tables.write().await;
        let Some(rating) = tables.ratings.remove(&rating_id) else {
            return Ok(false);
        };
        tables.rating_by_ride.remove(&rating.ride_id);
        Ok(true)
    }

    async fn stats(&self) -> DispatchResult<DispatchStats> {
        let tables = self.tables.read().await;
        let today = Utc::now().date_naive();
        let mut stats = DispatchStats {
            total_passengers: tables.passengers.len() as u64,
            total_drivers: tables.drivers.len() as u64,
            total_rides: tables.rides.len() as u64,
            ..Default::default()
        };
        for ride in tables.rides.values() {
            *stats.rides_by_status.entry(ride.status).or_insert(0) += 1;
            if ride.created_at.date_naive() == today {
                stats.rides_today += 1;
            }
        }
        Ok(stats)
    }
}
