// src/services/admin_service.rs
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::{
        driver::{Driver, DriverRegistration, DriverUpdate},
        passenger::{Passenger, PassengerUpdate},
        ride::{DispatchStats, Ride, RideFilter, RideId, RideView},
    },
    services::store::RideStore,
};

#[async_trait]
pub trait AdminOperations: Send + Sync {
    async fn create_driver(&self, registration: DriverRegistration) -> DispatchResult<Driver>;
    async fn update_driver(&self, driver_id: u64, update: DriverUpdate) -> DispatchResult<Driver>;
    async fn list_drivers(&self, search: Option<&str>) -> DispatchResult<Vec<Driver>>;
    async fn reconcile_driver(&self, driver_id: u64) -> DispatchResult<Driver>;
    async fn update_passenger(&self, passenger_id: u64, update: PassengerUpdate) -> DispatchResult<Passenger>;
    async fn list_passengers(&self, search: Option<&str>) -> DispatchResult<Vec<Passenger>>;
    async fn list_rides(&self, filter: RideFilter) -> DispatchResult<Vec<Ride>>;
    async fn ride_details(&self, ride_id: RideId) -> DispatchResult<RideView>;
    async fn stats(&self) -> DispatchResult<DispatchStats>;
}

pub struct AdminService {
    store: Arc<dyn RideStore>,
}

impl AdminService {
    pub fn new(store: Arc<dyn RideStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AdminOperations for AdminService {
    async fn create_driver(&self, registration: DriverRegistration) -> DispatchResult<Driver> {
        DispatchError::check(registration.validate())?;
        tracing::info!("Registering driver: {}", registration.name.trim());

        let driver = self.store.insert_driver(registration).await?;
        tracing::info!(driver_id = driver.id, "Driver registered");
        Ok(driver)
    }

    async fn update_driver(&self, driver_id: u64, update: DriverUpdate) -> DispatchResult<Driver> {
        DispatchError::check(update.validate())?;
        tracing::info!(driver_id, "Updating driver");

        let driver = self
            .store
            .update_driver(driver_id, update)
            .await?
            .ok_or(DispatchError::DriverNotFound(driver_id))?;
        if driver.is_blocked && !driver.is_available {
            // Holding a ride is left alone; the driver just can't act on it
            tracing::warn!(driver_id, "Blocked driver still holds an active ride");
        }
        Ok(driver)
    }

    async fn list_drivers(&self, search: Option<&str>) -> DispatchResult<Vec<Driver>> {
        self.store.list_drivers(search).await
    }

    async fn reconcile_driver(&self, driver_id: u64) -> DispatchResult<Driver> {
        let active = self.store.active_ride_for_driver(driver_id).await?;
        let available = active.is_none();

        let stored = self
            .store
            .set_driver_availability(driver_id, available)
            .await?
            .ok_or(DispatchError::DriverNotFound(driver_id))?;
        if stored != available {
            // An assignment landed between the two reads; the store kept it
            tracing::info!(driver_id, "Availability changed during reconcile, keeping stored value");
        }
        tracing::info!(driver_id, available = stored, "Driver availability reconciled");

        self.store
            .get_driver(driver_id)
            .await?
            .ok_or(DispatchError::DriverNotFound(driver_id))
    }

    async fn update_passenger(&self, passenger_id: u64, update: PassengerUpdate) -> DispatchResult<Passenger> {
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(DispatchError::validation_error("name", "Name is required"));
            }
        }
        tracing::info!(passenger_id, "Updating passenger");

        self.store
            .update_passenger(passenger_id, update)
            .await?
            .ok_or(DispatchError::PassengerNotFound(passenger_id))
    }

    async fn list_passengers(&self, search: Option<&str>) -> DispatchResult<Vec<Passenger>> {
        self.store.list_passengers(search).await
    }

    async fn list_rides(&self, filter: RideFilter) -> DispatchResult<Vec<Ride>> {
        if let (Some(start), Some(end)) = (filter.start, filter.end) {
            if start > end {
                return Err(DispatchError::validation_error("start", "Start must not be after end"));
            }
        }
        self.store.list_rides(&filter).await
    }

    async fn ride_details(&self, ride_id: RideId) -> DispatchResult<RideView> {
        let ride = self
            .store
            .get_ride(ride_id)
            .await?
            .ok_or(DispatchError::RideNotFound(ride_id))?;

        let driver = async {
            match ride.driver_id {
                Some(driver_id) => Ok::<_, DispatchError>(self.store.get_driver(driver_id).await?.map(|d| d.contact())),
                None => Ok(None),
            }
        };
        let passenger = async {
            Ok::<_, DispatchError>(self.store.get_passenger(ride.passenger_id).await?.map(|p| p.contact()))
        };
        let (driver, passenger) = futures::try_join!(driver, passenger)?;

        Ok(RideView {
            ride,
            driver,
            passenger,
        })
    }

    async fn stats(&self) -> DispatchResult<DispatchStats> {
        self.store.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        driver::Vehicle,
        passenger::PassengerRegistration,
        ride::{Coordinates, NewRide},
    };
    use crate::services::store::MemoryRideStore;
    use chrono::Utc;

    fn registration(phone: &str) -> DriverRegistration {
        DriverRegistration {
            name: "Carlos".to_string(),
            phone: phone.to_string(),
            vehicle: Vehicle {
                model: "Gol".to_string(),
                color: "White".to_string(),
                plate: "abc1234".to_string(),
            },
            expires_at: Utc::now() + chrono::Duration::days(30),
        }
    }

    #[tokio::test]
    async fn test_create_driver_validates_and_rejects_duplicates() {
        let admin = AdminService::new(Arc::new(MemoryRideStore::new()));

        let err = admin.create_driver(registration("123")).await.unwrap_err();
        assert!(matches!(err, DispatchError::ValidationFailed(_)));

        let driver = admin.create_driver(registration("5511988888888")).await.unwrap();
        assert_eq!(driver.vehicle.plate, "ABC1234");

        let err = admin.create_driver(registration("55 11 98888-8888")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
        assert_eq!(admin.list_drivers(Some("abc")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_driver_normalizes_vehicle() {
        let admin = AdminService::new(Arc::new(MemoryRideStore::new()));
        let driver = admin.create_driver(registration("5511988888888")).await.unwrap();

        let err = admin
            .update_driver(
                driver.id,
                DriverUpdate {
                    vehicle: Some(Vehicle {
                        model: String::new(),
                        color: "Red".to_string(),
                        plate: "def5678".to_string(),
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ValidationFailed(_)));

        let updated = admin
            .update_driver(
                driver.id,
                DriverUpdate {
                    vehicle: Some(Vehicle {
                        model: "Onix ".to_string(),
                        color: "Red".to_string(),
                        plate: " def5678".to_string(),
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.vehicle.plate, "DEF5678");
        assert_eq!(updated.vehicle.model, "Onix");
        assert_eq!(admin.list_drivers(Some("def5")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_follows_active_ride() {
        let store: Arc<dyn RideStore> = Arc::new(MemoryRideStore::new());
        let admin = AdminService::new(store.clone());
        let driver = admin.create_driver(registration("5511988888888")).await.unwrap();
        let passenger = store
            .find_or_create_passenger(PassengerRegistration {
                name: "Ana".to_string(),
                phone: "5511999999999".to_string(),
            })
            .await
            .unwrap();
        let ride = store
            .create_ride(NewRide {
                passenger_id: passenger.id,
                origin_address: "A".to_string(),
                origin: Coordinates::new(0.0, 0.0),
                destination_address: "B".to_string(),
                destination: Coordinates::new(0.0, 0.1),
                distance_km: 11.0,
                duration_min: 22,
            })
            .await
            .unwrap();
        store.conditional_assign(ride.id, driver.id).await.unwrap();

        let reconciled = admin.reconcile_driver(driver.id).await.unwrap();
        assert!(!reconciled.is_available);

        let details = admin.ride_details(ride.id).await.unwrap();
        assert_eq!(details.driver.unwrap().name, "Carlos");
        assert_eq!(details.passenger.unwrap().name, "Ana");

        assert!(matches!(
            admin.reconcile_driver(999).await,
            Err(DispatchError::DriverNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_list_rides_rejects_inverted_range() {
        let admin = AdminService::new(Arc::new(MemoryRideStore::new()));
        let now = Utc::now();
        let filter = RideFilter {
            status: None,
            start: Some(now),
            end: Some(now - chrono::Duration::days(1)),
        };
        assert!(matches!(
            admin.list_rides(filter).await,
            Err(DispatchError::ValidationFailed(_))
        ));
    }
}
