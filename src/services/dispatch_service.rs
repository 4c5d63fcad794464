// src/services/dispatch_service.rs
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::{
        actor::Identity,
        driver::{Driver, DriverContact},
        messages::Notification,
        passenger::{Passenger, PassengerContact},
        ride::{Ride, RideId, RideOffer, RideRequest, RideView},
    },
    services::{
        message_templates::MessageTemplates,
        notification_dispatcher::NotificationDispatcher,
        store::{AssignOutcome, RideStore, Transition, TransitionOutcome},
    },
};

/// Result of a committed mutation. `warnings` lists messages that could not
/// be delivered; the state change stands regardless.
#[derive(Debug, Serialize, Clone)]
pub struct DispatchOutcome<T> {
    pub data: T,
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait DispatchOperations: Send + Sync {
    async fn request_ride(&self, passenger: &Passenger, request: RideRequest) -> DispatchResult<DispatchOutcome<Ride>>;
    async fn accept_ride(&self, driver: &Driver, ride_id: RideId) -> DispatchResult<DispatchOutcome<RideView>>;
    async fn start_ride(&self, driver: &Driver, ride_id: RideId) -> DispatchResult<DispatchOutcome<Ride>>;
    async fn complete_ride(&self, driver: &Driver, ride_id: RideId) -> DispatchResult<DispatchOutcome<Ride>>;
    async fn cancel_ride_by_passenger(&self, passenger: &Passenger, ride_id: RideId) -> DispatchResult<DispatchOutcome<Ride>>;
    async fn cancel_ride_by_driver(&self, driver: &Driver, ride_id: RideId) -> DispatchResult<DispatchOutcome<Ride>>;

    async fn active_ride_for_passenger(&self, passenger_id: u64) -> DispatchResult<Option<RideView>>;
    async fn active_ride_for_driver(&self, driver_id: u64) -> DispatchResult<Option<RideView>>;
    async fn ride_history_for_passenger(&self, passenger_id: u64) -> DispatchResult<Vec<RideView>>;
    async fn ride_history_for_driver(&self, driver_id: u64) -> DispatchResult<Vec<RideView>>;
}

pub struct DispatchService {
    store: Arc<dyn RideStore>,
    notifications: Arc<NotificationDispatcher>,
    templates: Arc<MessageTemplates>,
    public_base_url: String,
}

impl DispatchService {
    pub fn new(
        store: Arc<dyn RideStore>,
        notifications: Arc<NotificationDispatcher>,
        templates: Arc<MessageTemplates>,
        public_base_url: &str,
    ) -> Self {
        Self {
            store,
            notifications,
            templates,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Link sent in the new-ride broadcast. It opens [`Self::ride_offer`].
    pub fn accept_link(&self, ride_id: RideId) -> String {
        format!("{}/rides/{}/accept", self.public_base_url, ride_id)
    }

    pub async fn ride_offer(&self, ride_id: RideId) -> DispatchResult<RideOffer> {
        let ride = self
            .store
            .get_ride(ride_id)
            .await?
            .ok_or(DispatchError::RideNotFound(ride_id))?;
        let passenger = self.load_passenger(ride.passenger_id).await?;
        Ok(RideOffer::new(&ride, passenger.name, passenger.total_rides))
    }

    /// Cancels on behalf of whoever the caller is.
    pub async fn cancel_ride(&self, identity: &Identity, ride_id: RideId) -> DispatchResult<DispatchOutcome<Ride>> {
        match identity {
            Identity::Passenger(passenger) => self.cancel_ride_by_passenger(passenger, ride_id).await,
            Identity::Driver(driver) => self.cancel_ride_by_driver(driver, ride_id).await,
            Identity::Admin => Err(DispatchError::unauthorized("Admins cannot cancel rides")),
        }
    }

    async fn load_passenger(&self, passenger_id: u64) -> DispatchResult<Passenger> {
        self.store
            .get_passenger(passenger_id)
            .await?
            .ok_or(DispatchError::PassengerNotFound(passenger_id))
    }

    async fn load_driver(&self, driver_id: u64) -> DispatchResult<Driver> {
        self.store
            .get_driver(driver_id)
            .await?
            .ok_or(DispatchError::DriverNotFound(driver_id))
    }

    /// Runs after the store has committed. Building or sending the batch can
    /// only produce warnings.
    async fn after_commit<F>(&self, ride_id: RideId, batch: F) -> Vec<String>
    where
        F: Future<Output = DispatchResult<Vec<Notification>>> + Send,
    {
        match batch.await {
            Ok(batch) => self.notifications.dispatch(batch).await,
            Err(e) => {
                tracing::warn!(ride_id, "Could not prepare notifications: {}", e);
                vec![format!("Notifications skipped: {}", e)]
            }
        }
    }

    async fn transition(&self, ride_id: RideId, transition: Transition) -> DispatchResult<(Ride, Option<u64>)> {
        match self.store.conditional_transition(ride_id, transition).await? {
            TransitionOutcome::Applied { ride, released_driver } => Ok((ride, released_driver)),
            TransitionOutcome::NotFound => Err(DispatchError::RideNotFound(ride_id)),
            TransitionOutcome::NotOwner => Err(DispatchError::NotOwner(ride_id)),
            TransitionOutcome::InvalidTransition(status) => {
                tracing::debug!(ride_id, %status, next = %transition.next, "Transition rejected");
                Err(DispatchError::InvalidTransition { ride_id, status })
            }
        }
    }

    fn driver_contacts<'a>(&'a self) -> ContactCache<'a, Driver> {
        ContactCache::new(self)
    }

    fn passenger_contacts<'a>(&'a self) -> ContactCache<'a, Passenger> {
        ContactCache::new(self)
    }

    async fn view_for_passenger(&self, ride: Ride, drivers: &mut ContactCache<'_, Driver>) -> DispatchResult<RideView> {
        let driver = match ride.driver_id {
            Some(driver_id) => drivers.driver(driver_id).await?,
            None => None,
        };
        Ok(RideView {
            ride,
            driver,
            passenger: None,
        })
    }

    async fn view_for_driver(&self, ride: Ride, passengers: &mut ContactCache<'_, Passenger>) -> DispatchResult<RideView> {
        let passenger = passengers.passenger(ride.passenger_id).await?;
        Ok(RideView {
            ride,
            driver: None,
            passenger,
        })
    }
}

/// Looks up each counterpart once while building a list of views.
struct ContactCache<'a, T> {
    service: &'a DispatchService,
    seen: HashMap<u64, Option<T>>,
}

impl<'a, T: Clone> ContactCache<'a, T> {
    fn new(service: &'a DispatchService) -> Self {
        Self {
            service,
            seen: HashMap::new(),
        }
    }
}

impl ContactCache<'_, Driver> {
    async fn driver(&mut self, driver_id: u64) -> DispatchResult<Option<DriverContact>> {
        if !self.seen.contains_key(&driver_id) {
            let driver = self.service.store.get_driver(driver_id).await?;
            self.seen.insert(driver_id, driver);
        }
        Ok(self.seen.get(&driver_id).and_then(|d| d.as_ref()).map(Driver::contact))
    }
}

impl ContactCache<'_, Passenger> {
    async fn passenger(&mut self, passenger_id: u64) -> DispatchResult<Option<PassengerContact>> {
        if !self.seen.contains_key(&passenger_id) {
            let passenger = self.service.store.get_passenger(passenger_id).await?;
            self.seen.insert(passenger_id, passenger);
        }
        Ok(self.seen.get(&passenger_id).and_then(|p| p.as_ref()).map(Passenger::contact))
    }
}

#[async_trait]
impl DispatchOperations for DispatchService {
    async fn request_ride(&self, passenger: &Passenger, request: RideRequest) -> DispatchResult<DispatchOutcome<Ride>> {
        if passenger.is_blocked {
            return Err(DispatchError::AccountBlocked);
        }
        DispatchError::check(request.validate())?;

        tracing::info!(passenger_id = passenger.id, "Requesting ride");
        let ride = self.store.create_ride(request.for_passenger(passenger.id)).await?;
        tracing::info!(ride_id = ride.id, passenger_id = passenger.id, "Ride created, waiting for a driver");

        let link = self.accept_link(ride.id);
        let warnings = self
            .after_commit(ride.id, async { Ok(self.templates.new_ride(&ride, passenger, &link)) })
            .await;

        Ok(DispatchOutcome { data: ride, warnings })
    }

    async fn accept_ride(&self, driver: &Driver, ride_id: RideId) -> DispatchResult<DispatchOutcome<RideView>> {
        if driver.is_blocked {
            return Err(DispatchError::DriverBlocked);
        }
        if driver.is_expired(Utc::now()) {
            return Err(DispatchError::DriverExpired);
        }

        tracing::info!(ride_id, driver_id = driver.id, "Driver accepting ride");
        let ride = match self.store.conditional_assign(ride_id, driver.id).await? {
            AssignOutcome::Assigned(ride) => ride,
            AssignOutcome::AlreadyTaken => {
                tracing::info!(ride_id, driver_id = driver.id, "Ride already taken");
                return Err(DispatchError::RideAlreadyTaken(ride_id));
            }
            AssignOutcome::DriverBusy => return Err(DispatchError::DriverBusy),
            AssignOutcome::RideNotFound => return Err(DispatchError::RideNotFound(ride_id)),
            AssignOutcome::DriverNotFound => return Err(DispatchError::DriverNotFound(driver.id)),
        };
        tracing::info!(ride_id, driver_id = driver.id, "Ride assigned");

        let passenger = self.load_passenger(ride.passenger_id).await;
        let contact = passenger.as_ref().ok().map(Passenger::contact);
        let warnings = self
            .after_commit(ride_id, async {
                let passenger = passenger?;
                Ok(self.templates.ride_accepted(&ride, driver, &passenger))
            })
            .await;

        let view = RideView {
            ride,
            driver: None,
            passenger: contact,
        };
        Ok(DispatchOutcome { data: view, warnings })
    }

    async fn start_ride(&self, driver: &Driver, ride_id: RideId) -> DispatchResult<DispatchOutcome<Ride>> {
        let (ride, _) = self.transition(ride_id, Transition::start(driver.id)).await?;
        tracing::info!(ride_id, driver_id = driver.id, "Ride started");

        let warnings = self
            .after_commit(ride_id, async {
                let passenger = self.load_passenger(ride.passenger_id).await?;
                Ok(self.templates.ride_started(&ride, driver, &passenger))
            })
            .await;
        Ok(DispatchOutcome { data: ride, warnings })
    }

    async fn complete_ride(&self, driver: &Driver, ride_id: RideId) -> DispatchResult<DispatchOutcome<Ride>> {
        let (ride, _) = self.transition(ride_id, Transition::complete(driver.id)).await?;
        tracing::info!(ride_id, driver_id = driver.id, passenger_id = ride.passenger_id, "Ride completed");

        let warnings = self
            .after_commit(ride_id, async {
                let passenger = self.load_passenger(ride.passenger_id).await?;
                Ok(self.templates.ride_completed(&ride, &passenger))
            })
            .await;
        Ok(DispatchOutcome { data: ride, warnings })
    }

    async fn cancel_ride_by_passenger(&self, passenger: &Passenger, ride_id: RideId) -> DispatchResult<DispatchOutcome<Ride>> {
        let (ride, released_driver) = self
            .transition(ride_id, Transition::cancel_by_passenger(passenger.id))
            .await?;
        tracing::info!(ride_id, passenger_id = passenger.id, "Ride cancelled by passenger");

        // Nobody to tell when no driver had been assigned
        let Some(driver_id) = released_driver else {
            return Ok(DispatchOutcome {
                data: ride,
                warnings: Vec::new(),
            });
        };
        tracing::info!(ride_id, driver_id, "Driver released");

        let warnings = self
            .after_commit(ride_id, async {
                let driver = self.load_driver(driver_id).await?;
                Ok(self.templates.passenger_cancelled(&ride, &driver))
            })
            .await;
        Ok(DispatchOutcome { data: ride, warnings })
    }

    async fn cancel_ride_by_driver(&self, driver: &Driver, ride_id: RideId) -> DispatchResult<DispatchOutcome<Ride>> {
        let (ride, _) = self.transition(ride_id, Transition::cancel_by_driver(driver.id)).await?;
        tracing::info!(ride_id, driver_id = driver.id, "Ride cancelled by driver");

        let warnings = self
            .after_commit(ride_id, async {
                let passenger = self.load_passenger(ride.passenger_id).await?;
                Ok(self.templates.driver_cancelled(driver, &passenger))
            })
            .await;
        Ok(DispatchOutcome { data: ride, warnings })
    }

    async fn active_ride_for_passenger(&self, passenger_id: u64) -> DispatchResult<Option<RideView>> {
        tracing::debug!(passenger_id, "Getting active ride for passenger");
        let Some(ride) = self.store.active_ride_for_passenger(passenger_id).await? else {
            return Ok(None);
        };
        let mut drivers = self.driver_contacts();
        Ok(Some(self.view_for_passenger(ride, &mut drivers).await?))
    }

    async fn active_ride_for_driver(&self, driver_id: u64) -> DispatchResult<Option<RideView>> {
        tracing::debug!(driver_id, "Getting active ride for driver");
        let Some(ride) = self.store.active_ride_for_driver(driver_id).await? else {
            return Ok(None);
        };
        let mut passengers = self.passenger_contacts();
        Ok(Some(self.view_for_driver(ride, &mut passengers).await?))
    }

    async fn ride_history_for_passenger(&self, passenger_id: u64) -> DispatchResult<Vec<RideView>> {
        tracing::debug!(passenger_id, "Getting ride history for passenger");
        let rides = self.store.rides_for_passenger(passenger_id).await?;
        let mut drivers = self.driver_contacts();
        let mut views = Vec::with_capacity(rides.len());
        for ride in rides {
            views.push(self.view_for_passenger(ride, &mut drivers).await?);
        }
        Ok(views)
    }

    async fn ride_history_for_driver(&self, driver_id: u64) -> DispatchResult<Vec<RideView>> {
        tracing::debug!(driver_id, "Getting ride history for driver");
        let rides = self.store.rides_for_driver(driver_id).await?;
        let mut passengers = self.passenger_contacts();
        let mut views = Vec::with_capacity(rides.len());
        for ride in rides {
            views.push(self.view_for_driver(ride, &mut passengers).await?);
        }
        Ok(views)
    }
}
