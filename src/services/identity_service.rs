// src/services/identity_service.rs
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::{
        actor::{ActorClaim, Identity},
        passenger::{Passenger, PassengerRegistration},
    },
    services::store::RideStore,
};

/// Turns what a request claims into a verified caller, or refuses it.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, claim: ActorClaim) -> DispatchResult<Identity>;
}

pub struct StoreIdentityResolver {
    store: Arc<dyn RideStore>,
    admin_token: Option<String>,
}

impl StoreIdentityResolver {
    /// With no `admin_token` every admin claim is refused.
    pub fn new(store: Arc<dyn RideStore>, admin_token: Option<String>) -> Self {
        Self { store, admin_token }
    }

    /// Registers a passenger by phone, or returns the existing record.
    /// Stands in for the phone verification flow.
    pub async fn register_passenger(&self, registration: PassengerRegistration) -> DispatchResult<Passenger> {
        DispatchError::check(registration.validate())?;
        let passenger = self.store.find_or_create_passenger(registration).await?;
        if passenger.is_blocked {
            tracing::warn!(passenger_id = passenger.id, "Blocked passenger tried to sign in");
            return Err(DispatchError::AccountBlocked);
        }
        tracing::info!(passenger_id = passenger.id, "Passenger signed in");
        Ok(passenger)
    }
}

#[async_trait]
impl IdentityResolver for StoreIdentityResolver {
    async fn resolve(&self, claim: ActorClaim) -> DispatchResult<Identity> {
        match claim {
            ActorClaim::Passenger(id) => {
                let passenger = self
                    .store
                    .get_passenger(id)
                    .await?
                    .ok_or_else(|| DispatchError::unauthorized(format!("Unknown passenger {}", id)))?;
                if passenger.is_blocked {
                    return Err(DispatchError::AccountBlocked);
                }
                Ok(Identity::Passenger(passenger))
            }
            ActorClaim::Driver(id) => {
                let driver = self
                    .store
                    .get_driver(id)
                    .await?
                    .ok_or_else(|| DispatchError::unauthorized(format!("Unknown driver {}", id)))?;
                if driver.is_blocked {
                    return Err(DispatchError::DriverBlocked);
                }
                if driver.is_expired(Utc::now()) {
                    return Err(DispatchError::DriverExpired);
                }
                Ok(Identity::Driver(driver))
            }
            ActorClaim::Admin { token } => match &self.admin_token {
                Some(expected) if *expected == token => Ok(Identity::Admin),
                Some(_) => Err(DispatchError::unauthorized("Invalid admin token")),
                None => Err(DispatchError::unauthorized("Admin access is disabled")),
            },
        }
    }
}
