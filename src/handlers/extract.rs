// src/handlers/extract.rs
//! Request extractors that run the identity resolver.
//!
//! Callers identify themselves with `x-actor-role` (`passenger`, `driver` or
//! `admin`) plus `x-actor-id`, or `x-admin-token` for admins. The typed
//! extractors additionally require a specific role.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts, http::HeaderMap};
use std::sync::Arc;

use crate::{
    errors::DispatchError,
    models::{
        actor::{ActorClaim, Identity},
        driver::Driver,
        passenger::Passenger,
    },
    services::identity_service::IdentityResolver,
    state::AppState,
};

pub const ROLE_HEADER: &str = "x-actor-role";
pub const ID_HEADER: &str = "x-actor-id";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim)
}

pub fn claim_from_headers(headers: &HeaderMap) -> Result<ActorClaim, DispatchError> {
    let role = header(headers, ROLE_HEADER).ok_or_else(|| DispatchError::unauthorized("Missing x-actor-role header"))?;

    let actor_id = || {
        header(headers, ID_HEADER)
            .ok_or_else(|| DispatchError::unauthorized("Missing x-actor-id header"))?
            .parse::<u64>()
            .map_err(|_| DispatchError::unauthorized("Invalid x-actor-id header"))
    };

    match role {
        "passenger" => Ok(ActorClaim::Passenger(actor_id()?)),
        "driver" => Ok(ActorClaim::Driver(actor_id()?)),
        "admin" => {
            let token = header(headers, ADMIN_TOKEN_HEADER)
                .ok_or_else(|| DispatchError::unauthorized("Missing x-admin-token header"))?;
            Ok(ActorClaim::Admin {
                token: token.to_string(),
            })
        }
        other => Err(DispatchError::unauthorized(format!("Unknown role: {}", other))),
    }
}

/// Any verified caller.
pub struct Caller(pub Identity);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = DispatchError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let claim = claim_from_headers(&parts.headers)?;
        tracing::debug!(role = %claim.role(), "Resolving caller");
        let identity = state.identity.resolve(claim).await?;
        Ok(Caller(identity))
    }
}

pub struct PassengerCaller(pub Passenger);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for PassengerCaller {
    type Rejection = DispatchError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match Caller::from_request_parts(parts, state).await?.0 {
            Identity::Passenger(passenger) => Ok(PassengerCaller(passenger)),
            other => Err(DispatchError::unauthorized(format!("Passenger only, caller is {}", other.role()))),
        }
    }
}

pub struct DriverCaller(pub Driver);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for DriverCaller {
    type Rejection = DispatchError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match Caller::from_request_parts(parts, state).await?.0 {
            Identity::Driver(driver) => Ok(DriverCaller(driver)),
            other => Err(DispatchError::unauthorized(format!("Driver only, caller is {}", other.role()))),
        }
    }
}

pub struct AdminCaller;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminCaller {
    type Rejection = DispatchError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match Caller::from_request_parts(parts, state).await?.0 {
            Identity::Admin => Ok(AdminCaller),
            other => Err(DispatchError::unauthorized(format!("Admin only, caller is {}", other.role()))),
        }
    }
}
