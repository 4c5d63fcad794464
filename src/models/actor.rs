// src/models/actor.rs
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{driver::Driver, passenger::Passenger};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Passenger,
    Driver,
    Admin,
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorRole::Passenger => f.write_str("passenger"),
            ActorRole::Driver => f.write_str("driver"),
            ActorRole::Admin => f.write_str("admin"),
        }
    }
}

/// Who an inbound request claims to be, before the resolver has checked it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorClaim {
    Passenger(u64),
    Driver(u64),
    Admin { token: String },
}

impl ActorClaim {
    pub fn role(&self) -> ActorRole {
        match self {
            ActorClaim::Passenger(_) => ActorRole::Passenger,
            ActorClaim::Driver(_) => ActorRole::Driver,
            ActorClaim::Admin { .. } => ActorRole::Admin,
        }
    }
}

/// A verified caller with its current record.
#[derive(Debug, Clone)]
pub enum Identity {
    Passenger(Passenger),
    Driver(Driver),
    Admin,
}

impl Identity {
    pub fn role(&self) -> ActorRole {
        match self {
            Identity::Passenger(_) => ActorRole::Passenger,
            Identity::Driver(_) => ActorRole::Driver,
            Identity::Admin => ActorRole::Admin,
        }
    }
}
