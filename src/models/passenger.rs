// src/models/passenger.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::utils::phone::normalize_phone;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Passenger {
    pub id: u64,
    pub name: String,
    pub phone: String, // Unique, digits only
    pub total_rides: u32,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Passenger {
    pub fn contact(&self) -> PassengerContact {
        PassengerContact {
            name: self.name.clone(),
            phone: self.phone.clone(),
            total_rides: self.total_rides,
        }
    }

    pub fn matches_search(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(&needle.to_lowercase()) || self.phone.contains(needle)
    }
}

// Request/Response Models
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PassengerRegistration {
    pub name: String,
    pub phone: String,
}

impl PassengerRegistration {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if normalize_phone(&self.phone).len() < 10 {
            errors.push(ValidationError::new("phone", "Phone must have at least 10 digits"));
        }
        if self.name.trim().is_empty() {
            errors.push(ValidationError::new("name", "Name is required for new passengers"));
        }
        errors
    }

    pub fn into_passenger(self, id: u64, now: DateTime<Utc>) -> Passenger {
        Passenger {
            id,
            name: self.name.trim().to_string(),
            phone: normalize_phone(&self.phone),
            total_rides: 0,
            is_blocked: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PassengerUpdate {
    pub name: Option<String>,
    pub is_blocked: Option<bool>,
}

impl PassengerUpdate {
    pub fn apply(&self, passenger: &mut Passenger, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            passenger.name = name.trim().to_string();
        }
        if let Some(is_blocked) = self.is_blocked {
            passenger.is_blocked = is_blocked;
        }
        passenger.updated_at = now;
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PassengerContact {
    pub name: String,
    pub phone: String,
    pub total_rides: u32,
}
