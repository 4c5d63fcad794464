// src/models/driver.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::utils::phone::normalize_phone;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Vehicle {
    pub model: String,
    pub color: String,
    pub plate: String,
}

impl Vehicle {
    fn validate_into(&self, errors: &mut Vec<ValidationError>) {
        for (field, value) in [
            ("vehicle.model", &self.model),
            ("vehicle.color", &self.color),
            ("vehicle.plate", &self.plate),
        ] {
            if value.trim().chars().count() < 2 {
                errors.push(ValidationError::new(field, "Value is too short"));
            }
        }
    }

    /// Trimmed, with the plate uppercased.
    pub fn normalized(&self) -> Vehicle {
        Vehicle {
            model: self.model.trim().to_string(),
            color: self.color.trim().to_string(),
            plate: self.plate.trim().to_uppercase(),
        }
    }
}

fn validate_name_into(name: &str, errors: &mut Vec<ValidationError>) {
    if name.trim().chars().count() < 2 {
        errors.push(ValidationError::new("name", "Name is too short"));
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Driver {
    pub id: u64,
    pub name: String,
    pub phone: String, // Unique, digits only
    pub vehicle: Vehicle,
    pub expires_at: DateTime<Utc>, // License expiry
    pub is_blocked: bool,
    pub is_available: bool, // false exactly while holding an accepted/in-progress ride
    pub total_rides: u32,   // Completed rides
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn contact(&self) -> DriverContact {
        DriverContact {
            name: self.name.clone(),
            phone: self.phone.clone(),
            vehicle: self.vehicle.clone(),
        }
    }

    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.name.to_lowercase().contains(&needle)
            || self.phone.contains(&needle)
            || self.vehicle.plate.to_lowercase().contains(&needle)
    }
}

// Request/Response Models
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverRegistration {
    pub name: String,
    pub phone: String,
    pub vehicle: Vehicle,
    pub expires_at: DateTime<Utc>,
}

impl DriverRegistration {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if normalize_phone(&self.phone).len() < 10 {
            errors.push(ValidationError::new("phone", "Phone must have at least 10 digits"));
        }
        validate_name_into(&self.name, &mut errors);
        self.vehicle.validate_into(&mut errors);
        errors
    }

    pub fn into_driver(self, id: u64, now: DateTime<Utc>) -> Driver {
        Driver {
            id,
            name: self.name.trim().to_string(),
            phone: normalize_phone(&self.phone),
            vehicle: self.vehicle.normalized(),
            expires_at: self.expires_at,
            is_blocked: false,
            is_available: true,
            total_rides: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Admin-editable fields. Availability and counters are not here on purpose:
/// only ride transitions change them.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DriverUpdate {
    pub name: Option<String>,
    pub vehicle: Option<Vehicle>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_blocked: Option<bool>,
}

impl DriverUpdate {
    /// Same rules as registration, for the fields present.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Some(name) = &self.name {
            validate_name_into(name, &mut errors);
        }
        if let Some(vehicle) = &self.vehicle {
            vehicle.validate_into(&mut errors);
        }
        errors
    }

    pub fn apply(&self, driver: &mut Driver, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            driver.name = name.trim().to_string();
        }
        if let Some(vehicle) = &self.vehicle {
            driver.vehicle = vehicle.normalized();
        }
        if let Some(expires_at) = self.expires_at {
            driver.expires_at = expires_at;
        }
        if let Some(is_blocked) = self.is_blocked {
            driver.is_blocked = is_blocked;
        }
        driver.updated_at = now;
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DriverContact {
    pub name: String,
    pub phone: String,
    pub vehicle: Vehicle,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> DriverRegistration {
        DriverRegistration {
            name: " Carlos ".to_string(),
            phone: "+55 (11) 98888-8888".to_string(),
            vehicle: Vehicle {
                model: "Gol".to_string(),
                color: "Branco".to_string(),
                plate: "abc-1234".to_string(),
            },
            expires_at: Utc::now() + chrono::Duration::days(30),
        }
    }

    #[test]
    fn test_registration_normalizes_fields() {
        let driver = registration().into_driver(7, Utc::now());
        assert_eq!(driver.name, "Carlos");
        assert_eq!(driver.phone, "5511988888888");
        assert_eq!(driver.vehicle.plate, "ABC-1234");
        assert!(driver.is_available);
        assert!(!driver.is_blocked);
        assert_eq!(driver.total_rides, 0);
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut driver = registration().into_driver(1, now);
        assert!(!driver.is_expired(now));
        driver.expires_at = now - chrono::Duration::seconds(1);
        assert!(driver.is_expired(now));
    }

    #[test]
    fn test_update_leaves_availability_alone() {
        let now = Utc::now();
        let mut driver = registration().into_driver(1, now);
        driver.is_available = false;
        let update = DriverUpdate {
            is_blocked: Some(true),
            ..Default::default()
        };
        update.apply(&mut driver, now);
        assert!(driver.is_blocked);
        assert!(!driver.is_available);
    }

    #[test]
    fn test_update_vehicle_uses_registration_rules() {
        let now = Utc::now();
        let mut driver = registration().into_driver(1, now);

        let blank = DriverUpdate {
            vehicle: Some(Vehicle {
                model: " ".to_string(),
                color: String::new(),
                plate: "xyz9876".to_string(),
            }),
            ..Default::default()
        };
        let fields: Vec<String> = blank.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["vehicle.model", "vehicle.color"]);

        let update = DriverUpdate {
            vehicle: Some(Vehicle {
                model: " Onix ".to_string(),
                color: "Prata".to_string(),
                plate: " xyz-9876 ".to_string(),
            }),
            ..Default::default()
        };
        assert!(update.validate().is_empty());
        update.apply(&mut driver, now);
        assert_eq!(driver.vehicle.model, "Onix");
        assert_eq!(driver.vehicle.plate, "XYZ-9876");
    }

    #[test]
    fn test_search_matches_plate() {
        let driver = registration().into_driver(1, Utc::now());
        assert!(driver.matches_search("abc"));
        assert!(driver.matches_search("carl"));
        assert!(!driver.matches_search("xyz"));
    }
}
