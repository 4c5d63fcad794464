// src/models/messages.rs
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    NewRideGroup,          // "New ride available! From A to B..."
    DriverAcceptedPrivate, // Passenger contact, sent to the winning driver
    PassengerAccepted,     // "Your driver Carlos is coming!"
    RideStarted,
    RideCompleted,
    PassengerCancelled,    // Sent to the assigned driver
    DriverCancelled,       // Sent to the passenger
}

impl MessageKind {
    pub fn key(&self) -> &'static str {
        match self {
            MessageKind::NewRideGroup => "new_ride_group",
            MessageKind::DriverAcceptedPrivate => "driver_accepted_private",
            MessageKind::PassengerAccepted => "passenger_accepted",
            MessageKind::RideStarted => "ride_started",
            MessageKind::RideCompleted => "ride_completed",
            MessageKind::PassengerCancelled => "passenger_cancelled",
            MessageKind::DriverCancelled => "driver_cancelled",
        }
    }
}

/// One outbound message, already rendered. The notifier only delivers it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    GroupText {
        message: String,
    },
    Text {
        phone: String,
        message: String,
    },
    Location {
        phone: String,
        latitude: f64,
        longitude: f64,
    },
}

impl Notification {
    pub fn recipient(&self) -> &str {
        match self {
            Notification::GroupText { .. } => "drivers-group",
            Notification::Text { phone, .. } | Notification::Location { phone, .. } => phone,
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            Notification::GroupText { .. } => "group_text",
            Notification::Text { .. } => "text",
            Notification::Location { .. } => "location",
        }
    }
}
