// src/services/message_templates.rs
use std::collections::HashMap;

use crate::{
    models::{
        driver::Driver,
        messages::{MessageKind, Notification},
        passenger::Passenger,
        ride::Ride,
    },
    utils::phone::format_phone,
};

/// Renders ride events into outbound notifications. Placeholders are written
/// as `{{name}}`; unknown placeholders are left in place.
#[derive(Debug, Clone)]
pub struct MessageTemplates {
    templates: HashMap<MessageKind, String>,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            MessageKind::NewRideGroup,
            String::from(
                "🚗 *NEW RIDE AVAILABLE*\n\n\
                 👤 Passenger: *{{passenger_name}}*\n\
                 📊 Completed rides: {{total_rides}}\n\n\
                 📍 From: {{origin}}\n\
                 🏁 To: {{destination}}\n\n\
                 📏 Distance: {{distance}} km\n\
                 ⏱️ Estimated time: {{duration}} min\n\n\
                 👉 Accept ride: {{accept_link}}",
            ),
        );
        templates.insert(
            MessageKind::DriverAcceptedPrivate,
            String::from(
                "✅ *RIDE ACCEPTED!*\n\n\
                 👤 Passenger: *{{passenger_name}}*\n\
                 📱 Contact: {{passenger_phone}}\n\n\
                 📍 From: {{origin}}\n\
                 🏁 To: {{destination}}\n\n\
                 📏 Distance: {{distance}} km\n\
                 ⏱️ Estimated time: {{duration}} min\n\n\
                 📍 Pickup location:",
            ),
        );
        templates.insert(
            MessageKind::PassengerAccepted,
            String::from(
                "🎉 *RIDE ACCEPTED!*\n\n\
                 Your driver is on the way!\n\n\
                 👤 Driver: *{{driver_name}}*\n\
                 📱 Contact: {{driver_phone}}\n\
                 🚗 Vehicle: {{car_model}} - {{car_color}}\n\
                 🔢 Plate: {{plate}}",
            ),
        );
        templates.insert(
            MessageKind::RideStarted,
            String::from("🚗 *Ride started!*\n\n{{driver_name}} is taking you to {{destination}}."),
        );
        templates.insert(
            MessageKind::RideCompleted,
            String::from(
                "✅ *Ride completed!*\n\nDistance: {{distance}} km, time: {{duration}} min.\nThanks for riding with us! 🚗",
            ),
        );
        templates.insert(
            MessageKind::PassengerCancelled,
            String::from("❌ *Ride cancelled*\n\nThe passenger cancelled the ride from {{origin}} to {{destination}}."),
        );
        templates.insert(
            MessageKind::DriverCancelled,
            String::from(
                "❌ *Ride cancelled*\n\nDriver {{driver_name}} cancelled the ride. Looking for another driver...",
            ),
        );
        Self { templates }
    }
}

impl MessageTemplates {
    /// `None` when no template is registered for `kind`.
    pub fn render(&self, kind: MessageKind, variables: &[(&str, String)]) -> Option<String> {
        let Some(template) = self.templates.get(&kind) else {
            tracing::warn!("No template registered for {}", kind.key());
            return None;
        };
        Some(replace_variables(template, variables))
    }

    // Batches, in delivery order

    pub fn new_ride(&self, ride: &Ride, passenger: &Passenger, accept_link: &str) -> Vec<Notification> {
        let variables = [
            ("passenger_name", passenger.name.clone()),
            ("total_rides", passenger.total_rides.to_string()),
            ("origin", ride.origin_address.clone()),
            ("destination", ride.destination_address.clone()),
            ("distance", format_distance(ride.distance_km)),
            ("duration", ride.duration_min.to_string()),
            ("accept_link", accept_link.to_string()),
        ];
        self.render(MessageKind::NewRideGroup, &variables)
            .map(|message| Notification::GroupText { message })
            .into_iter()
            .collect()
    }

    pub fn ride_accepted(&self, ride: &Ride, driver: &Driver, passenger: &Passenger) -> Vec<Notification> {
        let mut batch = Vec::with_capacity(3);

        let to_driver = [
            ("passenger_name", passenger.name.clone()),
            ("passenger_phone", format_phone(&passenger.phone)),
            ("origin", ride.origin_address.clone()),
            ("destination", ride.destination_address.clone()),
            ("distance", format_distance(ride.distance_km)),
            ("duration", ride.duration_min.to_string()),
        ];
        if let Some(message) = self.render(MessageKind::DriverAcceptedPrivate, &to_driver) {
            batch.push(Notification::Text {
                phone: driver.phone.clone(),
                message,
            });
            batch.push(Notification::Location {
                phone: driver.phone.clone(),
                latitude: ride.origin.latitude,
                longitude: ride.origin.longitude,
            });
        }

        let to_passenger = [
            ("driver_name", driver.name.clone()),
            ("driver_phone", format_phone(&driver.phone)),
            ("car_model", driver.vehicle.model.clone()),
            ("car_color", driver.vehicle.color.clone()),
            ("plate", driver.vehicle.plate.clone()),
        ];
        if let Some(message) = self.render(MessageKind::PassengerAccepted, &to_passenger) {
            batch.push(Notification::Text {
                phone: passenger.phone.clone(),
                message,
            });
        }
        batch
    }

    pub fn ride_started(&self, ride: &Ride, driver: &Driver, passenger: &Passenger) -> Vec<Notification> {
        let variables = [
            ("driver_name", driver.name.clone()),
            ("destination", ride.destination_address.clone()),
            ("duration", ride.duration_min.to_string()),
        ];
        self.direct(MessageKind::RideStarted, &passenger.phone, &variables)
    }

    pub fn ride_completed(&self, ride: &Ride, passenger: &Passenger) -> Vec<Notification> {
        let variables = [
            ("distance", format_distance(ride.distance_km)),
            ("duration", ride.duration_min.to_string()),
        ];
        self.direct(MessageKind::RideCompleted, &passenger.phone, &variables)
    }

    pub fn passenger_cancelled(&self, ride: &Ride, driver: &Driver) -> Vec<Notification> {
        let variables = [
            ("origin", ride.origin_address.clone()),
            ("destination", ride.destination_address.clone()),
        ];
        self.direct(MessageKind::PassengerCancelled, &driver.phone, &variables)
    }

    pub fn driver_cancelled(&self, driver: &Driver, passenger: &Passenger) -> Vec<Notification> {
        let variables = [("driver_name", driver.name.clone())];
        self.direct(MessageKind::DriverCancelled, &passenger.phone, &variables)
    }

    fn direct(&self, kind: MessageKind, phone: &str, variables: &[(&str, String)]) -> Vec<Notification> {
        self.render(kind, variables)
            .map(|message| Notification::Text {
                phone: phone.to_string(),
                message,
            })
            .into_iter()
            .collect()
    }
}

pub fn replace_variables(template: &str, variables: &[(&str, String)]) -> String {
    variables
        .iter()
        .fold(template.to_string(), |message, (name, value)| {
            message.replace(&format!("{{{{{}}}}}", name), value)
        })
}

fn format_distance(distance_km: f64) -> String {
    format!("{:.1}", distance_km)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        driver::{DriverRegistration, Vehicle},
        passenger::PassengerRegistration,
        ride::{Coordinates, NewRide},
    };
    use chrono::Utc;

    fn fixtures() -> (Ride, Driver, Passenger) {
        let now = Utc::now();
        let ride = NewRide {
            passenger_id: 1,
            origin_address: "Rua A, 10".to_string(),
            origin: Coordinates::new(-23.5, -46.6),
            destination_address: "Av. B, 200".to_string(),
            destination: Coordinates::new(-23.6, -46.7),
            distance_km: 5.0,
            duration_min: 15,
        }
        .into_ride(1, now);
        let driver = DriverRegistration {
            name: "Carlos".to_string(),
            phone: "5511988888888".to_string(),
            vehicle: Vehicle {
                model: "Gol".to_string(),
                color: "White".to_string(),
                plate: "ABC1D23".to_string(),
            },
            expires_at: now,
        }
        .into_driver(1, now);
        let passenger = PassengerRegistration {
            name: "Ana".to_string(),
            phone: "5511999999999".to_string(),
        }
        .into_passenger(1, now);
        (ride, driver, passenger)
    }

    #[test]
    fn test_replace_variables() {
        let message = replace_variables(
            "Hi {{name}}, {{name}}! {{unknown}}",
            &[("name", "Ana".to_string())],
        );
        assert_eq!(message, "Hi Ana, Ana! {{unknown}}");
    }

    #[test]
    fn test_new_ride_broadcast_carries_link() {
        let (ride, _, passenger) = fixtures();
        let batch = MessageTemplates::default().new_ride(&ride, &passenger, "http://localhost/rides/1/accept");
        assert_eq!(batch.len(), 1);
        let Notification::GroupText { message } = &batch[0] else {
            panic!("expected a group broadcast");
        };
        assert!(message.contains("Ana"));
        assert!(message.contains("5.0 km"));
        assert!(message.contains("http://localhost/rides/1/accept"));
    }

    #[test]
    fn test_accepted_batch_order() {
        let (ride, driver, passenger) = fixtures();
        let batch = MessageTemplates::default().ride_accepted(&ride, &driver, &passenger);
        let shapes: Vec<_> = batch.iter().map(|n| (n.shape(), n.recipient().to_string())).collect();
        assert_eq!(
            shapes,
            vec![
                ("text", driver.phone.clone()),
                ("location", driver.phone.clone()),
                ("text", passenger.phone.clone()),
            ]
        );
        let Notification::Text { message, .. } = &batch[0] else {
            panic!("expected text");
        };
        assert!(message.contains("(11) 99999-9999"));
    }
}
