//! Lifecycle properties of the dispatch engine, run against the in-memory
//! store with recording or failing notifiers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ride_dispatch::{
    errors::DispatchError,
    models::{
        driver::{Driver, DriverRegistration, Vehicle},
        messages::Notification,
        passenger::{Passenger, PassengerRegistration},
        ride::{Coordinates, RideRequest, RideStatus},
    },
    services::{
        dispatch_service::{DispatchOperations, DispatchService},
        messaging_service::{NotificationError, Notifier},
        notification_dispatcher::DeliveryConfig,
        route_service::HaversineEstimator,
        store::{MemoryRideStore, RideStore},
    },
    state::{AppConfig, AppState},
};

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_group_text(&self, message: &str) -> Result<(), NotificationError> {
        self.record(Notification::GroupText {
            message: message.to_string(),
        });
        Ok(())
    }

    async fn send_text(&self, phone: &str, message: &str) -> Result<(), NotificationError> {
        self.record(Notification::Text {
            phone: phone.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn send_location(&self, phone: &str, latitude: f64, longitude: f64) -> Result<(), NotificationError> {
        self.record(Notification::Location {
            phone: phone.to_string(),
            latitude,
            longitude,
        });
        Ok(())
    }
}

struct DownNotifier;

#[async_trait]
impl Notifier for DownNotifier {
    async fn send_group_text(&self, _message: &str) -> Result<(), NotificationError> {
        Err(NotificationError::Network("connection refused".to_string()))
    }

    async fn send_text(&self, _phone: &str, _message: &str) -> Result<(), NotificationError> {
        Err(NotificationError::Network("connection refused".to_string()))
    }

    async fn send_location(&self, _phone: &str, _latitude: f64, _longitude: f64) -> Result<(), NotificationError> {
        Err(NotificationError::Network("connection refused".to_string()))
    }
}

struct Harness {
    dispatch: Arc<DispatchService>,
    store: Arc<dyn RideStore>,
}

fn harness(notifier: Arc<dyn Notifier>) -> Harness {
    let store: Arc<dyn RideStore> = Arc::new(MemoryRideStore::new());
    let config = AppConfig {
        delivery: DeliveryConfig {
            timeout: Duration::from_secs(1),
            max_attempts: 1,
            backoff: Duration::from_millis(10),
        },
        ..AppConfig::default()
    };
    let state = AppState::with_parts(config, store.clone(), notifier, Arc::new(HaversineEstimator::default()));
    Harness {
        dispatch: state.dispatch.clone(),
        store,
    }
}

async fn passenger(store: &Arc<dyn RideStore>, phone: &str) -> Passenger {
    store
        .find_or_create_passenger(PassengerRegistration {
            name: "Paula".to_string(),
            phone: phone.to_string(),
        })
        .await
        .unwrap()
}

async fn driver(store: &Arc<dyn RideStore>, n: u32) -> Driver {
    store
        .insert_driver(DriverRegistration {
            name: format!("Driver {}", n),
            phone: format!("55119800000{:02}", n),
            vehicle: Vehicle {
                model: "Onix".to_string(),
                color: "Silver".to_string(),
                plate: format!("DRV{:04}", n),
            },
            expires_at: Utc::now() + chrono::Duration::days(90),
        })
        .await
        .unwrap()
}

fn trip() -> RideRequest {
    RideRequest {
        origin_address: "A".to_string(),
        origin: Coordinates::new(-23.55, -46.63),
        destination_address: "B".to_string(),
        destination: Coordinates::new(-23.59, -46.68),
        distance_km: 5.0,
        duration_min: 15,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_drivers_race_for_one_ride() {
    let h = harness(Arc::new(RecordingNotifier::default()));
    let p = passenger(&h.store, "5511999990001").await;
    let ride_id = h.dispatch.request_ride(&p, trip()).await.unwrap().data.id;

    let mut handles = Vec::new();
    for n in 0..10 {
        let d = driver(&h.store, n).await;
        let dispatch = h.dispatch.clone();
        handles.push(tokio::spawn(async move { dispatch.accept_ride(&d, ride_id).await }));
    }

    let mut winners = Vec::new();
    let mut taken = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => winners.push(outcome.data.ride.driver_id.unwrap()),
            Err(DispatchError::RideAlreadyTaken(id)) => {
                assert_eq!(id, ride_id);
                taken += 1;
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(taken, 9);

    let stored = h.store.get_ride(ride_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RideStatus::Accepted);
    assert_eq!(stored.driver_id, Some(winners[0]));

    let busy: Vec<Driver> = h
        .store
        .list_drivers(None)
        .await
        .unwrap()
        .into_iter()
        .filter(|d| !d.is_available)
        .collect();
    assert_eq!(busy.len(), 1);
    assert_eq!(busy[0].id, winners[0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_from_one_passenger() {
    let h = harness(Arc::new(RecordingNotifier::default()));
    let p = passenger(&h.store, "5511999990002").await;

    let mut handles = Vec::new();
    for _ in 0..5 {
        let dispatch = h.dispatch.clone();
        let p = p.clone();
        handles.push(tokio::spawn(async move { dispatch.request_ride(&p, trip()).await }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(DispatchError::ActiveRideExists) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(h.store.rides_for_passenger(p.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn completing_twice_counts_once() {
    let h = harness(Arc::new(RecordingNotifier::default()));
    let p = passenger(&h.store, "5511999990003").await;
    let d = driver(&h.store, 1).await;
    let ride = h.dispatch.request_ride(&p, trip()).await.unwrap().data;
    h.dispatch.accept_ride(&d, ride.id).await.unwrap();
    h.dispatch.start_ride(&d, ride.id).await.unwrap();
    h.dispatch.complete_ride(&d, ride.id).await.unwrap();

    let err = h.dispatch.complete_ride(&d, ride.id).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::InvalidTransition {
            status: RideStatus::Completed,
            ..
        }
    ));

    let p = h.store.get_passenger(p.id).await.unwrap().unwrap();
    let d = h.store.get_driver(d.id).await.unwrap().unwrap();
    assert_eq!(p.total_rides, 1);
    assert_eq!(d.total_rides, 1);
}

#[tokio::test]
async fn illegal_transitions_leave_the_ride_alone() {
    let h = harness(Arc::new(RecordingNotifier::default()));
    let p = passenger(&h.store, "5511999990004").await;
    let d = driver(&h.store, 1).await;
    let ride = h.dispatch.request_ride(&p, trip()).await.unwrap().data;
    let before = h.store.get_ride(ride.id).await.unwrap().unwrap();

    for result in [
        h.dispatch.start_ride(&d, ride.id).await,
        h.dispatch.complete_ride(&d, ride.id).await,
        h.dispatch.cancel_ride_by_driver(&d, ride.id).await,
    ] {
        assert!(matches!(
            result,
            Err(DispatchError::InvalidTransition {
                status: RideStatus::Waiting,
                ..
            })
        ));
    }

    let after = h.store.get_ride(ride.id).await.unwrap().unwrap();
    assert_eq!(after.status, RideStatus::Waiting);
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(after.driver_id, None);
}

#[tokio::test]
async fn availability_follows_assignment() {
    let h = harness(Arc::new(RecordingNotifier::default()));
    let p = passenger(&h.store, "5511999990005").await;
    let d = driver(&h.store, 1).await;
    let available = |driver: Option<Driver>| driver.unwrap().is_available;

    // accept then complete
    let ride = h.dispatch.request_ride(&p, trip()).await.unwrap().data;
    h.dispatch.accept_ride(&d, ride.id).await.unwrap();
    assert!(!available(h.store.get_driver(d.id).await.unwrap()));
    h.dispatch.start_ride(&d, ride.id).await.unwrap();
    h.dispatch.complete_ride(&d, ride.id).await.unwrap();
    assert!(available(h.store.get_driver(d.id).await.unwrap()));

    // accept then driver cancel
    let ride = h.dispatch.request_ride(&p, trip()).await.unwrap().data;
    h.dispatch.accept_ride(&d, ride.id).await.unwrap();
    h.dispatch.cancel_ride_by_driver(&d, ride.id).await.unwrap();
    assert!(available(h.store.get_driver(d.id).await.unwrap()));

    // accept then passenger cancel
    let ride = h.dispatch.request_ride(&p, trip()).await.unwrap().data;
    h.dispatch.accept_ride(&d, ride.id).await.unwrap();
    let cancelled = h.dispatch.cancel_ride_by_passenger(&p, ride.id).await.unwrap().data;
    assert_eq!(cancelled.status, RideStatus::CancelledByPassenger);
    assert!(available(h.store.get_driver(d.id).await.unwrap()));
    assert!(h.dispatch.active_ride_for_driver(d.id).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_driver_cannot_take_two_rides() {
    let h = harness(Arc::new(RecordingNotifier::default()));
    let p1 = passenger(&h.store, "5511999990009").await;
    let p2 = passenger(&h.store, "5511999990010").await;
    let d = driver(&h.store, 1).await;
    let a = h.dispatch.request_ride(&p1, trip()).await.unwrap().data.id;
    let b = h.dispatch.request_ride(&p2, trip()).await.unwrap().data.id;

    let (d1, d2) = (d.clone(), d.clone());
    let (da, db) = (h.dispatch.clone(), h.dispatch.clone());
    let first = tokio::spawn(async move { da.accept_ride(&d1, a).await });
    let second = tokio::spawn(async move { db.accept_ride(&d2, b).await });

    let (held, open) = match (first.await.unwrap(), second.await.unwrap()) {
        (Ok(_), Err(DispatchError::DriverBusy)) => (a, b),
        (Err(DispatchError::DriverBusy), Ok(_)) => (b, a),
        other => panic!("expected one assignment and one busy refusal, got {:?}", other),
    };

    let held = h.store.get_ride(held).await.unwrap().unwrap();
    assert_eq!(held.status, RideStatus::Accepted);
    assert_eq!(held.driver_id, Some(d.id));
    let open_ride = h.store.get_ride(open).await.unwrap().unwrap();
    assert_eq!(open_ride.status, RideStatus::Waiting);
    assert_eq!(open_ride.driver_id, None);

    // Still busy on a later attempt, until the held ride ends
    assert!(matches!(
        h.dispatch.accept_ride(&d, open).await,
        Err(DispatchError::DriverBusy)
    ));
    h.dispatch.cancel_ride_by_driver(&d, held.id).await.unwrap();
    let accepted = h.dispatch.accept_ride(&d, open).await.unwrap();
    assert_eq!(accepted.data.ride.driver_id, Some(d.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_drivers_then_full_trip() {
    let notifier = Arc::new(RecordingNotifier::default());
    let h = harness(notifier.clone());
    let p = passenger(&h.store, "5511999990006").await;
    let d1 = driver(&h.store, 1).await;
    let d2 = driver(&h.store, 2).await;

    let ride = h.dispatch.request_ride(&p, trip()).await.unwrap().data;
    assert_eq!(ride.id, 1);
    assert_eq!(ride.status, RideStatus::Waiting);
    assert_eq!(ride.distance_km, 5.0);
    assert_eq!(ride.duration_min, 15);

    let (first, second) = tokio::join!(h.dispatch.accept_ride(&d1, ride.id), h.dispatch.accept_ride(&d2, ride.id));
    let winner = match (first, second) {
        (Ok(_), Err(DispatchError::RideAlreadyTaken(_))) => d1.clone(),
        (Err(DispatchError::RideAlreadyTaken(_)), Ok(_)) => d2.clone(),
        other => panic!("expected exactly one winner, got {:?}", other),
    };

    let started = h.dispatch.start_ride(&winner, ride.id).await.unwrap().data;
    assert_eq!(started.status, RideStatus::InProgress);
    let completed = h.dispatch.complete_ride(&winner, ride.id).await.unwrap().data;
    assert_eq!(completed.status, RideStatus::Completed);
    assert_eq!(completed.driver_id, Some(winner.id));

    let p = h.store.get_passenger(p.id).await.unwrap().unwrap();
    let winner = h.store.get_driver(winner.id).await.unwrap().unwrap();
    assert_eq!(p.total_rides, 1);
    assert_eq!(winner.total_rides, 1);
    assert!(winner.is_available);

    // The driver got a location pin for the pickup point
    assert!(notifier.sent().iter().any(|n| matches!(
        n,
        Notification::Location { phone, .. } if *phone == winner.phone
    )));
}

#[tokio::test]
async fn cancelling_an_unassigned_ride_touches_no_driver() {
    let notifier = Arc::new(RecordingNotifier::default());
    let h = harness(notifier.clone());
    let p = passenger(&h.store, "5511999990007").await;
    let d = driver(&h.store, 1).await;

    let ride = h.dispatch.request_ride(&p, trip()).await.unwrap().data;
    let sent_before = notifier.sent().len();

    let outcome = h.dispatch.cancel_ride_by_passenger(&p, ride.id).await.unwrap();
    assert_eq!(outcome.data.status, RideStatus::CancelledByPassenger);
    assert!(outcome.data.cancelled_at.is_some());
    assert!(outcome.warnings.is_empty());
    assert_eq!(notifier.sent().len(), sent_before);

    let d = h.store.get_driver(d.id).await.unwrap().unwrap();
    assert!(d.is_available);
    assert_eq!(d.total_rides, 0);
}

#[tokio::test]
async fn notifier_outage_only_produces_warnings() {
    let h = harness(Arc::new(DownNotifier));
    let p = passenger(&h.store, "5511999990008").await;
    let d = driver(&h.store, 1).await;

    let requested = h.dispatch.request_ride(&p, trip()).await.unwrap();
    assert_eq!(requested.warnings.len(), 1);

    let accepted = h.dispatch.accept_ride(&d, requested.data.id).await.unwrap();
    assert_eq!(accepted.data.ride.status, RideStatus::Accepted);
    assert_eq!(accepted.warnings.len(), 3);

    let stored = h.store.get_ride(requested.data.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RideStatus::Accepted);
    assert_eq!(stored.driver_id, Some(d.id));
}
