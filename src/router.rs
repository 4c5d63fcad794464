// src/router.rs
//! HTTP routes for passengers, drivers and the admin panel.
//!
//! Every `/api` route except passenger registration needs the actor
//! headers described in [`crate::handlers::extract`]. The new-ride link
//! target, `/rides/:id/accept`, is public.

use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{self, admin_handler, driver_handler, passenger_handler, rating_handler, route_handler};
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/rides/:id/accept", get(driver_handler::view_offer))
        // Passenger
        .route("/api/passengers", post(passenger_handler::register_passenger))
        .route("/api/rides", post(passenger_handler::request_ride))
        .route("/api/passenger/ride", get(passenger_handler::get_active_ride))
        .route("/api/passenger/rides", get(passenger_handler::get_ride_history))
        .route("/api/rides/:id/cancel", post(passenger_handler::cancel_ride))
        // Driver
        .route("/api/rides/:id/accept", post(driver_handler::accept_ride))
        .route("/api/rides/:id/start", post(driver_handler::start_ride))
        .route("/api/rides/:id/complete", post(driver_handler::complete_ride))
        .route("/api/driver/ride", get(driver_handler::get_active_ride))
        .route("/api/driver/rides", get(driver_handler::get_ride_history))
        // Ratings
        .route(
            "/api/rides/:id/rating",
            get(rating_handler::get_ride_rating).post(rating_handler::rate_ride),
        )
        .route("/api/drivers/:id/ratings", get(rating_handler::get_driver_ratings))
        .route("/api/drivers/:id/ratings/summary", get(rating_handler::get_driver_summary))
        // Routing
        .route("/api/routes/estimate", post(route_handler::estimate_route))
        // Admin
        .route(
            "/api/admin/drivers",
            get(admin_handler::list_drivers).post(admin_handler::create_driver),
        )
        .route("/api/admin/drivers/:id", patch(admin_handler::update_driver))
        .route("/api/admin/drivers/:id/reconcile", post(admin_handler::reconcile_driver))
        .route("/api/admin/passengers", get(admin_handler::list_passengers))
        .route("/api/admin/passengers/:id", patch(admin_handler::update_passenger))
        .route("/api/admin/rides", get(admin_handler::list_rides))
        .route("/api/admin/rides/:id", get(admin_handler::get_ride))
        .route("/api/admin/stats", get(admin_handler::get_stats))
        .route("/api/admin/ratings", get(rating_handler::list_ratings))
        .route(
            "/api/admin/ratings/:id",
            patch(rating_handler::update_rating).delete(rating_handler::delete_rating),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
