// src/services/rating_service.rs
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::{
        passenger::Passenger,
        rating::{DriverRatingSummary, Rating, RatingFilter, RatingRequest, RatingUpdate},
        ride::RideId,
    },
    services::store::{RatingOutcome, RideStore},
};

#[async_trait]
pub trait RatingOperations: Send + Sync {
    async fn rate_ride(&self, passenger: &Passenger, ride_id: RideId, request: RatingRequest) -> DispatchResult<Rating>;
    async fn rating_for_ride(&self, ride_id: RideId) -> DispatchResult<Option<Rating>>;
    async fn driver_ratings(&self, driver_id: u64) -> DispatchResult<Vec<Rating>>;
    async fn driver_summary(&self, driver_id: u64) -> DispatchResult<DriverRatingSummary>;

    // Admin
    async fn list_ratings(&self, filter: RatingFilter) -> DispatchResult<Vec<Rating>>;
    async fn update_rating(&self, rating_id: u64, update: RatingUpdate) -> DispatchResult<Rating>;
    async fn delete_rating(&self, rating_id: u64) -> DispatchResult<()>;
}

pub struct RatingService {
    store: Arc<dyn RideStore>,
}

impl RatingService {
    pub fn new(store: Arc<dyn RideStore>) -> Self {
        Self { store }
    }

    async fn ensure_driver(&self, driver_id: u64) -> DispatchResult<()> {
        match self.store.get_driver(driver_id).await? {
            Some(_) => Ok(()),
            None => Err(DispatchError::DriverNotFound(driver_id)),
        }
    }
}

#[async_trait]
impl RatingOperations for RatingService {
    async fn rate_ride(&self, passenger: &Passenger, ride_id: RideId, request: RatingRequest) -> DispatchResult<Rating> {
        if passenger.is_blocked {
            return Err(DispatchError::AccountBlocked);
        }
        DispatchError::check(request.validate())?;

        let stars = request.stars;
        match self.store.insert_rating(request.for_ride(ride_id, passenger.id)).await? {
            RatingOutcome::Rated(rating) => {
                tracing::info!(ride_id, driver_id = rating.driver_id, stars, "Ride rated");
                Ok(rating)
            }
            RatingOutcome::AlreadyRated => Err(DispatchError::RideAlreadyRated(ride_id)),
            RatingOutcome::RideNotFound => Err(DispatchError::RideNotFound(ride_id)),
            RatingOutcome::NotOwner => Err(DispatchError::NotOwner(ride_id)),
            RatingOutcome::NotCompleted(status) => Err(DispatchError::RideNotRateable { ride_id, status }),
        }
    }

    async fn rating_for_ride(&self, ride_id: RideId) -> DispatchResult<Option<Rating>> {
        self.store.rating_for_ride(ride_id).await
    }

    async fn driver_ratings(&self, driver_id: u64) -> DispatchResult<Vec<Rating>> {
        self.ensure_driver(driver_id).await?;
        self.store.list_ratings(&RatingFilter::for_driver(driver_id)).await
    }

    async fn driver_summary(&self, driver_id: u64) -> DispatchResult<DriverRatingSummary> {
        let ratings = self.driver_ratings(driver_id).await?;
        Ok(DriverRatingSummary::from_ratings(driver_id, &ratings))
    }

    async fn list_ratings(&self, filter: RatingFilter) -> DispatchResult<Vec<Rating>> {
        self.store.list_ratings(&filter).await
    }

    async fn update_rating(&self, rating_id: u64, update: RatingUpdate) -> DispatchResult<Rating> {
        DispatchError::check(update.validate())?;
        tracing::info!(rating_id, "Updating rating");

        self.store
            .update_rating(rating_id, update)
            .await?
            .ok_or(DispatchError::RatingNotFound(rating_id))
    }

    async fn delete_rating(&self, rating_id: u64) -> DispatchResult<()> {
        if !self.store.delete_rating(rating_id).await? {
            return Err(DispatchError::RatingNotFound(rating_id));
        }
        tracing::info!(rating_id, "Rating deleted");
        Ok(())
    }
}
