// src/services/route_service.rs
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    errors::{DispatchError, DispatchResult, ValidationError},
    models::ride::Coordinates,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct RouteEstimate {
    pub distance_km: f64,
    pub duration_min: u32,
}

impl RouteEstimate {
    fn new(distance_km: f64, duration_min: f64) -> Self {
        Self {
            distance_km: (distance_km * 100.0).round() / 100.0,
            duration_min: duration_min.ceil().max(0.0) as u32,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RouteRequest {
    pub origin: Coordinates,
    pub destination: Coordinates,
}

impl RouteRequest {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !self.origin.is_valid() {
            errors.push(ValidationError::new("origin", "Coordinates out of range"));
        }
        if !self.destination.is_valid() {
            errors.push(ValidationError::new("destination", "Coordinates out of range"));
        }
        errors
    }
}

#[async_trait]
pub trait RouteEstimator: Send + Sync {
    async fn estimate_route(&self, origin: Coordinates, destination: Coordinates) -> DispatchResult<RouteEstimate>;
}

pub fn haversine_km(from: Coordinates, to: Coordinates) -> f64 {
    let lat1_rad = from.latitude.to_radians();
    let lat2_rad = to.latitude.to_radians();
    let delta_lat = (to.latitude - from.latitude).to_radians();
    let delta_lon = (to.longitude - from.longitude).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2) + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Great-circle distance driven at a constant average speed. Used when no
/// routing server is configured.
#[derive(Debug, Clone)]
pub struct HaversineEstimator {
    pub average_speed_kmh: f64,
}

impl Default for HaversineEstimator {
    fn default() -> Self {
        Self {
            average_speed_kmh: 30.0,
        }
    }
}

#[async_trait]
impl RouteEstimator for HaversineEstimator {
    async fn estimate_route(&self, origin: Coordinates, destination: Coordinates) -> DispatchResult<RouteEstimate> {
        let distance_km = haversine_km(origin, destination);
        Ok(RouteEstimate::new(distance_km, distance_km / self.average_speed_kmh * 60.0))
    }
}

#[derive(Deserialize)]
struct OsrmRouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct OsrmRoute {
    distance: f64, // meters
    duration: f64, // seconds
}

/// Thin client for the OSRM `route` service.
#[derive(Debug, Clone)]
pub struct OsrmRouteEstimator {
    client: reqwest::Client,
    endpoint: String,
}

impl OsrmRouteEstimator {
    /// `endpoint` is the server root, e.g. `http://localhost:5000`.
    pub fn new(endpoint: &str) -> DispatchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DispatchError::InvalidConfiguration(format!("OSRM client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn route_url(&self, origin: Coordinates, destination: Coordinates) -> DispatchResult<Url> {
        let coords = format!(
            "{:.6},{:.6};{:.6},{:.6}",
            origin.longitude, origin.latitude, destination.longitude, destination.latitude
        );
        let mut url = Url::parse(&format!("{}/route/v1/driving/{}", self.endpoint, coords))
            .map_err(|e| DispatchError::RouteUnavailable(format!("failed to build OSRM URL: {}", e)))?;
        url.query_pairs_mut().append_pair("overview", "false");
        Ok(url)
    }
}

#[async_trait]
impl RouteEstimator for OsrmRouteEstimator {
    async fn estimate_route(&self, origin: Coordinates, destination: Coordinates) -> DispatchResult<RouteEstimate> {
        let url = self.route_url(origin, destination)?;
        tracing::debug!("Requesting OSRM route: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DispatchError::RouteUnavailable(e.to_string()))?;
        let parsed: OsrmRouteResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::RouteUnavailable(format!("invalid OSRM response: {}", e)))?;

        if parsed.code != "Ok" {
            return Err(DispatchError::RouteUnavailable(
                parsed.message.unwrap_or(parsed.code),
            ));
        }
        let route = parsed
            .routes
            .first()
            .ok_or_else(|| DispatchError::RouteUnavailable("no route found".to_string()))?;

        Ok(RouteEstimate::new(route.distance / 1000.0, route.duration / 60.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // Praça da Sé to Avenida Paulista, roughly 2.6 km
        let se = Coordinates::new(-23.5503, -46.6339);
        let paulista = Coordinates::new(-23.5614, -46.6559);
        let distance = haversine_km(se, paulista);
        assert!((distance - 2.58).abs() < 0.1, "got {}", distance);
        assert_eq!(haversine_km(se, se), 0.0);
    }

    #[tokio::test]
    async fn test_estimate_rounds_distance_and_duration() {
        let estimator = HaversineEstimator::default();
        let estimate = estimator
            .estimate_route(Coordinates::new(0.0, 0.0), Coordinates::new(0.0, 0.1))
            .await
            .unwrap();
        // 0.1 degree of longitude at the equator is about 11.12 km
        assert_eq!(estimate.distance_km, 11.12);
        assert_eq!(estimate.duration_min, 23);
    }

    #[test]
    fn test_osrm_url_uses_lon_lat_order() {
        let estimator = OsrmRouteEstimator::new("http://localhost:5000/").unwrap();
        let url = estimator
            .route_url(Coordinates::new(-23.5, -46.6), Coordinates::new(-23.6, -46.7))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/route/v1/driving/-46.600000,-23.500000;-46.700000,-23.600000?overview=false"
        );
    }

    #[test]
    fn test_route_request_validation() {
        let request = RouteRequest {
            origin: Coordinates::new(91.0, 0.0),
            destination: Coordinates::new(0.0, 0.0),
        };
        assert_eq!(request.validate().len(), 1);
    }
}
