// src/state.rs
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    errors::{DispatchError, DispatchResult},
    services::{
        admin_service::AdminService,
        dispatch_service::DispatchService,
        identity_service::StoreIdentityResolver,
        message_templates::MessageTemplates,
        messaging_service::{MockNotifier, Notifier, WhatsAppConfig, WhatsAppNotifier},
        notification_dispatcher::{DeliveryConfig, NotificationDispatcher},
        rating_service::RatingService,
        route_service::{HaversineEstimator, OsrmRouteEstimator, RouteEstimator},
        store::{MemoryRideStore, RedisRideStore, RideStore, StoreConfig},
    },
};

pub struct AppState {
    pub identity: Arc<StoreIdentityResolver>,
    pub dispatch: Arc<DispatchService>,
    pub admin: Arc<AdminService>,
    pub ratings: Arc<RatingService>,
    pub routes: Arc<dyn RouteEstimator>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub redis_url: Option<String>,
    pub public_base_url: String,
    pub admin_token: Option<String>,
    pub whatsapp: Option<WhatsAppConfig>,
    pub osrm_url: Option<String>,
    pub average_speed_kmh: f64,
    pub delivery: DeliveryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            redis_url: None,
            public_base_url: "http://localhost:3000".to_string(),
            admin_token: None,
            whatsapp: None,
            osrm_url: None,
            average_speed_kmh: 30.0,
            delivery: DeliveryConfig::default(),
        }
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(name: &str, default: T) -> DispatchResult<T> {
    match optional_env(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DispatchError::InvalidConfiguration(format!("{} is not a valid value: {}", name, raw))),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> DispatchResult<Self> {
        let defaults = Self::default();

        let average_speed_kmh = parse_env("AVERAGE_SPEED_KMH", defaults.average_speed_kmh)?;
        if average_speed_kmh <= 0.0 {
            return Err(DispatchError::InvalidConfiguration(
                "AVERAGE_SPEED_KMH must be positive".to_string(),
            ));
        }
        let max_attempts = parse_env("NOTIFY_MAX_ATTEMPTS", defaults.delivery.max_attempts)?;
        if max_attempts == 0 {
            return Err(DispatchError::InvalidConfiguration(
                "NOTIFY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            bind_addr: optional_env("BIND_ADDR").unwrap_or(defaults.bind_addr),
            redis_url: optional_env("REDIS_URL"),
            public_base_url: optional_env("PUBLIC_BASE_URL").unwrap_or(defaults.public_base_url),
            admin_token: optional_env("ADMIN_TOKEN"),
            whatsapp: WhatsAppConfig::from_env()?,
            osrm_url: optional_env("OSRM_URL"),
            average_speed_kmh,
            delivery: DeliveryConfig {
                timeout: Duration::from_millis(parse_env("NOTIFY_TIMEOUT_MS", 5000)?),
                max_attempts,
                backoff: Duration::from_millis(parse_env("NOTIFY_BACKOFF_MS", 500)?),
            },
        })
    }
}

impl AppState {
    /// Connects the configured backends, falling back to in-process ones.
    pub async fn new(config: AppConfig) -> DispatchResult<Self> {
        let store: Arc<dyn RideStore> = match &config.redis_url {
            Some(redis_url) => Arc::new(
                RedisRideStore::new(StoreConfig {
                    redis_url: redis_url.clone(),
                    ..Default::default()
                })
                .await?,
            ),
            None => {
                tracing::warn!("REDIS_URL not set, using in-memory ride store");
                Arc::new(MemoryRideStore::new())
            }
        };

        let notifier: Arc<dyn Notifier> = match &config.whatsapp {
            Some(whatsapp) => Arc::new(WhatsAppNotifier::new(whatsapp.clone())),
            None => {
                tracing::warn!("WhatsApp gateway not configured, using mock notifier");
                Arc::new(MockNotifier)
            }
        };

        let routes: Arc<dyn RouteEstimator> = match &config.osrm_url {
            Some(osrm_url) => Arc::new(OsrmRouteEstimator::new(osrm_url)?),
            None => Arc::new(HaversineEstimator {
                average_speed_kmh: config.average_speed_kmh,
            }),
        };

        Ok(Self::with_parts(config, store, notifier, routes))
    }

    /// Wires the services around already-built backends. Must run inside a
    /// tokio runtime because it starts the notification retry worker.
    pub fn with_parts(
        config: AppConfig,
        store: Arc<dyn RideStore>,
        notifier: Arc<dyn Notifier>,
        routes: Arc<dyn RouteEstimator>,
    ) -> Self {
        if config.admin_token.is_none() {
            tracing::warn!("ADMIN_TOKEN not set, admin API is disabled");
        }

        let notifications = Arc::new(NotificationDispatcher::new(notifier, config.delivery));
        let dispatch = Arc::new(DispatchService::new(
            store.clone(),
            notifications,
            Arc::new(MessageTemplates::default()),
            &config.public_base_url,
        ));
        let identity = Arc::new(StoreIdentityResolver::new(store.clone(), config.admin_token.clone()));
        let admin = Arc::new(AdminService::new(store.clone()));
        let ratings = Arc::new(RatingService::new(store));

        Self {
            identity,
            dispatch,
            admin,
            ratings,
            routes,
        }
    }
}
