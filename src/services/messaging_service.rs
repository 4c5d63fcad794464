// src/services/messaging_service.rs
use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::errors::{DispatchError, DispatchResult};
use crate::models::messages::Notification;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Gateway request failed: {0}")]
    Network(String),

    #[error("Gateway rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Delivery timed out after {0}ms")]
    Timeout(u64),

    #[error("Delivery failed: {0}")]
    Other(String),
}

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub api_url: String,
    pub instance_id: String,
    pub token: String,
    pub client_token: String,
    pub group_id: String,
}

impl WhatsAppConfig {
    /// `None` when no gateway variable is set. Setting only some of them is
    /// a configuration error.
    pub fn from_env() -> DispatchResult<Option<Self>> {
        const VARS: [&str; 5] = [
            "WHATSAPP_API_URL",
            "WHATSAPP_INSTANCE_ID",
            "WHATSAPP_TOKEN",
            "WHATSAPP_CLIENT_TOKEN",
            "WHATSAPP_GROUP_ID",
        ];
        let lookup = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        if VARS.into_iter().all(|name| lookup(name).is_none()) {
            return Ok(None);
        }
        let require = |name: &str| lookup(name).ok_or_else(|| DispatchError::MissingEnvironmentVariable(name.to_string()));

        Ok(Some(Self {
            api_url: require("WHATSAPP_API_URL")?,
            instance_id: require("WHATSAPP_INSTANCE_ID")?,
            token: require("WHATSAPP_TOKEN")?,
            client_token: require("WHATSAPP_CLIENT_TOKEN")?,
            group_id: require("WHATSAPP_GROUP_ID")?,
        }))
    }

    fn base_url(&self) -> String {
        format!(
            "{}/instances/{}/token/{}",
            self.api_url.trim_end_matches('/'),
            self.instance_id,
            self.token
        )
    }
}

/// Delivers pre-rendered messages. Template rendering happens before this.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_group_text(&self, message: &str) -> Result<(), NotificationError>;
    async fn send_text(&self, phone: &str, message: &str) -> Result<(), NotificationError>;
    async fn send_location(&self, phone: &str, latitude: f64, longitude: f64) -> Result<(), NotificationError>;

    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        match notification {
            Notification::GroupText { message } => self.send_group_text(message).await,
            Notification::Text { phone, message } => self.send_text(phone, message).await,
            Notification::Location {
                phone,
                latitude,
                longitude,
            } => self.send_location(phone, *latitude, *longitude).await,
        }
    }
}

pub struct WhatsAppNotifier {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppNotifier {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, endpoint: &str, body: serde_json::Value) -> Result<(), NotificationError> {
        let url = format!("{}/{}", self.config.base_url(), endpoint);

        let response = self
            .client
            .post(&url)
            .header("Client-Token", &self.config.client_token)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| NotificationError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("WhatsApp {} request failed: {} {}", endpoint, status, body);
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!("WhatsApp {} accepted", endpoint);
        Ok(())
    }
}

#[async_trait]
impl Notifier for WhatsAppNotifier {
    async fn send_group_text(&self, message: &str) -> Result<(), NotificationError> {
        self.send_text(&self.config.group_id, message).await
    }

    async fn send_text(&self, phone: &str, message: &str) -> Result<(), NotificationError> {
        tracing::info!("Sending WhatsApp text to {}", phone);
        self.post("send-text", json!({ "phone": phone, "message": message }))
            .await
    }

    async fn send_location(&self, phone: &str, latitude: f64, longitude: f64) -> Result<(), NotificationError> {
        tracing::info!("Sending WhatsApp location to {}", phone);
        self.post(
            "send-location",
            json!({ "phone": phone, "latitude": latitude, "longitude": longitude }),
        )
        .await
    }
}

// Mock notifier for development and testing
#[derive(Debug, Default)]
pub struct MockNotifier;

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_group_text(&self, message: &str) -> Result<(), NotificationError> {
        tracing::info!("[MOCK] Would broadcast to drivers group: {}", message);
        Ok(())
    }

    async fn send_text(&self, phone: &str, message: &str) -> Result<(), NotificationError> {
        tracing::info!("[MOCK] Would send text to {}: {}", phone, message);
        Ok(())
    }

    async fn send_location(&self, phone: &str, latitude: f64, longitude: f64) -> Result<(), NotificationError> {
        tracing::info!("[MOCK] Would send location to {}: {}, {}", phone, latitude, longitude);
        Ok(())
    }
}
