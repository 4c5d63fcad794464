// src/services/notification_dispatcher.rs
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::messages::Notification;
use crate::services::messaging_service::{NotificationError, Notifier};

#[derive(Debug, Clone, Copy)]
pub struct DeliveryConfig {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            max_attempts: 4,
            backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
struct RetryJob {
    id: Uuid,
    notification: Notification,
}

/// Sends the messages produced by a committed ride transition.
///
/// Each message gets one attempt bounded by `timeout`, in batch order. A failed
/// message becomes a warning for the caller and is handed to a background
/// worker that keeps retrying it with exponential backoff. Nothing here can
/// fail the transition that produced the batch.
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    config: DeliveryConfig,
    retries: mpsc::UnboundedSender<RetryJob>,
}

impl NotificationDispatcher {
    /// Spawns the retry worker, so this must run inside a tokio runtime.
    pub fn new(notifier: Arc<dyn Notifier>, config: DeliveryConfig) -> Self {
        let (retries, queue) = mpsc::unbounded_channel();
        tokio::spawn(retry_worker(notifier.clone(), config, queue));
        Self {
            notifier,
            config,
            retries,
        }
    }

    /// Delivers `batch` in order and returns one warning per failed message.
    pub async fn dispatch(&self, batch: Vec<Notification>) -> Vec<String> {
        let mut warnings = Vec::new();

        for notification in batch {
            let id = Uuid::new_v4();
            match attempt(self.notifier.as_ref(), &notification, self.config.timeout).await {
                Ok(()) => {
                    tracing::debug!(notification_id = %id, "Delivered {} to {}", notification.shape(), notification.recipient());
                }
                Err(e) => {
                    tracing::warn!(
                        notification_id = %id,
                        "Failed to deliver {} to {}: {}",
                        notification.shape(),
                        notification.recipient(),
                        e
                    );
                    warnings.push(format!(
                        "Could not deliver {} to {}: {}",
                        notification.shape(),
                        notification.recipient(),
                        e
                    ));
                    if self.config.max_attempts > 1 && self.retries.send(RetryJob { id, notification }).is_err() {
                        tracing::error!(notification_id = %id, "Retry worker is gone, dropping notification");
                    }
                }
            }
        }

        warnings
    }
}

async fn attempt(
    notifier: &dyn Notifier,
    notification: &Notification,
    timeout: Duration,
) -> Result<(), NotificationError> {
    match tokio::time::timeout(timeout, notifier.deliver(notification)).await {
        Ok(result) => result,
        Err(_) => Err(NotificationError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Delay before attempt number `attempt` (the first retry is attempt 2).
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponential = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(2)));
    let jitter_ms = (base.as_millis() as u64) / 2;
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_ms)
    };
    exponential + Duration::from_millis(jitter)
}

async fn retry_worker(
    notifier: Arc<dyn Notifier>,
    config: DeliveryConfig,
    mut queue: mpsc::UnboundedReceiver<RetryJob>,
) {
    while let Some(job) = queue.recv().await {
        let notifier = notifier.clone();
        tokio::spawn(async move { retry(notifier, config, job).await });
    }
    tracing::debug!("Notification retry worker stopped");
}

async fn retry(notifier: Arc<dyn Notifier>, config: DeliveryConfig, job: RetryJob) {
    for attempt_number in 2..=config.max_attempts {
        tokio::time::sleep(backoff_delay(config.backoff, attempt_number)).await;

        match attempt(notifier.as_ref(), &job.notification, config.timeout).await {
            Ok(()) => {
                tracing::info!(
                    notification_id = %job.id,
                    "Delivered {} to {} on attempt {}",
                    job.notification.shape(),
                    job.notification.recipient(),
                    attempt_number
                );
                return;
            }
            Err(e) => {
                tracing::warn!(notification_id = %job.id, "Attempt {} failed: {}", attempt_number, e);
            }
        }
    }

    tracing::error!(
        notification_id = %job.id,
        "Giving up on {} to {} after {} attempts",
        job.notification.shape(),
        job.notification.recipient(),
        config.max_attempts
    );
}
