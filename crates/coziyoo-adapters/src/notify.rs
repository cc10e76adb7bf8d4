//! Notification publishing seam. The outbox worker fans domain events into
//! a publisher; production wires the in-app store publisher from the
//! service crate, tests and local runs can use the log publisher.

use async_trait::async_trait;
use coziyoo_core::CoreError;
use tracing::info;
use uuid::Uuid;

#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(
        &self,
        user_id: Uuid,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<(), CoreError>;
}

/// Publisher that only logs. Useful when no notification sink is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotificationPublisher;

#[async_trait]
impl NotificationPublisher for LogNotificationPublisher {
    async fn publish(
        &self,
        user_id: Uuid,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<(), CoreError> {
        info!(user_id = %user_id, kind, payload = %payload, "notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_publisher_accepts_everything() {
        let publisher = LogNotificationPublisher;
        publisher
            .publish(Uuid::new_v4(), "order_status_changed", &serde_json::json!({}))
            .await
            .unwrap();
    }
}
