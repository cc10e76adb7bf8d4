//! Outbox event handlers. The fan-out handler turns domain events into
//! in-app notification rows; notification ids are derived from the event id
//! so at-least-once delivery stays idempotent.

use async_trait::async_trait;
use coziyoo_core::outbox::{event_type, HandlerRegistry, OutboxEvent, OutboxHandler};
use coziyoo_core::{notifications, orders, CoreError, Store};
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

pub struct NotificationFanout {
    store: Store,
}

impl NotificationFanout {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    fn notification_id(event: &OutboxEvent, target: Uuid) -> Uuid {
        Uuid::new_v5(&event.id, target.as_bytes())
    }

    async fn notify(
        &self,
        event: &OutboxEvent,
        target: Uuid,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<(), CoreError> {
        notifications::publish(
            &self.store,
            Self::notification_id(event, target),
            target,
            kind,
            payload,
        )
        .await?;
        Ok(())
    }

    async fn order_parties(&self, order_id: Uuid) -> Result<(Uuid, Uuid), CoreError> {
        let order = orders::fetch_order(&self.store, order_id).await?;
        Ok((order.buyer_id, order.seller_id))
    }
}

#[async_trait]
impl OutboxHandler for NotificationFanout {
    async fn handle(&self, event: &OutboxEvent) -> Result<(), CoreError> {
        let payload = &event.payload;
        match event.event_type.as_str() {
            event_type::ORDER_STATUS_CHANGED => {
                let (buyer, _) = self.order_parties(event.aggregate_id).await?;
                self.notify(event, buyer, "order_status_changed", payload).await
            }
            event_type::ORDER_COMPLETED => {
                let (_, seller) = self.order_parties(event.aggregate_id).await?;
                self.notify(event, seller, "order_completed", payload).await
            }
            event_type::PAYMENT_CONFIRMED => {
                let (buyer, seller) = self.order_parties(event.aggregate_id).await?;
                self.notify(event, buyer, "payment_confirmed", payload).await?;
                self.notify(event, seller, "payment_confirmed", payload).await
            }
            event_type::DELIVERY_PIN_ISSUED => {
                let (buyer, _) = self.order_parties(event.aggregate_id).await?;
                self.notify(event, buyer, "delivery_pin", payload).await
            }
            event_type::DELIVERY_PIN_VERIFIED => {
                let (buyer, _) = self.order_parties(event.aggregate_id).await?;
                self.notify(event, buyer, "delivery_confirmed", payload).await
            }
            event_type::DISPUTE_OPENED | event_type::DISPUTE_RESOLVED => {
                let order_id = payload
                    .get("orderId")
                    .and_then(|v| v.as_str())
                    .and_then(|v| Uuid::parse_str(v).ok());
                if let Some(order_id) = order_id {
                    let (buyer, seller) = self.order_parties(order_id).await?;
                    self.notify(event, buyer, &event.event_type, payload).await?;
                    self.notify(event, seller, &event.event_type, payload).await?;
                }
                Ok(())
            }
            event_type::COMPLIANCE_STATUS_CHANGED => {
                let seller = payload
                    .get("sellerId")
                    .and_then(|v| v.as_str())
                    .and_then(|v| Uuid::parse_str(v).ok());
                if let Some(seller) = seller {
                    self.notify(event, seller, "compliance_status_changed", payload).await?;
                }
                Ok(())
            }
            event_type::LOT_RECALLED => {
                // Notify every buyer whose order drew from the recalled lot.
                let rows = sqlx::query(
                    r#"
                    SELECT DISTINCT o.buyer_id
                    FROM order_item_lot_allocations a
                    JOIN order_items oi ON oi.id = a.order_item_id
                    JOIN orders o ON o.id = oi.order_id
                    WHERE a.lot_id = $1
                    "#,
                )
                .bind(event.aggregate_id)
                .fetch_all(self.store.pool())
                .await?;
                for row in rows {
                    let buyer: Uuid = row.try_get("buyer_id")?;
                    self.notify(event, buyer, "lot_recalled", payload).await?;
                }
                Ok(())
            }
            // Session-start is a bookkeeping event; nothing to fan out.
            event_type::PAYMENT_SESSION_STARTED => Ok(()),
            other => {
                tracing::warn!(event_type = other, "fanout received unregistered event type");
                Ok(())
            }
        }
    }
}

/// Wire every produced event type to its handler.
pub fn build_registry(store: Store) -> HandlerRegistry {
    let fanout = Arc::new(NotificationFanout::new(store));
    HandlerRegistry::new()
        .register(event_type::ORDER_STATUS_CHANGED, fanout.clone())
        .register(event_type::ORDER_COMPLETED, fanout.clone())
        .register(event_type::PAYMENT_SESSION_STARTED, fanout.clone())
        .register(event_type::PAYMENT_CONFIRMED, fanout.clone())
        .register(event_type::DELIVERY_PIN_ISSUED, fanout.clone())
        .register(event_type::DELIVERY_PIN_VERIFIED, fanout.clone())
        .register(event_type::DISPUTE_OPENED, fanout.clone())
        .register(event_type::DISPUTE_RESOLVED, fanout.clone())
        .register(event_type::COMPLIANCE_STATUS_CHANGED, fanout.clone())
        .register(event_type::LOT_RECALLED, fanout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn notification_ids_are_deterministic_per_event_and_target() {
        let event = OutboxEvent {
            id: Uuid::new_v4(),
            event_type: event_type::PAYMENT_CONFIRMED.into(),
            aggregate_type: "order".into(),
            aggregate_id: Uuid::new_v4(),
            payload: serde_json::json!({}),
            attempt_count: 0,
            created_at: Utc::now(),
        };
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();

        let a = NotificationFanout::notification_id(&event, buyer);
        let b = NotificationFanout::notification_id(&event, buyer);
        let c = NotificationFanout::notification_id(&event, seller);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
