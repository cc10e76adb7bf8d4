//! Transactional event outbox.
//!
//! Producers enqueue inside the same transaction as the domain write, so a
//! committed change always has its event row and an uncommitted change never
//! does. A worker claims pending rows with `FOR UPDATE SKIP LOCKED`,
//! dispatches them to registered handlers, and retries with exponential
//! backoff; rows that exhaust their attempts move to the dead-letter table
//! for operator inspection. Delivery is at-least-once; handlers dedup on
//! `aggregate_id`.

use crate::db::{Store, Tx};
use crate::error::CoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const MAX_ATTEMPTS: i32 = 8;
const BACKOFF_BASE_SECS: i64 = 30;
const BACKOFF_CAP_SECS: i64 = 3600;
const CLAIM_BATCH: i64 = 25;

/// Event types produced by the domain modules.
pub mod event_type {
    pub const PAYMENT_SESSION_STARTED: &str = "payment_session_started";
    pub const PAYMENT_CONFIRMED: &str = "payment_confirmed";
    pub const LOT_RECALLED: &str = "lot_recalled";
    pub const COMPLIANCE_STATUS_CHANGED: &str = "compliance_status_changed";
    pub const DISPUTE_OPENED: &str = "dispute_opened";
    pub const DISPUTE_RESOLVED: &str = "dispute_resolved";
    pub const DELIVERY_PIN_ISSUED: &str = "delivery_pin_issued";
    pub const DELIVERY_PIN_VERIFIED: &str = "delivery_pin_verified";
    pub const ORDER_STATUS_CHANGED: &str = "order_status_changed";
    pub const ORDER_COMPLETED: &str = "order_completed";
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub payload: serde_json::Value,
    pub attempt_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub event_type: &'static str,
    pub aggregate_type: &'static str,
    pub aggregate_id: Uuid,
    pub payload: serde_json::Value,
}

/// Enqueue an event inside the producing transaction.
pub async fn enqueue(tx: &mut Tx<'_>, event: NewOutboxEvent) -> Result<Uuid, CoreError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO outbox_events (
            id, event_type, aggregate_type, aggregate_id, payload,
            status, attempt_count, next_attempt_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, 'pending', 0, now(), now(), now())
        "#,
    )
    .bind(id)
    .bind(event.event_type)
    .bind(event.aggregate_type)
    .bind(event.aggregate_id)
    .bind(&event.payload)
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

/// Retry delay after `attempts` failed deliveries: 30s doubling, capped at
/// one hour.
pub fn backoff_delay(attempts: i32) -> Duration {
    let exp = attempts.clamp(0, 30) as u32;
    let secs = BACKOFF_BASE_SECS
        .saturating_mul(1i64 << exp.min(20))
        .min(BACKOFF_CAP_SECS);
    Duration::seconds(secs)
}

/// A consumer of outbox events. Implementations must be idempotent: the
/// worker may deliver the same event more than once.
#[async_trait]
pub trait OutboxHandler: Send + Sync {
    async fn handle(&self, event: &OutboxEvent) -> Result<(), CoreError>;
}

/// Event-type → handler registry consumed by the worker.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn OutboxHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, event_type: &'static str, handler: Arc<dyn OutboxHandler>) -> Self {
        self.handlers.insert(event_type, handler);
        self
    }

    pub fn get(&self, event_type: &str) -> Option<&Arc<dyn OutboxHandler>> {
        self.handlers.get(event_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Claim a batch of due pending rows and mark them `processing`.
async fn claim_batch(store: &Store) -> Result<Vec<OutboxEvent>, CoreError> {
    let rows = sqlx::query(
        r#"
        UPDATE outbox_events
        SET status = 'processing', updated_at = now()
        WHERE id IN (
            SELECT id FROM outbox_events
            WHERE status = 'pending' AND next_attempt_at <= now()
            ORDER BY next_attempt_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, event_type, aggregate_type, aggregate_id, payload,
                  attempt_count, created_at
        "#,
    )
    .bind(CLAIM_BATCH)
    .fetch_all(store.pool())
    .await?;

    rows.iter()
        .map(|row| {
            Ok(OutboxEvent {
                id: row.try_get("id")?,
                event_type: row.try_get("event_type")?,
                aggregate_type: row.try_get("aggregate_type")?,
                aggregate_id: row.try_get("aggregate_id")?,
                payload: row.try_get("payload")?,
                attempt_count: row.try_get("attempt_count")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}

async fn mark_processed(store: &Store, id: Uuid) -> Result<(), CoreError> {
    sqlx::query("UPDATE outbox_events SET status = 'processed', updated_at = now() WHERE id = $1")
        .bind(id)
        .execute(store.pool())
        .await?;
    Ok(())
}

async fn mark_failed(store: &Store, event: &OutboxEvent, err: &str) -> Result<(), CoreError> {
    let attempts = event.attempt_count + 1;
    if attempts >= MAX_ATTEMPTS {
        let mut tx = store.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO outbox_dead_letters (
                id, event_type, aggregate_type, aggregate_id, payload,
                attempt_count, last_error, failed_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, now(), $8)
            "#,
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .bind(&event.payload)
        .bind(attempts)
        .bind(err)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM outbox_events WHERE id = $1")
            .bind(event.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        error!(
            event_id = %event.id,
            event_type = %event.event_type,
            "outbox event moved to dead letter after {attempts} attempts"
        );
        return Ok(());
    }

    sqlx::query(
        r#"
        UPDATE outbox_events
        SET status = 'pending', attempt_count = $2, next_attempt_at = $3,
            last_error = $4, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(event.id)
    .bind(attempts)
    .bind(Utc::now() + backoff_delay(attempts))
    .bind(err)
    .execute(store.pool())
    .await?;
    Ok(())
}

/// One worker pass: claim due rows, dispatch each, settle the outcome.
/// Returns the number of rows processed.
pub async fn run_once(store: &Store, registry: &HandlerRegistry) -> Result<usize, CoreError> {
    let batch = claim_batch(store).await?;
    let claimed = batch.len();

    for event in &batch {
        let outcome = match registry.get(&event.event_type) {
            Some(handler) => handler.handle(event).await,
            // No handler registered is an operator error, not a retry case.
            None => Err(CoreError::domain(
                crate::error::ErrorCode::Internal,
                format!("no handler registered for '{}'", event.event_type),
            )),
        };

        match outcome {
            Ok(()) => mark_processed(store, event.id).await?,
            Err(err) => {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    attempt = event.attempt_count + 1,
                    error = %err,
                    "outbox handler failed"
                );
                mark_failed(store, event, &err.to_string()).await?;
            }
        }
    }

    Ok(claimed)
}

/// Long-running worker loop. Polls on `interval`, drains all due work each
/// tick, and keeps running through store hiccups.
pub async fn run_worker(
    store: Store,
    registry: Arc<HandlerRegistry>,
    interval: std::time::Duration,
) {
    info!(handlers = registry.len(), "outbox worker started");
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        loop {
            match run_once(&store, &registry).await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) => {
                    error!(error = %err, "outbox pass failed; backing off to next tick");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::seconds(30));
        assert_eq!(backoff_delay(1), Duration::seconds(60));
        assert_eq!(backoff_delay(2), Duration::seconds(120));
        assert_eq!(backoff_delay(6), Duration::seconds(1920));
        assert_eq!(backoff_delay(7), Duration::seconds(3600));
        assert_eq!(backoff_delay(50), Duration::seconds(3600));
    }

    #[test]
    fn registry_routes_by_event_type() {
        struct Nop;
        #[async_trait]
        impl OutboxHandler for Nop {
            async fn handle(&self, _event: &OutboxEvent) -> Result<(), CoreError> {
                Ok(())
            }
        }

        let registry = HandlerRegistry::new()
            .register(event_type::PAYMENT_CONFIRMED, Arc::new(Nop))
            .register(event_type::LOT_RECALLED, Arc::new(Nop));
        assert_eq!(registry.len(), 2);
        assert!(registry.get(event_type::PAYMENT_CONFIRMED).is_some());
        assert!(registry.get("something_else").is_none());
    }
}
