//! Allergen disclosure records: a buyer-confirmed `pre_order` snapshot
//! before payment, and a seller-confirmed `handover` snapshot before
//! completion. One record per (order, phase); re-recording overwrites the
//! previous attempt.

use crate::db::Store;
use crate::error::{CoreError, ErrorCode};
use crate::orders;
use crate::types::{DisclosurePhase, OrderStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct DisclosureRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub phase: DisclosurePhase,
    pub allergens: serde_json::Value,
    pub confirmation_method: String,
    pub confirmed_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Upsert the disclosure for one phase. Phase rules:
/// - `pre_order`: recorded by the buyer before payment confirmation.
/// - `handover`: recorded by the seller before completion.
pub async fn record(
    store: &Store,
    actor_id: Uuid,
    order_id: Uuid,
    phase: DisclosurePhase,
    allergens: &serde_json::Value,
    confirmation_method: &str,
) -> Result<DisclosureRecord, CoreError> {
    if !allergens.is_array() {
        return Err(CoreError::validation(
            "allergens must be a list",
            Some(serde_json::json!({ "fields": ["allergens"] })),
        ));
    }

    let mut tx = store.begin().await?;
    let order = orders::lock_order(&mut tx, order_id).await?;

    match phase {
        DisclosurePhase::PreOrder => {
            if order.buyer_id != actor_id {
                return Err(CoreError::domain(
                    ErrorCode::ForbiddenOrderScope,
                    "pre-order disclosure is recorded by the buyer",
                ));
            }
            if order.payment_completed {
                return Err(CoreError::domain(
                    ErrorCode::OrderInvalidState,
                    "pre-order disclosure must precede payment confirmation",
                ));
            }
        }
        DisclosurePhase::Handover => {
            if order.seller_id != actor_id {
                return Err(CoreError::domain(
                    ErrorCode::ForbiddenOrderScope,
                    "handover disclosure is recorded by the seller",
                ));
            }
            if matches!(order.status, OrderStatus::Completed) || orders::is_terminal(order.status) {
                return Err(CoreError::domain(
                    ErrorCode::OrderInvalidState,
                    "handover disclosure must precede completion",
                ));
            }
        }
    }

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO allergen_disclosure_records (
            id, order_id, phase, allergens, confirmation_method, confirmed_by, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, now())
        ON CONFLICT (order_id, phase) DO UPDATE
        SET allergens = EXCLUDED.allergens,
            confirmation_method = EXCLUDED.confirmation_method,
            confirmed_by = EXCLUDED.confirmed_by,
            created_at = now()
        "#,
    )
    .bind(id)
    .bind(order_id)
    .bind(phase.as_str())
    .bind(allergens)
    .bind(confirmation_method)
    .bind(actor_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    fetch(store, order_id, phase).await?.ok_or_else(|| {
        CoreError::domain(ErrorCode::Internal, "disclosure upsert did not persist")
    })
}

pub async fn fetch(
    store: &Store,
    order_id: Uuid,
    phase: DisclosurePhase,
) -> Result<Option<DisclosureRecord>, CoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, order_id, phase, allergens, confirmation_method, confirmed_by, created_at
        FROM allergen_disclosure_records
        WHERE order_id = $1 AND phase = $2
        "#,
    )
    .bind(order_id)
    .bind(phase.as_str())
    .fetch_optional(store.pool())
    .await?;

    row.map(|row| {
        let phase: String = row.try_get("phase")?;
        Ok::<_, CoreError>(DisclosureRecord {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            phase: DisclosurePhase::parse(&phase)?,
            allergens: row.try_get("allergens")?,
            confirmation_method: row.try_get("confirmation_method")?,
            confirmed_by: row.try_get("confirmed_by")?,
            created_at: row.try_get("created_at")?,
        })
    })
    .transpose()
}

pub async fn list_for_order(store: &Store, order_id: Uuid) -> Result<Vec<DisclosureRecord>, CoreError> {
    let mut records = Vec::new();
    for phase in [DisclosurePhase::PreOrder, DisclosurePhase::Handover] {
        if let Some(record) = fetch(store, order_id, phase).await? {
            records.push(record);
        }
    }
    Ok(records)
}
