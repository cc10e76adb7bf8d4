//! Delivery proof: a seller-issued 6-digit PIN, stored as a sha256 digest
//! with a 10-minute TTL and at most 5 verification attempts. Verification
//! uses a constant-time digest comparison. Regeneration replaces the record.

use crate::db::Store;
use crate::error::{CoreError, ErrorCode};
use crate::orders;
use crate::outbox::{self, event_type, NewOutboxEvent};
use crate::types::{DeliveryProofStatus, DeliveryType, OrderStatus};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::Row;
use uuid::Uuid;

pub const PIN_TTL_MINUTES: i64 = 10;
pub const MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryProof {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: DeliveryProofStatus,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub verification_attempts: i32,
    pub verified_at: Option<DateTime<Utc>>,
}

pub fn generate_pin() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

pub fn pin_digest(pin: &str) -> String {
    hex::encode(Sha256::digest(pin.as_bytes()))
}

/// Constant-time equality over the hex digests.
fn digests_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn proof_from_row(row: &sqlx::postgres::PgRow) -> Result<(DeliveryProof, String), CoreError> {
    let status: String = row.try_get("status")?;
    Ok((
        DeliveryProof {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            status: DeliveryProofStatus::parse(&status)?,
            sent_at: row.try_get("sent_at")?,
            expires_at: row.try_get("expires_at")?,
            verification_attempts: row.try_get("verification_attempts")?,
            verified_at: row.try_get("verified_at")?,
        },
        row.try_get("pin_hash")?,
    ))
}

const PROOF_COLUMNS: &str =
    "id, order_id, pin_hash, sent_at, expires_at, verification_attempts, status, verified_at";

/// Issue (or reissue) the delivery PIN for an in-delivery order. The clear
/// PIN is returned once, for the buyer notification path, and never stored.
pub async fn issue_pin(
    store: &Store,
    seller_id: Uuid,
    order_id: Uuid,
) -> Result<(DeliveryProof, String), CoreError> {
    let mut tx = store.begin().await?;
    let order = orders::lock_order(&mut tx, order_id).await?;
    if order.seller_id != seller_id {
        return Err(CoreError::domain(
            ErrorCode::ForbiddenOrderScope,
            "order belongs to another seller",
        ));
    }
    if order.delivery_type != DeliveryType::Delivery {
        return Err(CoreError::domain(
            ErrorCode::DeliveryProofNotRequired,
            "pickup orders do not use delivery proof",
        ));
    }
    if !matches!(order.status, OrderStatus::InDelivery | OrderStatus::Delivered) {
        return Err(CoreError::domain(
            ErrorCode::OrderInvalidState,
            "delivery PIN is issued during delivery",
        ));
    }

    let pin = generate_pin();
    let id = Uuid::new_v4();
    let now = Utc::now();
    let expires_at = now + Duration::minutes(PIN_TTL_MINUTES);

    // Regeneration replaces the previous record wholesale; a failed or
    // expired PIN does not survive as history.
    sqlx::query(
        r#"
        INSERT INTO delivery_proof_records (
            id, order_id, pin_hash, sent_at, expires_at, verification_attempts,
            status, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, 0, 'pending', $4, $4)
        ON CONFLICT (order_id) DO UPDATE
        SET pin_hash = EXCLUDED.pin_hash,
            sent_at = EXCLUDED.sent_at,
            expires_at = EXCLUDED.expires_at,
            verification_attempts = 0,
            status = 'pending',
            verified_at = NULL,
            updated_at = now()
        "#,
    )
    .bind(id)
    .bind(order_id)
    .bind(pin_digest(&pin))
    .bind(now)
    .bind(expires_at)
    .execute(&mut *tx)
    .await?;

    outbox::enqueue(
        &mut tx,
        NewOutboxEvent {
            event_type: event_type::DELIVERY_PIN_ISSUED,
            aggregate_type: "order",
            aggregate_id: order_id,
            payload: serde_json::json!({
                "orderId": order_id,
                "buyerId": order.buyer_id,
                // The PIN rides the outbox to the in-app notification only.
                "pin": pin,
                "expiresAt": expires_at,
            }),
        },
    )
    .await?;

    tx.commit().await?;
    let proof = fetch(store, order_id)
        .await?
        .ok_or_else(|| CoreError::domain(ErrorCode::Internal, "pin upsert did not persist"))?;
    Ok((proof, pin))
}

pub async fn fetch(store: &Store, order_id: Uuid) -> Result<Option<DeliveryProof>, CoreError> {
    let query = format!("SELECT {PROOF_COLUMNS} FROM delivery_proof_records WHERE order_id = $1");
    let row = sqlx::query(&query)
        .bind(order_id)
        .fetch_optional(store.pool())
        .await?;
    row.as_ref()
        .map(|row| proof_from_row(row).map(|(proof, _)| proof))
        .transpose()
}

/// Verify a PIN attempt. Wrong digits burn an attempt; the fifth failure and
/// an expired PIN are terminal for that record until the seller regenerates.
pub async fn verify_pin(
    store: &Store,
    seller_id: Uuid,
    order_id: Uuid,
    candidate: &str,
) -> Result<DeliveryProof, CoreError> {
    let mut tx = store.begin().await?;
    let order = orders::lock_order(&mut tx, order_id).await?;
    if order.seller_id != seller_id {
        return Err(CoreError::domain(
            ErrorCode::ForbiddenOrderScope,
            "order belongs to another seller",
        ));
    }

    let query = format!(
        "SELECT {PROOF_COLUMNS} FROM delivery_proof_records WHERE order_id = $1 FOR UPDATE"
    );
    let row = sqlx::query(&query)
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            CoreError::not_found(ErrorCode::DeliveryProofNotFound, "no delivery PIN issued")
        })?;
    let (proof, stored_digest) = proof_from_row(&row)?;

    match proof.status {
        DeliveryProofStatus::Verified => {
            tx.commit().await?;
            return Ok(proof);
        }
        DeliveryProofStatus::Failed => {
            return Err(CoreError::domain(
                ErrorCode::PinMaxAttempts,
                "this PIN is locked; regenerate to retry",
            ));
        }
        DeliveryProofStatus::Expired => {
            return Err(CoreError::domain(
                ErrorCode::PinExpired,
                "this PIN expired; regenerate to retry",
            ));
        }
        DeliveryProofStatus::Pending => {}
    }

    if Utc::now() > proof.expires_at {
        sqlx::query(
            "UPDATE delivery_proof_records SET status = 'expired', updated_at = now() WHERE id = $1",
        )
        .bind(proof.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        return Err(CoreError::domain(
            ErrorCode::PinExpired,
            "this PIN expired; regenerate to retry",
        ));
    }

    let attempts = proof.verification_attempts + 1;
    if !digests_match(&stored_digest, &pin_digest(candidate)) {
        let exhausted = attempts >= MAX_ATTEMPTS;
        sqlx::query(
            r#"
            UPDATE delivery_proof_records
            SET verification_attempts = $2,
                status = CASE WHEN $3 THEN 'failed' ELSE status END,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(proof.id)
        .bind(attempts)
        .bind(exhausted)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        return Err(if exhausted {
            CoreError::domain(ErrorCode::PinMaxAttempts, "attempt limit reached; PIN locked")
        } else {
            CoreError::domain(ErrorCode::PinInvalid, "PIN does not match")
        });
    }

    sqlx::query(
        r#"
        UPDATE delivery_proof_records
        SET verification_attempts = $2, status = 'verified', verified_at = now(), updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(proof.id)
    .bind(attempts)
    .execute(&mut *tx)
    .await?;

    outbox::enqueue(
        &mut tx,
        NewOutboxEvent {
            event_type: event_type::DELIVERY_PIN_VERIFIED,
            aggregate_type: "order",
            aggregate_id: order_id,
            payload: serde_json::json!({ "orderId": order_id }),
        },
    )
    .await?;

    tx.commit().await?;
    fetch(store, order_id)
        .await?
        .ok_or_else(|| CoreError::domain(ErrorCode::Internal, "pin record vanished mid-verify"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_are_six_digits() {
        for _ in 0..64 {
            let pin = generate_pin();
            assert_eq!(pin.len(), 6);
            assert!(pin.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn digest_comparison_accepts_match_only() {
        let digest = pin_digest("483920");
        assert!(digests_match(&digest, &pin_digest("483920")));
        assert!(!digests_match(&digest, &pin_digest("483921")));
        assert!(!digests_match(&digest, "short"));
    }

    #[test]
    fn digest_is_not_the_pin() {
        let digest = pin_digest("123456");
        assert_eq!(digest.len(), 64);
        assert!(!digest.contains("123456"));
    }
}
