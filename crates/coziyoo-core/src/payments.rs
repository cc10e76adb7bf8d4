//! Payment orchestration.
//!
//! The return endpoint is informational only; the webhook is the single
//! authority for marking an order paid. Webhook calls are verified with a
//! timing-safe HMAC-SHA256 check over the raw body, and the raw payload is
//! persisted on every call, including signature failures.

use crate::db::{Store, Tx};
use crate::error::{CoreError, ErrorCode};
use crate::orders::{self, Driver};
use crate::outbox::{self, event_type, NewOutboxEvent};
use crate::types::{OrderStatus, PaymentAttemptStatus, Realm};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const PROVIDER_NAME: &str = "coziyoo_pay";

#[derive(Debug, Clone, Serialize)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider: String,
    pub provider_session_id: String,
    pub provider_reference_id: Option<String>,
    pub status: PaymentAttemptStatus,
    pub signature_valid: Option<bool>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub order_id: Uuid,
    pub payment_attempt_id: Uuid,
    pub provider_session_id: String,
    pub checkout_url: String,
}

/// Webhook body contract shared with the provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookBody {
    pub session_id: String,
    pub provider_reference_id: String,
    pub result: WebhookResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookResult {
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WebhookAck {
    pub accepted: bool,
    pub paid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotent: Option<bool>,
}

fn new_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("ps_{}", hex::encode(bytes))
}

/// Timing-safe signature check: `hex(hmac_sha256(secret, raw_body))`.
pub fn verify_signature(secret: &str, raw_body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}

/// Produce a signature the way the provider does. Test seam and contract
/// documentation in one place.
pub fn sign_body(secret: &str, raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

fn attempt_from_row(row: &sqlx::postgres::PgRow) -> Result<PaymentAttempt, CoreError> {
    let status: String = row.try_get("status")?;
    Ok(PaymentAttempt {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        provider: row.try_get("provider")?,
        provider_session_id: row.try_get("provider_session_id")?,
        provider_reference_id: row.try_get("provider_reference_id")?,
        status: PaymentAttemptStatus::parse(&status)?,
        signature_valid: row.try_get("signature_valid")?,
        created_at: row.try_get("created_at")?,
    })
}

const ATTEMPT_COLUMNS: &str = "id, order_id, provider, provider_session_id, provider_reference_id, \
     status, signature_valid, created_at";

/// Start (or resume) the checkout session for an order.
///
/// Requires order status in {seller_approved, awaiting_payment}; a
/// seller_approved order moves to awaiting_payment in the same transaction.
/// An existing initiated attempt is reused so the flow is idempotent even
/// without the idempotency header.
pub async fn start_payment(
    store: &Store,
    buyer_id: Uuid,
    order_id: Uuid,
    provider_base_url: &str,
) -> Result<CheckoutSession, CoreError> {
    let mut tx = store.begin().await?;
    let order = orders::lock_order(&mut tx, order_id).await?;
    if order.buyer_id != buyer_id {
        return Err(CoreError::domain(
            ErrorCode::ForbiddenOrderScope,
            "order belongs to another buyer",
        ));
    }
    if !matches!(
        order.status,
        OrderStatus::SellerApproved | OrderStatus::AwaitingPayment
    ) {
        return Err(CoreError::domain(
            ErrorCode::OrderInvalidState,
            format!("payment cannot start from {}", order.status.as_str()),
        ));
    }

    if order.status == OrderStatus::SellerApproved {
        orders::apply_status(&mut tx, order_id, OrderStatus::AwaitingPayment).await?;
        orders::record_transition(
            &mut tx,
            order_id,
            order.status,
            OrderStatus::AwaitingPayment,
            Some(Realm::App),
            Some(buyer_id),
            serde_json::json!({ "trigger": "payment_start" }),
        )
        .await?;
    }

    let existing = sqlx::query(&format!(
        "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts
         WHERE order_id = $1 AND status = 'initiated'
         ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(order_id)
    .fetch_optional(&mut *tx)
    .await?;

    let attempt = match existing {
        Some(row) => attempt_from_row(&row)?,
        None => {
            let id = Uuid::new_v4();
            let session_id = new_session_id();
            sqlx::query(
                r#"
                INSERT INTO payment_attempts (
                    id, order_id, provider, provider_session_id, status, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, 'initiated', now(), now())
                "#,
            )
            .bind(id)
            .bind(order_id)
            .bind(PROVIDER_NAME)
            .bind(&session_id)
            .execute(&mut *tx)
            .await?;

            outbox::enqueue(
                &mut tx,
                NewOutboxEvent {
                    event_type: event_type::PAYMENT_SESSION_STARTED,
                    aggregate_type: "payment_attempt",
                    aggregate_id: id,
                    payload: serde_json::json!({
                        "orderId": order_id,
                        "sessionId": session_id,
                    }),
                },
            )
            .await?;

            PaymentAttempt {
                id,
                order_id,
                provider: PROVIDER_NAME.into(),
                provider_session_id: session_id,
                provider_reference_id: None,
                status: PaymentAttemptStatus::Initiated,
                signature_valid: None,
                created_at: Utc::now(),
            }
        }
    };

    tx.commit().await?;
    let checkout_url = format!(
        "{}/checkout/{}",
        provider_base_url.trim_end_matches('/'),
        attempt.provider_session_id
    );
    Ok(CheckoutSession {
        order_id,
        payment_attempt_id: attempt.id,
        provider_session_id: attempt.provider_session_id,
        checkout_url,
    })
}

async fn append_callback(
    tx: &mut Tx<'_>,
    attempt_id: Uuid,
    payload: &serde_json::Value,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        UPDATE payment_attempts
        SET callback_payload = callback_payload || jsonb_build_array($2::jsonb),
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(attempt_id)
    .bind(payload)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn lock_attempt_by_session(
    tx: &mut Tx<'_>,
    session_id: &str,
) -> Result<Option<PaymentAttempt>, CoreError> {
    let row = sqlx::query(&format!(
        "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE provider_session_id = $1 FOR UPDATE"
    ))
    .bind(session_id)
    .fetch_optional(&mut **tx)
    .await?;
    row.as_ref().map(attempt_from_row).transpose()
}

/// Record the browser return redirect. Never marks the order paid.
pub async fn record_return(
    store: &Store,
    session_id: &str,
    query: &serde_json::Value,
) -> Result<(), CoreError> {
    let mut tx = store.begin().await?;
    let attempt = lock_attempt_by_session(&mut tx, session_id)
        .await?
        .ok_or_else(|| {
            CoreError::not_found(ErrorCode::PaymentAttemptNotFound, "unknown payment session")
        })?;

    append_callback(
        &mut tx,
        attempt.id,
        &serde_json::json!({ "kind": "return", "query": query, "at": Utc::now() }),
    )
    .await?;

    // Only annotate the attempt while it is still undecided.
    if attempt.status == PaymentAttemptStatus::Initiated {
        let returned = match query.get("result").and_then(|v| v.as_str()) {
            Some("failed") => PaymentAttemptStatus::ReturnedFailed,
            _ => PaymentAttemptStatus::ReturnedSuccess,
        };
        sqlx::query("UPDATE payment_attempts SET status = $2, updated_at = now() WHERE id = $1")
            .bind(attempt.id)
            .bind(returned.as_str())
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Authoritative webhook confirmation. See module docs for the contract.
pub async fn handle_webhook(
    store: &Store,
    webhook_secret: &str,
    raw_body: &[u8],
    signature_hex: &str,
) -> Result<WebhookAck, CoreError> {
    let signature_ok = verify_signature(webhook_secret, raw_body, signature_hex);
    let body: Option<WebhookBody> = serde_json::from_slice(raw_body).ok();

    if !signature_ok {
        // Persist the evidence when the session is identifiable, then refuse.
        if let Some(body) = &body {
            let mut tx = store.begin().await?;
            if let Some(attempt) = lock_attempt_by_session(&mut tx, &body.session_id).await? {
                append_callback(
                    &mut tx,
                    attempt.id,
                    &serde_json::json!({
                        "kind": "webhook_rejected",
                        "reason": "signature_invalid",
                        "at": Utc::now(),
                    }),
                )
                .await?;
                if attempt.status != PaymentAttemptStatus::Confirmed {
                    sqlx::query(
                        "UPDATE payment_attempts
                         SET signature_valid = FALSE, status = 'confirmation_failed', updated_at = now()
                         WHERE id = $1",
                    )
                    .bind(attempt.id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            tx.commit().await?;
        }
        return Err(CoreError::domain(
            ErrorCode::WebhookSignatureInvalid,
            "webhook signature verification failed",
        ));
    }

    let body = body.ok_or_else(|| {
        CoreError::validation("webhook body is not valid JSON", None)
    })?;

    let mut tx = store.begin().await?;
    let attempt = lock_attempt_by_session(&mut tx, &body.session_id)
        .await?
        .ok_or_else(|| {
            CoreError::not_found(ErrorCode::PaymentAttemptNotFound, "unknown payment session")
        })?;

    append_callback(
        &mut tx,
        attempt.id,
        &serde_json::json!({
            "kind": "webhook",
            "result": match body.result {
                WebhookResult::Confirmed => "confirmed",
                WebhookResult::Failed => "failed",
            },
            "providerReferenceId": body.provider_reference_id,
            "at": Utc::now(),
        }),
    )
    .await?;

    // Replay of an already confirmed session is acknowledged, not re-applied.
    if attempt.status == PaymentAttemptStatus::Confirmed {
        tx.commit().await?;
        return Ok(WebhookAck {
            accepted: true,
            paid: true,
            idempotent: Some(true),
        });
    }

    if body.result == WebhookResult::Failed {
        sqlx::query(
            r#"
            UPDATE payment_attempts
            SET status = 'confirmation_failed', signature_valid = TRUE,
                provider_reference_id = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(attempt.id)
        .bind(&body.provider_reference_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        return Ok(WebhookAck {
            accepted: true,
            paid: false,
            idempotent: None,
        });
    }

    let order = orders::lock_order(&mut tx, attempt.order_id).await?;
    if order.status != OrderStatus::AwaitingPayment {
        sqlx::query(
            "UPDATE payment_attempts
             SET status = 'confirmation_failed', signature_valid = TRUE, updated_at = now()
             WHERE id = $1",
        )
        .bind(attempt.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        return Err(CoreError::domain(
            ErrorCode::PaymentSessionConflict,
            "order is no longer awaiting payment",
        ));
    }

    sqlx::query(
        r#"
        UPDATE payment_attempts
        SET status = 'confirmed', signature_valid = TRUE,
            provider_reference_id = $2, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(attempt.id)
    .bind(&body.provider_reference_id)
    .execute(&mut *tx)
    .await?;

    debug_assert!(orders::may_drive(
        Driver::System,
        OrderStatus::AwaitingPayment,
        OrderStatus::Paid
    ));
    sqlx::query(
        "UPDATE orders SET status = 'paid', payment_completed = TRUE, updated_at = now() WHERE id = $1",
    )
    .bind(order.id)
    .execute(&mut *tx)
    .await?;
    orders::record_transition(
        &mut tx,
        order.id,
        OrderStatus::AwaitingPayment,
        OrderStatus::Paid,
        None,
        None,
        serde_json::json!({ "providerReferenceId": body.provider_reference_id }),
    )
    .await?;

    outbox::enqueue(
        &mut tx,
        NewOutboxEvent {
            event_type: event_type::PAYMENT_CONFIRMED,
            aggregate_type: "order",
            aggregate_id: order.id,
            payload: serde_json::json!({
                "orderId": order.id,
                "sessionId": body.session_id,
                "providerReferenceId": body.provider_reference_id,
            }),
        },
    )
    .await?;

    tx.commit().await?;
    info!(order_id = %order.id, "payment confirmed via webhook");
    Ok(WebhookAck {
        accepted: true,
        paid: true,
        idempotent: None,
    })
}

/// Latest attempt for an order, for the status endpoint.
pub async fn payment_status(
    store: &Store,
    order_id: Uuid,
) -> Result<Option<PaymentAttempt>, CoreError> {
    let row = sqlx::query(&format!(
        "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts
         WHERE order_id = $1 ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(order_id)
    .fetch_optional(store.pool())
    .await?;
    row.as_ref().map(attempt_from_row).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_0123456789";

    #[test]
    fn signature_roundtrip() {
        let body = br#"{"sessionId":"ps_ab","providerReferenceId":"r1","result":"confirmed"}"#;
        let signature = sign_body(SECRET, body);
        assert!(verify_signature(SECRET, body, &signature));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let body = br#"{"sessionId":"ps_ab","result":"confirmed"}"#;
        let signature = sign_body(SECRET, body);
        assert!(!verify_signature(SECRET, br#"{"sessionId":"ps_ab","result":"failed"}"#, &signature));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let body = b"payload";
        let signature = sign_body(SECRET, body);
        assert!(!verify_signature("another-secret-value", body, &signature));
    }

    #[test]
    fn malformed_signature_header_fails_closed() {
        assert!(!verify_signature(SECRET, b"payload", "not-hex!"));
        assert!(!verify_signature(SECRET, b"payload", ""));
        assert!(!verify_signature(SECRET, b"payload", "00"));
    }

    #[test]
    fn session_ids_are_prefixed_and_unique() {
        let a = new_session_id();
        let b = new_session_id();
        assert!(a.starts_with("ps_"));
        assert_eq!(a.len(), 35);
        assert_ne!(a, b);
    }

    #[test]
    fn replay_ack_carries_the_idempotent_flag() {
        let replay = WebhookAck {
            accepted: true,
            paid: true,
            idempotent: Some(true),
        };
        let value = serde_json::to_value(&replay).unwrap();
        assert_eq!(value["idempotent"], true);

        let first = WebhookAck {
            accepted: true,
            paid: true,
            idempotent: None,
        };
        let value = serde_json::to_value(&first).unwrap();
        assert!(value.get("idempotent").is_none());
    }

    #[test]
    fn webhook_body_parses_provider_contract() {
        let body: WebhookBody = serde_json::from_str(
            r#"{"sessionId":"ps_1","providerReferenceId":"R-9","result":"confirmed"}"#,
        )
        .unwrap();
        assert_eq!(body.session_id, "ps_1");
        assert_eq!(body.result, WebhookResult::Confirmed);
    }
}
