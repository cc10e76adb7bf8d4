//! Refund and chargeback cases.
//!
//! A buyer refund request opens a case with platform liability and posts a
//! `-total_price` adjustment immediately. Admin resolution is judged from
//! the platform's side: `won` keeps the money (refund rejected), `lost`
//! applies the liability split to `-total_price` and records the signed
//! adjustment against the seller. The resolution-time adjustment is
//! authoritative even when the request-time adjustment already exists.

use crate::audit;
use crate::db::Store;
use crate::error::{CoreError, ErrorCode};
use crate::finance;
use crate::orders::{self, Driver};
use crate::outbox::{self, event_type, NewOutboxEvent};
use crate::types::{
    DisputeStatus, DisputeType, LiabilityParty, Money, OrderStatus, Realm,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

/// Order states a refund may be requested from.
const REFUNDABLE: &[OrderStatus] = &[
    OrderStatus::Paid,
    OrderStatus::Preparing,
    OrderStatus::Ready,
    OrderStatus::InDelivery,
    OrderStatus::Delivered,
    OrderStatus::Completed,
];

#[derive(Debug, Clone, Serialize)]
pub struct DisputeCase {
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_attempt_id: Option<Uuid>,
    pub case_type: DisputeType,
    pub status: DisputeStatus,
    pub reason_code: String,
    pub liability_party: LiabilityParty,
    pub liability_ratio: Option<Decimal>,
    pub evidence: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

fn case_from_row(row: &sqlx::postgres::PgRow) -> Result<DisputeCase, CoreError> {
    let case_type: String = row.try_get("case_type")?;
    let status: String = row.try_get("status")?;
    let liability: String = row.try_get("liability_party")?;
    Ok(DisputeCase {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        payment_attempt_id: row.try_get("payment_attempt_id")?,
        case_type: DisputeType::parse(&case_type)?,
        status: DisputeStatus::parse(&status)?,
        reason_code: row.try_get("reason_code")?,
        liability_party: LiabilityParty::parse(&liability)?,
        liability_ratio: row.try_get("liability_ratio")?,
        evidence: row.try_get("evidence")?,
        created_at: row.try_get("created_at")?,
    })
}

const CASE_COLUMNS: &str = "id, order_id, payment_attempt_id, case_type, status, reason_code, \
     liability_party, liability_ratio, evidence, created_at";

/// The signed seller adjustment implied by a `lost` resolution.
pub fn resolution_adjustment(
    total_price: Money,
    party: LiabilityParty,
    ratio_seller: Option<Decimal>,
) -> Money {
    let factor = match party {
        LiabilityParty::Seller => Decimal::ONE,
        LiabilityParty::Platform | LiabilityParty::Provider => Decimal::ZERO,
        LiabilityParty::Shared => ratio_seller
            .unwrap_or(Decimal::ZERO)
            .clamp(Decimal::ZERO, Decimal::ONE),
    };
    (-total_price * factor).round_dp(2)
}

/// Buyer refund request. Opens the case, posts the request-time adjustment,
/// and moves the order to `refund_pending` where the state machine allows.
pub async fn request_refund(
    store: &Store,
    buyer_id: Uuid,
    order_id: Uuid,
    reason_code: &str,
    note: Option<&str>,
) -> Result<DisputeCase, CoreError> {
    let mut tx = store.begin().await?;
    let order = orders::lock_order(&mut tx, order_id).await?;
    if order.buyer_id != buyer_id {
        return Err(CoreError::domain(
            ErrorCode::ForbiddenOrderScope,
            "order belongs to another buyer",
        ));
    }
    if !REFUNDABLE.contains(&order.status) {
        return Err(CoreError::domain(
            ErrorCode::OrderInvalidState,
            format!("refund cannot be requested from {}", order.status.as_str()),
        ));
    }

    let attempt = sqlx::query(
        "SELECT id FROM payment_attempts WHERE order_id = $1 AND status = 'confirmed' LIMIT 1",
    )
    .bind(order_id)
    .fetch_optional(&mut *tx)
    .await?;
    let payment_attempt_id: Option<Uuid> =
        attempt.map(|row| row.try_get("id")).transpose()?;

    let case_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO payment_dispute_cases (
            id, order_id, payment_attempt_id, case_type, status, reason_code,
            liability_party, evidence, opened_by, created_at, updated_at
        )
        VALUES ($1, $2, $3, 'refund', 'opened', $4, 'platform', $5, $6, now(), now())
        "#,
    )
    .bind(case_id)
    .bind(order_id)
    .bind(payment_attempt_id)
    .bind(reason_code)
    .bind(serde_json::json!([{ "kind": "buyer_note", "note": note }]))
    .bind(buyer_id)
    .execute(&mut *tx)
    .await?;

    finance::record_adjustment(
        &mut tx,
        order.seller_id,
        Some(order_id),
        Some(case_id),
        -order.total_price,
        "refund_request",
        note,
        Some((Realm::App, buyer_id)),
    )
    .await?;

    if orders::may_drive(Driver::Admin, order.status, OrderStatus::RefundPending) {
        orders::apply_status(&mut tx, order_id, OrderStatus::RefundPending).await?;
        orders::record_transition(
            &mut tx,
            order_id,
            order.status,
            OrderStatus::RefundPending,
            Some(Realm::App),
            Some(buyer_id),
            serde_json::json!({ "disputeCaseId": case_id }),
        )
        .await?;
    }

    outbox::enqueue(
        &mut tx,
        NewOutboxEvent {
            event_type: event_type::DISPUTE_OPENED,
            aggregate_type: "payment_dispute_case",
            aggregate_id: case_id,
            payload: serde_json::json!({
                "caseId": case_id,
                "orderId": order_id,
                "caseType": "refund",
                "reasonCode": reason_code,
            }),
        },
    )
    .await?;

    tx.commit().await?;
    fetch_case(store, case_id).await
}

pub async fn fetch_case(store: &Store, case_id: Uuid) -> Result<DisputeCase, CoreError> {
    let query = format!("SELECT {CASE_COLUMNS} FROM payment_dispute_cases WHERE id = $1");
    let row = sqlx::query(&query)
        .bind(case_id)
        .fetch_optional(store.pool())
        .await?
        .ok_or_else(|| CoreError::not_found(ErrorCode::DisputeNotFound, "dispute case not found"))?;
    case_from_row(&row)
}

pub async fn cases_for_order(store: &Store, order_id: Uuid) -> Result<Vec<DisputeCase>, CoreError> {
    let query = format!(
        "SELECT {CASE_COLUMNS} FROM payment_dispute_cases WHERE order_id = $1 ORDER BY created_at DESC"
    );
    let rows = sqlx::query(&query)
        .bind(order_id)
        .fetch_all(store.pool())
        .await?;
    rows.iter().map(case_from_row).collect()
}

pub async fn begin_review(store: &Store, admin_id: Uuid, case_id: Uuid) -> Result<DisputeCase, CoreError> {
    let mut tx = store.begin().await?;
    let query = format!("SELECT {CASE_COLUMNS} FROM payment_dispute_cases WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&query)
        .bind(case_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CoreError::not_found(ErrorCode::DisputeNotFound, "dispute case not found"))?;
    let case = case_from_row(&row)?;
    if case.status != DisputeStatus::Opened {
        return Err(CoreError::domain(
            ErrorCode::DisputeInvalidState,
            format!("cannot start review from {}", case.status.as_str()),
        ));
    }

    sqlx::query("UPDATE payment_dispute_cases SET status = 'under_review', updated_at = now() WHERE id = $1")
        .bind(case_id)
        .execute(&mut *tx)
        .await?;
    audit::record(
        &mut tx,
        admin_id,
        "dispute.begin_review",
        "payment_dispute_case",
        Some(case_id),
        Some(serde_json::json!({ "status": "opened" })),
        Some(serde_json::json!({ "status": "under_review" })),
        None,
    )
    .await?;
    tx.commit().await?;
    fetch_case(store, case_id).await
}

/// Admin resolution: won / lost / closed.
pub async fn resolve(
    store: &Store,
    admin_id: Uuid,
    case_id: Uuid,
    outcome: DisputeStatus,
    liability_party: LiabilityParty,
    ratio_seller: Option<Decimal>,
    note: Option<&str>,
) -> Result<DisputeCase, CoreError> {
    if !matches!(
        outcome,
        DisputeStatus::Won | DisputeStatus::Lost | DisputeStatus::Closed
    ) {
        return Err(CoreError::domain(
            ErrorCode::DisputeInvalidState,
            "resolution must be won, lost, or closed",
        ));
    }

    let mut tx = store.begin().await?;
    let query = format!("SELECT {CASE_COLUMNS} FROM payment_dispute_cases WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&query)
        .bind(case_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CoreError::not_found(ErrorCode::DisputeNotFound, "dispute case not found"))?;
    let case = case_from_row(&row)?;
    if !matches!(case.status, DisputeStatus::Opened | DisputeStatus::UnderReview) {
        return Err(CoreError::domain(
            ErrorCode::DisputeInvalidState,
            format!("case is already {}", case.status.as_str()),
        ));
    }

    let order = orders::lock_order(&mut tx, case.order_id).await?;
    let ratio = ratio_seller.map(|r| r.clamp(Decimal::ZERO, Decimal::ONE));

    sqlx::query(
        r#"
        UPDATE payment_dispute_cases
        SET status = $2, liability_party = $3, liability_ratio = $4,
            resolved_by = $5, resolved_at = now(), updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(case_id)
    .bind(outcome.as_str())
    .bind(liability_party.as_str())
    .bind(ratio)
    .bind(admin_id)
    .execute(&mut *tx)
    .await?;

    if outcome == DisputeStatus::Lost {
        let amount = resolution_adjustment(order.total_price, liability_party, ratio);
        if amount != Decimal::ZERO {
            finance::record_adjustment(
                &mut tx,
                order.seller_id,
                Some(order.id),
                Some(case_id),
                amount,
                "dispute_lost",
                note,
                Some((Realm::Admin, admin_id)),
            )
            .await?;
        }
    }

    // Settle the order when it is parked in refund_pending.
    if order.status == OrderStatus::RefundPending {
        let to = match outcome {
            DisputeStatus::Lost => Some(OrderStatus::Refunded),
            DisputeStatus::Won => Some(OrderStatus::RefundRejected),
            _ => None,
        };
        if let Some(to) = to {
            orders::apply_status(&mut tx, order.id, to).await?;
            orders::record_transition(
                &mut tx,
                order.id,
                order.status,
                to,
                Some(Realm::Admin),
                Some(admin_id),
                serde_json::json!({ "disputeCaseId": case_id }),
            )
            .await?;
        }
    }

    audit::record(
        &mut tx,
        admin_id,
        "dispute.resolve",
        "payment_dispute_case",
        Some(case_id),
        Some(serde_json::json!({ "status": case.status.as_str() })),
        Some(serde_json::json!({
            "status": outcome.as_str(),
            "liabilityParty": liability_party.as_str(),
            "liabilityRatio": ratio,
        })),
        note,
    )
    .await?;

    outbox::enqueue(
        &mut tx,
        NewOutboxEvent {
            event_type: event_type::DISPUTE_RESOLVED,
            aggregate_type: "payment_dispute_case",
            aggregate_id: case_id,
            payload: serde_json::json!({
                "caseId": case_id,
                "orderId": order.id,
                "outcome": outcome.as_str(),
            }),
        },
    )
    .await?;

    tx.commit().await?;
    fetch_case(store, case_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn seller_liability_charges_full_total() {
        let amount = resolution_adjustment(dec!(200.00), LiabilityParty::Seller, None);
        assert_eq!(amount, dec!(-200.00));
    }

    #[test]
    fn platform_and_provider_liability_charge_nothing() {
        assert_eq!(
            resolution_adjustment(dec!(200.00), LiabilityParty::Platform, None),
            Decimal::ZERO,
        );
        assert_eq!(
            resolution_adjustment(dec!(200.00), LiabilityParty::Provider, Some(dec!(1))),
            Decimal::ZERO,
        );
    }

    #[test]
    fn shared_liability_clamps_ratio() {
        assert_eq!(
            resolution_adjustment(dec!(100.00), LiabilityParty::Shared, Some(dec!(0.25))),
            dec!(-25.00),
        );
        assert_eq!(
            resolution_adjustment(dec!(100.00), LiabilityParty::Shared, Some(dec!(1.7))),
            dec!(-100.00),
        );
        assert_eq!(
            resolution_adjustment(dec!(100.00), LiabilityParty::Shared, Some(dec!(-0.4))),
            dec!(0.00),
        );
        assert_eq!(
            resolution_adjustment(dec!(100.00), LiabilityParty::Shared, None),
            dec!(0.00),
        );
    }

    #[test]
    fn adjustments_round_to_cents() {
        assert_eq!(
            resolution_adjustment(dec!(99.99), LiabilityParty::Shared, Some(dec!(0.3333))),
            dec!(-33.33),
        );
    }
}
