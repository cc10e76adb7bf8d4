//! Commission snapshots and per-order finance.
//!
//! Invariant handling:
//! - At most one `commission_settings` row is active (partial unique
//!   index); settings are never mutated after creation.
//! - One immutable `order_finance` row per completed order; later
//!   corrections are append-only `finance_adjustments`.
//! - Commission uses the rate active at completion time; past rows are never
//!   recomputed when the rate changes.

use crate::db::{Store, Tx};
use crate::error::{CoreError, ErrorCode};
use crate::orders::Order;
use crate::types::{Money, Rate};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct CommissionSetting {
    pub id: Uuid,
    pub commission_rate: Rate,
    pub is_active: bool,
    pub effective_from: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderFinance {
    pub id: Uuid,
    pub order_id: Uuid,
    pub seller_id: Uuid,
    pub gross_amount: Money,
    pub commission_rate_snapshot: Rate,
    pub commission_amount: Money,
    pub seller_net_amount: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SellerFinanceSummary {
    pub seller_id: Uuid,
    pub gross_total: Money,
    pub commission_total: Money,
    pub net_total: Money,
    pub adjustment_total: Money,
    pub payable_total: Money,
    pub order_count: i64,
}

/// `round(gross * rate, 2)` with midpoint-nearest-even rounding.
pub fn commission_for(gross: Money, rate: Rate) -> Money {
    (gross * rate).round_dp(2)
}

/// Replace the active commission setting. The old row is deactivated, never
/// rewritten; the new row takes over from `effective_from`.
pub async fn create_commission_setting(
    tx: &mut Tx<'_>,
    rate: Rate,
    effective_from: DateTime<Utc>,
    created_by: Uuid,
) -> Result<CommissionSetting, CoreError> {
    if rate < Decimal::ZERO || rate >= Decimal::ONE {
        return Err(CoreError::domain(
            ErrorCode::CommissionRateInvalid,
            "commission rate must be within [0, 1)",
        ));
    }

    sqlx::query("UPDATE commission_settings SET is_active = FALSE WHERE is_active")
        .execute(&mut **tx)
        .await?;

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO commission_settings (id, commission_rate, is_active, effective_from, created_by, created_at)
        VALUES ($1, $2, TRUE, $3, $4, now())
        "#,
    )
    .bind(id)
    .bind(rate)
    .bind(effective_from)
    .bind(created_by)
    .execute(&mut **tx)
    .await?;

    Ok(CommissionSetting {
        id,
        commission_rate: rate,
        is_active: true,
        effective_from,
        created_at: Utc::now(),
    })
}

pub async fn active_rate(tx: &mut Tx<'_>) -> Result<Rate, CoreError> {
    let row = sqlx::query("SELECT commission_rate FROM commission_settings WHERE is_active")
        .fetch_optional(&mut **tx)
        .await?;
    match row {
        Some(row) => Ok(row.try_get("commission_rate")?),
        // No configured setting means the platform takes nothing.
        None => Ok(Decimal::ZERO),
    }
}

/// Write the immutable finance row for a completing order. Idempotent per
/// order: a second call inside a replayed completion is a no-op.
pub async fn finalize_order(tx: &mut Tx<'_>, order: &Order) -> Result<(), CoreError> {
    let rate = active_rate(tx).await?;
    let gross = order.total_price;
    let commission = commission_for(gross, rate);
    let net = gross - commission;

    sqlx::query(
        r#"
        INSERT INTO order_finance (
            id, order_id, seller_id, gross_amount, commission_rate_snapshot,
            commission_amount, seller_net_amount, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, now())
        ON CONFLICT (order_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(order.id)
    .bind(order.seller_id)
    .bind(gross)
    .bind(rate)
    .bind(commission)
    .bind(net)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn order_finance(store: &Store, order_id: Uuid) -> Result<Option<OrderFinance>, CoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, order_id, seller_id, gross_amount, commission_rate_snapshot,
               commission_amount, seller_net_amount, created_at
        FROM order_finance WHERE order_id = $1
        "#,
    )
    .bind(order_id)
    .fetch_optional(store.pool())
    .await?;

    row.map(|row| {
        Ok::<_, CoreError>(OrderFinance {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            seller_id: row.try_get("seller_id")?,
            gross_amount: row.try_get("gross_amount")?,
            commission_rate_snapshot: row.try_get("commission_rate_snapshot")?,
            commission_amount: row.try_get("commission_amount")?,
            seller_net_amount: row.try_get("seller_net_amount")?,
            created_at: row.try_get("created_at")?,
        })
    })
    .transpose()
}

/// Append a signed delta against a seller balance (refunds, dispute
/// outcomes, manual corrections).
#[allow(clippy::too_many_arguments)]
pub async fn record_adjustment(
    tx: &mut Tx<'_>,
    seller_id: Uuid,
    order_id: Option<Uuid>,
    dispute_case_id: Option<Uuid>,
    amount: Money,
    reason_code: &str,
    note: Option<&str>,
    created_by: Option<(crate::types::Realm, Uuid)>,
) -> Result<Uuid, CoreError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO finance_adjustments (
            id, seller_id, order_id, dispute_case_id, amount, reason_code,
            note, created_by_realm, created_by, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
        "#,
    )
    .bind(id)
    .bind(seller_id)
    .bind(order_id)
    .bind(dispute_case_id)
    .bind(amount)
    .bind(reason_code)
    .bind(note)
    .bind(created_by.map(|(realm, _)| realm.as_str()))
    .bind(created_by.map(|(_, id)| id))
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

/// Seller totals: `sum(gross) / sum(commission) / (sum(net) + sum(adjustments))`.
pub async fn seller_summary(store: &Store, seller_id: Uuid) -> Result<SellerFinanceSummary, CoreError> {
    let finance = sqlx::query(
        r#"
        SELECT COALESCE(SUM(gross_amount), 0) AS gross_total,
               COALESCE(SUM(commission_amount), 0) AS commission_total,
               COALESCE(SUM(seller_net_amount), 0) AS net_total,
               COUNT(*) AS order_count
        FROM order_finance WHERE seller_id = $1
        "#,
    )
    .bind(seller_id)
    .fetch_one(store.pool())
    .await?;

    let adjustments = sqlx::query(
        "SELECT COALESCE(SUM(amount), 0) AS adjustment_total FROM finance_adjustments WHERE seller_id = $1",
    )
    .bind(seller_id)
    .fetch_one(store.pool())
    .await?;

    let gross_total: Money = finance.try_get("gross_total")?;
    let commission_total: Money = finance.try_get("commission_total")?;
    let net_total: Money = finance.try_get("net_total")?;
    let order_count: i64 = finance.try_get("order_count")?;
    let adjustment_total: Money = adjustments.try_get("adjustment_total")?;

    Ok(SellerFinanceSummary {
        seller_id,
        gross_total,
        commission_total,
        net_total,
        adjustment_total,
        payable_total: net_total + adjustment_total,
        order_count,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub id: Uuid,
    pub seller_id: Option<Uuid>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub status: String,
    pub file_url: Option<String>,
    pub checksum: Option<String>,
}

/// Insert a ready reconciliation report row. The report body itself is
/// produced by an adapter-defined job; this records the pointer and a
/// checksum over the canonical summary.
pub async fn create_reconciliation_report(
    store: &Store,
    seller_id: Option<Uuid>,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    file_url: &str,
) -> Result<ReconciliationReport, CoreError> {
    let summary = match seller_id {
        Some(seller_id) => serde_json::to_value(seller_summary(store, seller_id).await?)?,
        None => serde_json::json!({ "scope": "platform" }),
    };
    let canonical = serde_json::to_vec(&summary)?;
    let checksum = hex::encode(Sha256::digest(&canonical));

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO finance_reconciliation_reports (
            id, seller_id, period_start, period_end, status, file_url, checksum, created_at
        )
        VALUES ($1, $2, $3, $4, 'ready', $5, $6, now())
        "#,
    )
    .bind(id)
    .bind(seller_id)
    .bind(period_start)
    .bind(period_end)
    .bind(file_url)
    .bind(&checksum)
    .execute(store.pool())
    .await?;

    Ok(ReconciliationReport {
        id,
        seller_id,
        period_start,
        period_end,
        status: "ready".into(),
        file_url: Some(file_url.to_string()),
        checksum: Some(checksum),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn commission_matches_happy_path_scenario() {
        // 189.90 at 10% -> 18.99 commission, 170.91 net.
        let gross = dec!(189.90);
        let commission = commission_for(gross, dec!(0.1000));
        assert_eq!(commission, dec!(18.99));
        assert_eq!(gross - commission, dec!(170.91));
    }

    #[test]
    fn commission_uses_bankers_rounding() {
        // 0.125 midpoints round to the even cent.
        assert_eq!(commission_for(dec!(1.25), dec!(0.1000)), dec!(0.12));
        assert_eq!(commission_for(dec!(3.75), dec!(0.1000)), dec!(0.38));
    }

    #[test]
    fn commission_and_net_always_sum_to_gross() {
        let cases = [
            (dec!(200.00), dec!(0.1000)),
            (dec!(49.99), dec!(0.1250)),
            (dec!(0.01), dec!(0.3333)),
            (dec!(999999.99), dec!(0.0001)),
        ];
        for (gross, rate) in cases {
            let commission = commission_for(gross, rate);
            let net = gross - commission;
            assert_eq!(commission + net, gross, "gross={gross} rate={rate}");
            assert_eq!(commission, commission.round_dp(2));
        }
    }

    #[test]
    fn zero_rate_means_zero_commission() {
        assert_eq!(commission_for(dec!(100.00), Decimal::ZERO), Decimal::ZERO);
    }
}
