//! Production lot lifecycle and the FEFO stock engine.
//!
//! Invariant handling:
//! - `0 <= quantity_available <= quantity_produced` is a table CHECK; the
//!   engine never writes a value outside that range.
//! - Recalled and discarded lots never allocate.
//! - `foods.current_stock` is recomputed inside every transaction that
//!   mutates lot quantities, so the cache is exact at commit.
//!
//! Allocation orders candidate lots by
//! `COALESCE(use_by, best_before, produced_at) ASC, created_at ASC`:
//! first-expiry-first-out with a deterministic tie-break on creation order.

use crate::db::{Store, Tx};
use crate::error::{unique_violation, CoreError, ErrorCode};
use crate::outbox::{self, event_type, NewOutboxEvent};
use crate::types::LotStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ProductionLot {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub food_id: Uuid,
    pub lot_number: String,
    pub produced_at: DateTime<Utc>,
    pub use_by: Option<DateTime<Utc>>,
    pub best_before: Option<DateTime<Utc>>,
    pub quantity_produced: i32,
    pub quantity_available: i32,
    pub status: LotStatus,
    pub recall_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLotRequest {
    pub food_id: Uuid,
    pub lot_number: String,
    pub produced_at: DateTime<Utc>,
    pub use_by: Option<DateTime<Utc>>,
    pub best_before: Option<DateTime<Utc>>,
    pub quantity_produced: i32,
}

fn lot_from_row(row: &sqlx::postgres::PgRow) -> Result<ProductionLot, CoreError> {
    let status: String = row.try_get("status")?;
    Ok(ProductionLot {
        id: row.try_get("id")?,
        seller_id: row.try_get("seller_id")?,
        food_id: row.try_get("food_id")?,
        lot_number: row.try_get("lot_number")?,
        produced_at: row.try_get("produced_at")?,
        use_by: row.try_get("use_by")?,
        best_before: row.try_get("best_before")?,
        quantity_produced: row.try_get("quantity_produced")?,
        quantity_available: row.try_get("quantity_available")?,
        status: LotStatus::parse(&status)?,
        recall_reason: row.try_get("recall_reason")?,
        created_at: row.try_get("created_at")?,
    })
}

const LOT_COLUMNS: &str = "id, seller_id, food_id, lot_number, produced_at, use_by, best_before, \
     quantity_produced, quantity_available, status, recall_reason, created_at";

pub async fn create_lot(
    tx: &mut Tx<'_>,
    seller_id: Uuid,
    req: &CreateLotRequest,
) -> Result<ProductionLot, CoreError> {
    if req.quantity_produced <= 0 {
        return Err(CoreError::domain(
            ErrorCode::LotInvalidQuantity,
            "quantity_produced must be positive",
        ));
    }
    if req.lot_number.trim().is_empty() {
        return Err(CoreError::validation(
            "lot_number is required",
            Some(serde_json::json!({ "fields": ["lotNumber"] })),
        ));
    }

    let owned = sqlx::query("SELECT 1 AS ok FROM foods WHERE id = $1 AND seller_id = $2")
        .bind(req.food_id)
        .bind(seller_id)
        .fetch_optional(&mut **tx)
        .await?;
    if owned.is_none() {
        return Err(CoreError::not_found(
            ErrorCode::FoodNotFound,
            "food not found for this seller",
        ));
    }

    let id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT INTO production_lots (
            id, seller_id, food_id, lot_number, produced_at, use_by, best_before,
            quantity_produced, quantity_available, status, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, 'open', now(), now())
        "#,
    )
    .bind(id)
    .bind(seller_id)
    .bind(req.food_id)
    .bind(req.lot_number.trim())
    .bind(req.produced_at)
    .bind(req.use_by)
    .bind(req.best_before)
    .bind(req.quantity_produced)
    .execute(&mut **tx)
    .await;

    if let Err(err) = inserted {
        return match unique_violation(&err).as_deref() {
            Some("production_lots_lot_number_key") => Err(CoreError::domain(
                ErrorCode::ValidationError,
                "lot_number is already in use",
            )),
            _ => Err(err.into()),
        };
    }

    recompute_stock(tx, req.food_id).await?;
    fetch_lot_in_tx(tx, id).await
}

async fn fetch_lot_in_tx(tx: &mut Tx<'_>, lot_id: Uuid) -> Result<ProductionLot, CoreError> {
    let query = format!("SELECT {LOT_COLUMNS} FROM production_lots WHERE id = $1");
    let row = sqlx::query(&query)
        .bind(lot_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| CoreError::not_found(ErrorCode::LotNotFound, "lot not found"))?;
    lot_from_row(&row)
}

/// Lock a lot row for mutation, enforcing seller ownership.
async fn lock_lot(
    tx: &mut Tx<'_>,
    seller_id: Option<Uuid>,
    lot_id: Uuid,
) -> Result<ProductionLot, CoreError> {
    let query = format!("SELECT {LOT_COLUMNS} FROM production_lots WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&query)
        .bind(lot_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| CoreError::not_found(ErrorCode::LotNotFound, "lot not found"))?;
    let lot = lot_from_row(&row)?;
    if let Some(seller_id) = seller_id {
        if lot.seller_id != seller_id {
            return Err(CoreError::domain(
                ErrorCode::ForbiddenResourceScope,
                "lot belongs to another seller",
            ));
        }
    }
    Ok(lot)
}

/// Set `quantity_available` (absolute), moving status between open and
/// depleted as the quantity crosses zero. Recalled/discarded/locked lots are
/// not adjustable.
pub async fn adjust_lot(
    tx: &mut Tx<'_>,
    seller_id: Uuid,
    lot_id: Uuid,
    quantity_available: i32,
) -> Result<ProductionLot, CoreError> {
    let lot = lock_lot(tx, Some(seller_id), lot_id).await?;
    if !matches!(lot.status, LotStatus::Open | LotStatus::Depleted) {
        return Err(CoreError::domain(
            ErrorCode::LotStatusInvalid,
            format!("a {} lot cannot be adjusted", lot.status.as_str()),
        ));
    }
    if quantity_available < 0 || quantity_available > lot.quantity_produced {
        return Err(CoreError::domain(
            ErrorCode::LotInvalidQuantity,
            "quantity_available must stay within [0, quantity_produced]",
        ));
    }

    let status = if quantity_available == 0 {
        LotStatus::Depleted
    } else {
        LotStatus::Open
    };
    sqlx::query(
        "UPDATE production_lots SET quantity_available = $2, status = $3, updated_at = now() WHERE id = $1",
    )
    .bind(lot_id)
    .bind(quantity_available)
    .bind(status.as_str())
    .execute(&mut **tx)
    .await?;

    recompute_stock(tx, lot.food_id).await?;
    fetch_lot_in_tx(tx, lot_id).await
}

/// Recall a lot: zero it, block future allocations, and emit `lot_recalled`
/// so downstream tooling can trace affected orders.
pub async fn recall_lot(
    tx: &mut Tx<'_>,
    seller_id: Option<Uuid>,
    lot_id: Uuid,
    reason: &str,
) -> Result<ProductionLot, CoreError> {
    let lot = lock_lot(tx, seller_id, lot_id).await?;
    if matches!(lot.status, LotStatus::Recalled | LotStatus::Discarded) {
        return Err(CoreError::domain(
            ErrorCode::LotStatusInvalid,
            format!("lot is already {}", lot.status.as_str()),
        ));
    }

    sqlx::query(
        r#"
        UPDATE production_lots
        SET status = 'recalled', quantity_available = 0, recall_reason = $2, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(lot_id)
    .bind(reason)
    .execute(&mut **tx)
    .await?;

    recompute_stock(tx, lot.food_id).await?;
    outbox::enqueue(
        tx,
        NewOutboxEvent {
            event_type: event_type::LOT_RECALLED,
            aggregate_type: "production_lot",
            aggregate_id: lot_id,
            payload: serde_json::json!({
                "lotId": lot_id,
                "lotNumber": lot.lot_number,
                "foodId": lot.food_id,
                "sellerId": lot.seller_id,
                "reason": reason,
            }),
        },
    )
    .await?;

    fetch_lot_in_tx(tx, lot_id).await
}

pub async fn discard_lot(
    tx: &mut Tx<'_>,
    seller_id: Uuid,
    lot_id: Uuid,
) -> Result<ProductionLot, CoreError> {
    let lot = lock_lot(tx, Some(seller_id), lot_id).await?;
    if matches!(lot.status, LotStatus::Recalled | LotStatus::Discarded) {
        return Err(CoreError::domain(
            ErrorCode::LotStatusInvalid,
            format!("lot is already {}", lot.status.as_str()),
        ));
    }

    sqlx::query(
        "UPDATE production_lots SET status = 'discarded', quantity_available = 0, updated_at = now() WHERE id = $1",
    )
    .bind(lot_id)
    .execute(&mut **tx)
    .await?;

    recompute_stock(tx, lot.food_id).await?;
    fetch_lot_in_tx(tx, lot_id).await
}

pub async fn list_seller_lots(
    store: &Store,
    seller_id: Uuid,
    food_id: Option<Uuid>,
) -> Result<Vec<ProductionLot>, CoreError> {
    let query = format!(
        "SELECT {LOT_COLUMNS} FROM production_lots
         WHERE seller_id = $1 AND ($2::uuid IS NULL OR food_id = $2)
         ORDER BY created_at DESC, id DESC"
    );
    let rows = sqlx::query(&query)
        .bind(seller_id)
        .bind(food_id)
        .fetch_all(store.pool())
        .await?;
    rows.iter().map(lot_from_row).collect()
}

/// Orders that received stock from a lot; the recall blast radius.
pub async fn orders_for_lot(store: &Store, lot_id: Uuid) -> Result<Vec<Uuid>, CoreError> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT oi.order_id
        FROM order_item_lot_allocations a
        JOIN order_items oi ON oi.id = a.order_item_id
        WHERE a.lot_id = $1
        "#,
    )
    .bind(lot_id)
    .fetch_all(store.pool())
    .await?;
    rows.iter()
        .map(|row| Ok(row.try_get::<Uuid, _>("order_id")?))
        .collect()
}

/// Derived stock cache: sum of `quantity_available` over open lots.
pub async fn recompute_stock(tx: &mut Tx<'_>, food_id: Uuid) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        UPDATE foods
        SET current_stock = (
            SELECT COALESCE(SUM(quantity_available), 0)
            FROM production_lots
            WHERE food_id = $1 AND status = 'open'
        ),
        updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(food_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// A lot candidate as seen by the FEFO planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotCandidate {
    pub lot_id: Uuid,
    pub available: i32,
}

/// Greedy FEFO fill: take from candidates in the order given until the
/// requested quantity is covered. Candidates must already be sorted by
/// expiry. Returns `(lot_id, taken)` pairs, or the uncovered shortfall.
pub fn plan_fefo(requested: i32, candidates: &[LotCandidate]) -> Result<Vec<(Uuid, i32)>, i32> {
    let mut remaining = requested;
    let mut plan = Vec::new();
    for candidate in candidates {
        if remaining == 0 {
            break;
        }
        let take = candidate.available.min(remaining);
        if take > 0 {
            plan.push((candidate.lot_id, take));
            remaining -= take;
        }
    }
    if remaining > 0 {
        Err(remaining)
    } else {
        Ok(plan)
    }
}

/// Allocate stock for one order item inside the caller's (serializable)
/// transaction. Locks candidate lots, applies the FEFO plan, and marks
/// exhausted lots depleted. The caller recomputes food stock afterwards.
pub async fn allocate_item(
    tx: &mut Tx<'_>,
    order_item_id: Uuid,
    seller_id: Uuid,
    food_id: Uuid,
    quantity: i32,
) -> Result<(), CoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, quantity_available
        FROM production_lots
        WHERE seller_id = $1 AND food_id = $2 AND status = 'open' AND quantity_available > 0
        ORDER BY COALESCE(use_by, best_before, produced_at) ASC, created_at ASC
        FOR UPDATE
        "#,
    )
    .bind(seller_id)
    .bind(food_id)
    .fetch_all(&mut **tx)
    .await?;

    let candidates: Vec<LotCandidate> = rows
        .iter()
        .map(|row| {
            Ok(LotCandidate {
                lot_id: row.try_get("id")?,
                available: row.try_get("quantity_available")?,
            })
        })
        .collect::<Result<_, CoreError>>()?;

    let plan = plan_fefo(quantity, &candidates).map_err(|_| {
        CoreError::domain(
            ErrorCode::InsufficientLotStock,
            format!("INSUFFICIENT_LOT_STOCK:{food_id}"),
        )
    })?;

    for (lot_id, taken) in plan {
        sqlx::query(
            r#"
            UPDATE production_lots
            SET quantity_available = quantity_available - $2,
                status = CASE WHEN quantity_available - $2 = 0 THEN 'depleted' ELSE status END,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(lot_id)
        .bind(taken)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO order_item_lot_allocations (id, order_item_id, lot_id, quantity, created_at)
            VALUES ($1, $2, $3, $4, now())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_item_id)
        .bind(lot_id)
        .bind(taken)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Return an order's allocated quantities to their lots (cancellation or
/// expiry before handover). Depleted lots reopen; recalled and discarded
/// lots take the quantity back without becoming allocatable again.
pub async fn release_order_allocations(tx: &mut Tx<'_>, order_id: Uuid) -> Result<(), CoreError> {
    let rows = sqlx::query(
        r#"
        SELECT a.id AS allocation_id, a.lot_id, a.quantity, l.food_id
        FROM order_item_lot_allocations a
        JOIN order_items oi ON oi.id = a.order_item_id
        JOIN production_lots l ON l.id = a.lot_id
        WHERE oi.order_id = $1
        FOR UPDATE OF l
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut **tx)
    .await?;

    let mut touched_foods: Vec<Uuid> = Vec::new();
    for row in &rows {
        let allocation_id: Uuid = row.try_get("allocation_id")?;
        let lot_id: Uuid = row.try_get("lot_id")?;
        let quantity: i32 = row.try_get("quantity")?;
        let food_id: Uuid = row.try_get("food_id")?;

        sqlx::query(
            r#"
            UPDATE production_lots
            SET quantity_available = LEAST(quantity_available + $2, quantity_produced),
                status = CASE WHEN status = 'depleted' THEN 'open' ELSE status END,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(lot_id)
        .bind(quantity)
        .execute(&mut **tx)
        .await?;

        sqlx::query("DELETE FROM order_item_lot_allocations WHERE id = $1")
            .bind(allocation_id)
            .execute(&mut **tx)
            .await?;

        if !touched_foods.contains(&food_id) {
            touched_foods.push(food_id);
        }
    }

    for food_id in touched_foods {
        recompute_stock(tx, food_id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(available: i32) -> LotCandidate {
        LotCandidate {
            lot_id: Uuid::new_v4(),
            available,
        }
    }

    #[test]
    fn fefo_takes_earliest_first() {
        // Candidates arrive pre-sorted by expiry: B (earlier) then A.
        let lot_b = candidate(5);
        let lot_a = candidate(5);
        let plan = plan_fefo(7, &[lot_b.clone(), lot_a.clone()]).unwrap();
        assert_eq!(plan, vec![(lot_b.lot_id, 5), (lot_a.lot_id, 2)]);
    }

    #[test]
    fn fefo_exact_fill_consumes_one_lot() {
        let only = candidate(4);
        let plan = plan_fefo(4, &[only.clone(), candidate(9)]).unwrap();
        assert_eq!(plan, vec![(only.lot_id, 4)]);
    }

    #[test]
    fn fefo_reports_shortfall() {
        let shortfall = plan_fefo(10, &[candidate(3), candidate(4)]).unwrap_err();
        assert_eq!(shortfall, 3);
    }

    #[test]
    fn fefo_skips_empty_candidates() {
        let usable = candidate(2);
        let plan = plan_fefo(2, &[candidate(0), usable.clone()]).unwrap();
        assert_eq!(plan, vec![(usable.lot_id, 2)]);
    }

    #[test]
    fn fefo_zero_request_is_empty_plan() {
        let plan = plan_fefo(0, &[candidate(5)]).unwrap();
        assert!(plan.is_empty());
    }
}
