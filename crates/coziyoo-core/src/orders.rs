//! Order lifecycle: the authoritative state machine, order creation, FEFO
//! allocation on seller approval, the completion gate, and the expiry /
//! auto-complete sweepers.
//!
//! Invariant handling:
//! - Every status change goes through [`can_transition`] and appends an
//!   `order_events` row plus an outbox event in the same transaction.
//! - Stock is allocated when the seller approves and released when an
//!   allocated order dies before handover.
//! - `delivered -> completed` is gated on delivery proof and both allergen
//!   disclosures; completion writes the finance row in the same transaction.

use crate::db::{Store, Tx};
use crate::error::{CoreError, ErrorCode};
use crate::finance;
use crate::lots;
use crate::outbox::{self, event_type, NewOutboxEvent};
use crate::types::{
    new_order_code, new_short_id, DeliveryType, DisclosurePhase, Money, OrderStatus, Realm,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{info, warn};
use uuid::Uuid;

/// Who is asking for a transition. The payment orchestrator and the sweepers
/// act as `System`; admins may force-drive a legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Buyer,
    Seller,
    System,
    Admin,
}

/// The allowed transition table. This is the single authority; every write
/// path checks it before touching the row.
pub fn allowed_targets(from: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match from {
        Draft => &[PendingSellerApproval],
        PendingSellerApproval => &[SellerApproved, Rejected, Cancelled, Expired],
        SellerApproved => &[AwaitingPayment, Cancelled],
        AwaitingPayment => &[Paid, Cancelled, Expired],
        Paid => &[Preparing, Cancelled, RefundPending],
        Preparing => &[Ready, Cancelled],
        Ready => &[InDelivery, Delivered, Cancelled],
        InDelivery => &[Delivered, Cancelled],
        Delivered => &[Completed, RefundPending],
        RefundPending => &[Refunded, RefundRejected],
        Completed | Rejected | Cancelled | Refunded | RefundRejected | Expired => &[],
    }
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_targets(from).contains(&to)
}

pub fn is_terminal(status: OrderStatus) -> bool {
    allowed_targets(status).is_empty()
}

/// The actor matrix: which driver may request a (legal) transition.
pub fn may_drive(driver: Driver, from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    if !can_transition(from, to) {
        return false;
    }
    match driver {
        Driver::Seller => matches!(
            (from, to),
            (PendingSellerApproval, SellerApproved)
                | (PendingSellerApproval, Rejected)
                | (Paid, Preparing)
                | (Preparing, Ready)
                | (Ready, InDelivery)
                | (Ready, Delivered)
                | (InDelivery, Delivered)
        ),
        Driver::Buyer => matches!(
            (from, to),
            // Buyer cancellation stops at preparing; later the food exists.
            (PendingSellerApproval, Cancelled)
                | (SellerApproved, Cancelled)
                | (AwaitingPayment, Cancelled)
                | (Paid, Cancelled)
                | (Delivered, Completed)
        ),
        Driver::System => matches!(
            (from, to),
            (SellerApproved, AwaitingPayment)
                | (AwaitingPayment, Paid)
                | (PendingSellerApproval, Expired)
                | (AwaitingPayment, Expired)
                | (Delivered, Completed)
        ),
        Driver::Admin => true,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub short_id: String,
    pub order_code: String,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub status: OrderStatus,
    pub delivery_type: DeliveryType,
    pub delivery_address: Option<serde_json::Value>,
    pub total_price: Money,
    pub payment_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub food_id: Uuid,
    pub food_name: String,
    pub unit_price: Money,
    pub quantity: i32,
    pub line_total: Money,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderItem {
    pub food_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<CreateOrderItem>,
    pub delivery_type: DeliveryType,
    pub delivery_address: Option<serde_json::Value>,
}

const ORDER_COLUMNS: &str = "id, short_id, order_code, buyer_id, seller_id, status, delivery_type, \
     delivery_address, total_price, payment_completed, created_at, updated_at";

pub(crate) fn order_from_row(row: &sqlx::postgres::PgRow) -> Result<Order, CoreError> {
    let status: String = row.try_get("status")?;
    let delivery_type: String = row.try_get("delivery_type")?;
    Ok(Order {
        id: row.try_get("id")?,
        short_id: row.try_get("short_id")?,
        order_code: row.try_get("order_code")?,
        buyer_id: row.try_get("buyer_id")?,
        seller_id: row.try_get("seller_id")?,
        status: OrderStatus::parse(&status)?,
        delivery_type: DeliveryType::parse(&delivery_type)?,
        delivery_address: row.try_get("delivery_address")?,
        total_price: row.try_get("total_price")?,
        payment_completed: row.try_get("payment_completed")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn fetch_order(store: &Store, order_id: Uuid) -> Result<Order, CoreError> {
    let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
    let row = sqlx::query(&query)
        .bind(order_id)
        .fetch_optional(store.pool())
        .await?
        .ok_or_else(|| CoreError::not_found(ErrorCode::OrderNotFound, "order not found"))?;
    order_from_row(&row)
}

/// Lock the order row for mutation.
pub(crate) async fn lock_order(tx: &mut Tx<'_>, order_id: Uuid) -> Result<Order, CoreError> {
    let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&query)
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| CoreError::not_found(ErrorCode::OrderNotFound, "order not found"))?;
    order_from_row(&row)
}

pub async fn fetch_items(store: &Store, order_id: Uuid) -> Result<Vec<OrderItem>, CoreError> {
    let rows = sqlx::query(
        "SELECT id, order_id, food_id, food_name, unit_price, quantity, line_total
         FROM order_items WHERE order_id = $1 ORDER BY food_name",
    )
    .bind(order_id)
    .fetch_all(store.pool())
    .await?;
    rows.iter()
        .map(|row| {
            Ok(OrderItem {
                id: row.try_get("id")?,
                order_id: row.try_get("order_id")?,
                food_id: row.try_get("food_id")?,
                food_name: row.try_get("food_name")?,
                unit_price: row.try_get("unit_price")?,
                quantity: row.try_get("quantity")?,
                line_total: row.try_get("line_total")?,
            })
        })
        .collect()
}

async fn items_in_tx(tx: &mut Tx<'_>, order_id: Uuid) -> Result<Vec<(Uuid, Uuid, i32)>, CoreError> {
    let rows =
        sqlx::query("SELECT id, food_id, quantity FROM order_items WHERE order_id = $1 ORDER BY id")
            .bind(order_id)
            .fetch_all(&mut **tx)
            .await?;
    rows.iter()
        .map(|row| {
            Ok((
                row.try_get("id")?,
                row.try_get("food_id")?,
                row.try_get("quantity")?,
            ))
        })
        .collect()
}

/// Append the order event row and the matching outbox event.
pub(crate) async fn record_transition(
    tx: &mut Tx<'_>,
    order_id: Uuid,
    from: OrderStatus,
    to: OrderStatus,
    actor_realm: Option<Realm>,
    actor_id: Option<Uuid>,
    detail: serde_json::Value,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO order_events (
            id, order_id, event_type, from_status, to_status, actor_realm, actor_id, detail, created_at
        )
        VALUES ($1, $2, 'status_changed', $3, $4, $5, $6, $7, now())
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(order_id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(actor_realm.map(|r| r.as_str()))
    .bind(actor_id)
    .bind(&detail)
    .execute(&mut **tx)
    .await?;

    outbox::enqueue(
        tx,
        NewOutboxEvent {
            event_type: event_type::ORDER_STATUS_CHANGED,
            aggregate_type: "order",
            aggregate_id: order_id,
            payload: serde_json::json!({
                "orderId": order_id,
                "from": from.as_str(),
                "to": to.as_str(),
            }),
        },
    )
    .await?;
    Ok(())
}

pub(crate) async fn apply_status(
    tx: &mut Tx<'_>,
    order_id: Uuid,
    to: OrderStatus,
) -> Result<(), CoreError> {
    sqlx::query("UPDATE orders SET status = $2, updated_at = now() WHERE id = $1")
        .bind(order_id)
        .bind(to.as_str())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn invalid_transition(from: OrderStatus, to: OrderStatus) -> CoreError {
    CoreError::domain(
        ErrorCode::OrderInvalidState,
        format!("cannot move order from {} to {}", from.as_str(), to.as_str()),
    )
}

/// Create an order from buyer-supplied items. All items must belong to the
/// same active seller; totals are computed from current food prices.
pub async fn create_order(
    store: &Store,
    buyer_id: Uuid,
    req: &CreateOrderRequest,
) -> Result<Order, CoreError> {
    if req.items.is_empty() {
        return Err(CoreError::validation(
            "order must contain at least one item",
            Some(serde_json::json!({ "fields": ["items"] })),
        ));
    }
    if req.items.iter().any(|item| item.quantity <= 0) {
        return Err(CoreError::validation(
            "item quantities must be positive",
            Some(serde_json::json!({ "fields": ["items.quantity"] })),
        ));
    }
    if req.delivery_type == DeliveryType::Delivery && req.delivery_address.is_none() {
        return Err(CoreError::validation(
            "delivery orders require a delivery address",
            Some(serde_json::json!({ "fields": ["deliveryAddress"] })),
        ));
    }

    let mut tx = store.begin().await?;

    let mut seller_id: Option<Uuid> = None;
    let mut total = Decimal::ZERO;
    let mut lines: Vec<(Uuid, String, Money, i32, Money)> = Vec::new();

    for item in &req.items {
        let row = sqlx::query(
            "SELECT seller_id, name, price FROM foods WHERE id = $1 AND is_active",
        )
        .bind(item.food_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CoreError::not_found(ErrorCode::FoodNotFound, "food not found"))?;

        let food_seller: Uuid = row.try_get("seller_id")?;
        let name: String = row.try_get("name")?;
        let price: Money = row.try_get("price")?;

        match seller_id {
            None => seller_id = Some(food_seller),
            Some(existing) if existing != food_seller => {
                return Err(CoreError::validation(
                    "all items in an order must come from the same seller",
                    Some(serde_json::json!({ "fields": ["items"] })),
                ));
            }
            _ => {}
        }

        let line_total = price * Decimal::from(item.quantity);
        total += line_total;
        lines.push((item.food_id, name, price, item.quantity, line_total));
    }

    let seller_id = seller_id.ok_or_else(|| {
        CoreError::validation("order must contain at least one item", None)
    })?;
    if seller_id == buyer_id {
        return Err(CoreError::domain(
            ErrorCode::ForbiddenOrderScope,
            "sellers cannot order their own food",
        ));
    }

    let order_id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, short_id, order_code, buyer_id, seller_id, status, delivery_type,
            delivery_address, total_price, payment_completed, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, $10, $10)
        "#,
    )
    .bind(order_id)
    .bind(new_short_id())
    .bind(new_order_code())
    .bind(buyer_id)
    .bind(seller_id)
    .bind(OrderStatus::PendingSellerApproval.as_str())
    .bind(req.delivery_type.as_str())
    .bind(&req.delivery_address)
    .bind(total)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for (food_id, name, price, quantity, line_total) in &lines {
        sqlx::query(
            r#"
            INSERT INTO order_items (id, order_id, food_id, food_name, unit_price, quantity, line_total)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(food_id)
        .bind(name)
        .bind(price)
        .bind(quantity)
        .bind(line_total)
        .execute(&mut *tx)
        .await?;
    }

    record_transition(
        &mut tx,
        order_id,
        OrderStatus::Draft,
        OrderStatus::PendingSellerApproval,
        Some(Realm::App),
        Some(buyer_id),
        serde_json::json!({ "totalPrice": total }),
    )
    .await?;

    tx.commit().await?;
    info!(order_id = %order_id, %total, "order created");
    fetch_order(store, order_id).await
}

/// Seller approval: FEFO-allocate stock for every item inside one
/// serializable transaction, then move to `seller_approved`.
pub async fn approve(store: &Store, seller_id: Uuid, order_id: Uuid) -> Result<Order, CoreError> {
    let mut tx = store.begin_serializable().await?;
    let order = lock_order(&mut tx, order_id).await?;
    if order.seller_id != seller_id {
        return Err(CoreError::domain(
            ErrorCode::ForbiddenOrderScope,
            "order belongs to another seller",
        ));
    }
    if !may_drive(Driver::Seller, order.status, OrderStatus::SellerApproved) {
        return Err(invalid_transition(order.status, OrderStatus::SellerApproved));
    }

    let items = items_in_tx(&mut tx, order_id).await?;
    let mut touched_foods: Vec<Uuid> = Vec::new();
    for (item_id, food_id, quantity) in items {
        lots::allocate_item(&mut tx, item_id, seller_id, food_id, quantity).await?;
        if !touched_foods.contains(&food_id) {
            touched_foods.push(food_id);
        }
    }
    for food_id in touched_foods {
        lots::recompute_stock(&mut tx, food_id).await?;
    }

    apply_status(&mut tx, order_id, OrderStatus::SellerApproved).await?;
    record_transition(
        &mut tx,
        order_id,
        order.status,
        OrderStatus::SellerApproved,
        Some(Realm::App),
        Some(seller_id),
        serde_json::json!({}),
    )
    .await?;

    tx.commit().await?;
    fetch_order(store, order_id).await
}

pub async fn reject(
    store: &Store,
    seller_id: Uuid,
    order_id: Uuid,
    reason: Option<&str>,
) -> Result<Order, CoreError> {
    let mut tx = store.begin().await?;
    let order = lock_order(&mut tx, order_id).await?;
    if order.seller_id != seller_id {
        return Err(CoreError::domain(
            ErrorCode::ForbiddenOrderScope,
            "order belongs to another seller",
        ));
    }
    if !may_drive(Driver::Seller, order.status, OrderStatus::Rejected) {
        return Err(invalid_transition(order.status, OrderStatus::Rejected));
    }

    apply_status(&mut tx, order_id, OrderStatus::Rejected).await?;
    record_transition(
        &mut tx,
        order_id,
        order.status,
        OrderStatus::Rejected,
        Some(Realm::App),
        Some(seller_id),
        serde_json::json!({ "reason": reason }),
    )
    .await?;
    tx.commit().await?;
    fetch_order(store, order_id).await
}

/// Cancellation by buyer (pre-preparing), or by an admin on any legal edge.
pub async fn cancel(
    store: &Store,
    driver: Driver,
    actor_realm: Realm,
    actor_id: Uuid,
    order_id: Uuid,
    reason: Option<&str>,
) -> Result<Order, CoreError> {
    let mut tx = store.begin().await?;
    let order = lock_order(&mut tx, order_id).await?;
    if driver == Driver::Buyer && order.buyer_id != actor_id {
        return Err(CoreError::domain(
            ErrorCode::ForbiddenOrderScope,
            "order belongs to another buyer",
        ));
    }
    if !may_drive(driver, order.status, OrderStatus::Cancelled) {
        return Err(invalid_transition(order.status, OrderStatus::Cancelled));
    }

    // Allocated stock goes back on the shelf.
    lots::release_order_allocations(&mut tx, order_id).await?;

    if driver == Driver::Admin {
        crate::audit::record(
            &mut tx,
            actor_id,
            "order.cancel",
            "order",
            Some(order_id),
            Some(serde_json::json!({ "status": order.status.as_str() })),
            Some(serde_json::json!({ "status": OrderStatus::Cancelled.as_str() })),
            reason,
        )
        .await?;
    }

    apply_status(&mut tx, order_id, OrderStatus::Cancelled).await?;
    record_transition(
        &mut tx,
        order_id,
        order.status,
        OrderStatus::Cancelled,
        Some(actor_realm),
        Some(actor_id),
        serde_json::json!({ "reason": reason }),
    )
    .await?;
    tx.commit().await?;
    fetch_order(store, order_id).await
}

/// Seller-driven fulfilment steps: preparing, ready, in_delivery, delivered.
pub async fn advance(
    store: &Store,
    seller_id: Uuid,
    order_id: Uuid,
    to: OrderStatus,
) -> Result<Order, CoreError> {
    let mut tx = store.begin().await?;
    let order = lock_order(&mut tx, order_id).await?;
    if order.seller_id != seller_id {
        return Err(CoreError::domain(
            ErrorCode::ForbiddenOrderScope,
            "order belongs to another seller",
        ));
    }
    // Pickup orders go ready -> delivered directly; delivery orders must
    // pass through in_delivery.
    if to == OrderStatus::Delivered
        && order.status == OrderStatus::Ready
        && order.delivery_type == DeliveryType::Delivery
    {
        return Err(CoreError::domain(
            ErrorCode::OrderInvalidState,
            "delivery orders must enter in_delivery before delivered",
        ));
    }
    if !may_drive(Driver::Seller, order.status, to) {
        return Err(invalid_transition(order.status, to));
    }

    apply_status(&mut tx, order_id, to).await?;
    record_transition(
        &mut tx,
        order_id,
        order.status,
        to,
        Some(Realm::App),
        Some(seller_id),
        serde_json::json!({}),
    )
    .await?;
    tx.commit().await?;
    fetch_order(store, order_id).await
}

/// What blocks completion right now, if anything.
async fn completion_blockers(tx: &mut Tx<'_>, order: &Order) -> Result<Vec<&'static str>, CoreError> {
    let mut blockers = Vec::new();

    if order.delivery_type == DeliveryType::Delivery {
        let verified = sqlx::query(
            "SELECT 1 AS ok FROM delivery_proof_records WHERE order_id = $1 AND status = 'verified'",
        )
        .bind(order.id)
        .fetch_optional(&mut **tx)
        .await?;
        if verified.is_none() {
            blockers.push("delivery_proof_not_verified");
        }
    }

    for phase in [DisclosurePhase::PreOrder, DisclosurePhase::Handover] {
        let present = sqlx::query(
            "SELECT 1 AS ok FROM allergen_disclosure_records WHERE order_id = $1 AND phase = $2",
        )
        .bind(order.id)
        .bind(phase.as_str())
        .fetch_optional(&mut **tx)
        .await?;
        if present.is_none() {
            blockers.push(match phase {
                DisclosurePhase::PreOrder => "pre_order_disclosure_missing",
                DisclosurePhase::Handover => "handover_disclosure_missing",
            });
        }
    }

    Ok(blockers)
}

/// `delivered -> completed`. The gate may only be bypassed by an admin
/// override with a recorded reason; the override writes an audit row.
pub async fn complete(
    store: &Store,
    driver: Driver,
    actor_realm: Realm,
    actor_id: Uuid,
    order_id: Uuid,
    admin_override_reason: Option<&str>,
) -> Result<Order, CoreError> {
    let mut tx = store.begin().await?;
    let order = lock_order(&mut tx, order_id).await?;
    if driver == Driver::Buyer && order.buyer_id != actor_id {
        return Err(CoreError::domain(
            ErrorCode::ForbiddenOrderScope,
            "order belongs to another buyer",
        ));
    }
    if !may_drive(driver, order.status, OrderStatus::Completed) {
        return Err(invalid_transition(order.status, OrderStatus::Completed));
    }

    let blockers = completion_blockers(&mut tx, &order).await?;
    if !blockers.is_empty() {
        match (driver, admin_override_reason) {
            (Driver::Admin, Some(reason)) => {
                crate::audit::record(
                    &mut tx,
                    actor_id,
                    "order.complete_override",
                    "order",
                    Some(order_id),
                    Some(serde_json::json!({ "blockers": blockers })),
                    None,
                    Some(reason),
                )
                .await?;
            }
            _ => {
                return Err(CoreError::Domain {
                    code: ErrorCode::OrderInvalidState,
                    message: "completion requirements are not met".into(),
                    details: Some(serde_json::json!({ "blockers": blockers })),
                });
            }
        }
    }

    apply_status(&mut tx, order_id, OrderStatus::Completed).await?;
    record_transition(
        &mut tx,
        order_id,
        order.status,
        OrderStatus::Completed,
        Some(actor_realm),
        Some(actor_id),
        serde_json::json!({}),
    )
    .await?;

    // Finance is finalized in the same transaction as the transition.
    finance::finalize_order(&mut tx, &order).await?;

    outbox::enqueue(
        &mut tx,
        NewOutboxEvent {
            event_type: event_type::ORDER_COMPLETED,
            aggregate_type: "order",
            aggregate_id: order_id,
            payload: serde_json::json!({
                "orderId": order_id,
                "sellerId": order.seller_id,
                "buyerId": order.buyer_id,
                "gross": order.total_price,
            }),
        },
    )
    .await?;

    tx.commit().await?;
    fetch_order(store, order_id).await
}

/// Expire orders that sat too long waiting for approval or payment.
/// Each order is settled in its own transaction so one failure does not
/// poison the sweep.
pub async fn expire_sweep(
    store: &Store,
    approval_ttl: Duration,
    payment_ttl: Duration,
) -> Result<usize, CoreError> {
    let stale = sqlx::query(
        r#"
        SELECT id FROM orders
        WHERE (status = 'pending_seller_approval' AND updated_at < $1)
           OR (status = 'awaiting_payment' AND updated_at < $2)
        "#,
    )
    .bind(Utc::now() - approval_ttl)
    .bind(Utc::now() - payment_ttl)
    .fetch_all(store.pool())
    .await?;

    let mut expired = 0usize;
    for row in stale {
        let order_id: Uuid = row.try_get("id")?;
        match expire_one(store, order_id).await {
            Ok(true) => expired += 1,
            Ok(false) => {}
            Err(err) => warn!(order_id = %order_id, error = %err, "expiry failed"),
        }
    }
    Ok(expired)
}

async fn expire_one(store: &Store, order_id: Uuid) -> Result<bool, CoreError> {
    let mut tx = store.begin().await?;
    let order = lock_order(&mut tx, order_id).await?;
    if !may_drive(Driver::System, order.status, OrderStatus::Expired) {
        return Ok(false);
    }
    lots::release_order_allocations(&mut tx, order_id).await?;
    apply_status(&mut tx, order_id, OrderStatus::Expired).await?;
    record_transition(
        &mut tx,
        order_id,
        order.status,
        OrderStatus::Expired,
        None,
        None,
        serde_json::json!({ "swept": true }),
    )
    .await?;
    tx.commit().await?;
    Ok(true)
}

/// Auto-complete delivered orders after the grace window when the completion
/// gate passes; gated orders stay delivered until proof/disclosures land.
pub async fn auto_complete_sweep(store: &Store, grace: Duration) -> Result<usize, CoreError> {
    let due = sqlx::query("SELECT id FROM orders WHERE status = 'delivered' AND updated_at < $1")
        .bind(Utc::now() - grace)
        .fetch_all(store.pool())
        .await?;

    let mut completed = 0usize;
    for row in due {
        let order_id: Uuid = row.try_get("id")?;
        match complete(
            store,
            Driver::System,
            Realm::App,
            Uuid::nil(),
            order_id,
            None,
        )
        .await
        {
            Ok(_) => completed += 1,
            Err(CoreError::Domain { .. }) => {} // gate not met yet; retry next sweep
            Err(err) => warn!(order_id = %order_id, error = %err, "auto-complete failed"),
        }
    }
    Ok(completed)
}

/// Buyer/seller order feed, newest first, keyset-paginated.
pub async fn list_for_user(
    store: &Store,
    user_id: Uuid,
    role: crate::types::ActorRole,
    page: &crate::pagination::FeedPage,
) -> Result<(Vec<Order>, crate::pagination::FeedMeta), CoreError> {
    let scope_column = match role {
        crate::types::ActorRole::Buyer => "buyer_id",
        crate::types::ActorRole::Seller => "seller_id",
    };
    let query = format!(
        r#"
        SELECT {ORDER_COLUMNS} FROM orders
        WHERE {scope_column} = $1
          AND ($2::timestamptz IS NULL OR (created_at, id) < ($2, $3))
        ORDER BY created_at DESC, id DESC
        LIMIT $4
        "#
    );
    let rows = sqlx::query(&query)
        .bind(user_id)
        .bind(page.after.map(|c| c.created_at))
        .bind(page.after.map(|c| c.id))
        .bind(page.limit + 1)
        .fetch_all(store.pool())
        .await?;

    let fetched = rows.len();
    let mut orders = rows
        .iter()
        .map(order_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    orders.truncate(page.limit as usize);

    let last = orders.last().map(|order| crate::pagination::Cursor {
        created_at: order.created_at,
        id: order.id,
    });
    Ok((orders, crate::pagination::feed_meta(page.limit, fetched, last)))
}

pub const ADMIN_ORDER_SORTS: &[&str] = &["created_at", "updated_at", "total_price", "status"];

/// Admin order listing: offset pagination over the allowlisted sorts.
pub async fn admin_list(
    store: &Store,
    status: Option<OrderStatus>,
    page: &crate::pagination::OffsetPage,
) -> Result<(Vec<Order>, crate::pagination::OffsetMeta), CoreError> {
    let total_row = sqlx::query(
        "SELECT count(*) AS total FROM orders WHERE ($1::text IS NULL OR status = $1)",
    )
    .bind(status.map(|s| s.as_str()))
    .fetch_one(store.pool())
    .await?;
    let total: i64 = total_row.try_get("total")?;

    let query = format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE ($1::text IS NULL OR status = $1) {} LIMIT $2 OFFSET $3",
        page.order_clause()
    );
    let rows = sqlx::query(&query)
        .bind(status.map(|s| s.as_str()))
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(store.pool())
        .await?;
    let orders = rows
        .iter()
        .map(order_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((orders, page.meta(total)))
}

pub async fn order_events(store: &Store, order_id: Uuid) -> Result<Vec<serde_json::Value>, CoreError> {
    let rows = sqlx::query(
        r#"
        SELECT event_type, from_status, to_status, detail, created_at
        FROM order_events WHERE order_id = $1 ORDER BY created_at, id
        "#,
    )
    .bind(order_id)
    .fetch_all(store.pool())
    .await?;
    rows.iter()
        .map(|row| {
            Ok(serde_json::json!({
                "eventType": row.try_get::<String, _>("event_type")?,
                "fromStatus": row.try_get::<Option<String>, _>("from_status")?,
                "toStatus": row.try_get::<Option<String>, _>("to_status")?,
                "detail": row.try_get::<serde_json::Value, _>("detail")?,
                "createdAt": row.try_get::<DateTime<Utc>, _>("created_at")?,
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_covers_the_lifecycle() {
        use OrderStatus::*;
        assert!(can_transition(PendingSellerApproval, SellerApproved));
        assert!(can_transition(PendingSellerApproval, Rejected));
        assert!(can_transition(SellerApproved, AwaitingPayment));
        assert!(can_transition(AwaitingPayment, Paid));
        assert!(can_transition(Paid, Preparing));
        assert!(can_transition(Ready, Delivered));
        assert!(can_transition(InDelivery, Delivered));
        assert!(can_transition(Delivered, Completed));
        assert!(can_transition(RefundPending, Refunded));
        assert!(can_transition(RefundPending, RefundRejected));

        assert!(!can_transition(Paid, Delivered));
        assert!(!can_transition(Completed, Cancelled));
        assert!(!can_transition(Refunded, Paid));
        assert!(!can_transition(Expired, PendingSellerApproval));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use OrderStatus::*;
        for status in [Completed, Rejected, Cancelled, Refunded, RefundRejected, Expired] {
            assert!(is_terminal(status), "{}", status.as_str());
        }
        assert!(!is_terminal(Paid));
        assert!(!is_terminal(Delivered));
    }

    #[test]
    fn buyer_cancellation_stops_at_preparing() {
        use OrderStatus::*;
        assert!(may_drive(Driver::Buyer, PendingSellerApproval, Cancelled));
        assert!(may_drive(Driver::Buyer, Paid, Cancelled));
        assert!(!may_drive(Driver::Buyer, Preparing, Cancelled));
        assert!(!may_drive(Driver::Buyer, InDelivery, Cancelled));
    }

    #[test]
    fn seller_drives_fulfilment_not_payment() {
        use OrderStatus::*;
        assert!(may_drive(Driver::Seller, Paid, Preparing));
        assert!(may_drive(Driver::Seller, Ready, Delivered));
        assert!(!may_drive(Driver::Seller, AwaitingPayment, Paid));
        assert!(!may_drive(Driver::Seller, Delivered, Completed));
    }

    #[test]
    fn system_drives_payment_and_expiry() {
        use OrderStatus::*;
        assert!(may_drive(Driver::System, AwaitingPayment, Paid));
        assert!(may_drive(Driver::System, SellerApproved, AwaitingPayment));
        assert!(may_drive(Driver::System, PendingSellerApproval, Expired));
        assert!(may_drive(Driver::System, Delivered, Completed));
        assert!(!may_drive(Driver::System, Paid, Preparing));
    }

    #[test]
    fn admin_is_bounded_by_the_transition_table() {
        use OrderStatus::*;
        assert!(may_drive(Driver::Admin, Paid, RefundPending));
        assert!(may_drive(Driver::Admin, RefundPending, Refunded));
        assert!(!may_drive(Driver::Admin, Completed, Paid));
        assert!(!may_drive(Driver::Admin, Cancelled, Paid));
    }
}
