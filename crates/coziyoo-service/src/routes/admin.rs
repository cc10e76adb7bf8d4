//! Admin surface. Every mutation here lands an `admin_audit_logs` row in
//! the same transaction as the change (the domain operations take care of
//! it; the handlers that mutate directly open their own transaction).

use crate::extract::AdminActor;
use crate::{data, data_offset, ApiError, ServiceState};
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use coziyoo_core::actor::require_super_admin;
use coziyoo_core::compliance::{self, ReviewAction};
use coziyoo_core::disputes;
use coziyoo_core::finance;
use coziyoo_core::lots;
use coziyoo_core::orders::{self, Driver, ADMIN_ORDER_SORTS};
use coziyoo_core::pagination::{OffsetPage, OffsetQuery};
use coziyoo_core::retention;
use coziyoo_core::types::{CheckStatus, DisputeStatus, LiabilityParty, OrderStatus, Realm};
use coziyoo_core::{audit, CoreError};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::Row;
use uuid::Uuid;

pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/admin/orders", get(list_orders))
        .route("/admin/orders/:id/cancel", post(cancel_order))
        .route("/admin/orders/:id/complete", post(complete_order))
        .route("/admin/lots", get(list_lots))
        .route("/admin/lots/:id/orders", get(lot_orders))
        .route("/admin/lots/:id/recall", post(recall_lot))
        .route("/admin/compliance", get(list_compliance_profiles))
        .route("/admin/compliance/:seller_id", get(compliance_detail))
        .route("/admin/compliance/:seller_id/review", post(review_compliance))
        .route("/admin/compliance/:seller_id/checks/:code", post(set_check))
        .route("/admin/disputes/:id", get(get_dispute))
        .route("/admin/disputes/:id/review", post(review_dispute))
        .route("/admin/disputes/:id/resolve", post(resolve_dispute))
        .route("/admin/finance/commission", get(get_commission).post(set_commission))
        .route("/admin/finance/reports", post(create_report))
        .route("/admin/legal-holds", post(place_hold))
        .route("/admin/legal-holds/:entity_type/:entity_id", delete(release_hold))
        .route("/admin/audit/:entity_type/:entity_id", get(audit_trail))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderListQuery {
    page: Option<i64>,
    page_size: Option<i64>,
    sort_by: Option<String>,
    sort_dir: Option<String>,
    status: Option<String>,
}

impl OrderListQuery {
    fn offset_query(&self) -> OffsetQuery {
        OffsetQuery {
            page: self.page,
            page_size: self.page_size,
            sort_by: self.sort_by.clone(),
            sort_dir: self.sort_dir.clone(),
        }
    }
}

async fn list_orders(
    State(state): State<ServiceState>,
    AdminActor(_actor): AdminActor,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = OffsetPage::parse(&query.offset_query(), ADMIN_ORDER_SORTS)?;
    let status = query
        .status
        .as_deref()
        .map(OrderStatus::parse)
        .transpose()
        .map_err(|_| CoreError::validation("unknown status filter", None))?;
    let (orders, meta) = orders::admin_list(&state.store, status, &page).await?;
    Ok(data_offset(orders, meta))
}

#[derive(Deserialize)]
struct ReasonBody {
    reason: String,
}

async fn cancel_order(
    State(state): State<ServiceState>,
    AdminActor(actor): AdminActor,
    Path(order_id): Path<Uuid>,
    Json(body): Json<ReasonBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let order = orders::cancel(
        &state.store,
        Driver::Admin,
        Realm::Admin,
        actor.subject_id(),
        order_id,
        Some(&body.reason),
    )
    .await?;
    Ok(data(order))
}

/// Force-complete with the gate override; the reason is mandatory and lands
/// in the audit trail.
async fn complete_order(
    State(state): State<ServiceState>,
    AdminActor(actor): AdminActor,
    Path(order_id): Path<Uuid>,
    Json(body): Json<ReasonBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let order = orders::complete(
        &state.store,
        Driver::Admin,
        Realm::Admin,
        actor.subject_id(),
        order_id,
        Some(&body.reason),
    )
    .await?;
    Ok(data(order))
}

pub const ADMIN_LOT_SORTS: &[&str] = &["created_at", "status", "quantity_available"];

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusListQuery {
    page: Option<i64>,
    page_size: Option<i64>,
    sort_by: Option<String>,
    sort_dir: Option<String>,
    status: Option<String>,
}

async fn list_lots(
    State(state): State<ServiceState>,
    AdminActor(_actor): AdminActor,
    Query(query): Query<StatusListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = OffsetPage::parse(
        &OffsetQuery {
            page: query.page,
            page_size: query.page_size,
            sort_by: query.sort_by.clone(),
            sort_dir: query.sort_dir.clone(),
        },
        ADMIN_LOT_SORTS,
    )?;

    let total_row = sqlx::query(
        "SELECT count(*) AS total FROM production_lots WHERE ($1::text IS NULL OR status = $1)",
    )
    .bind(&query.status)
    .fetch_one(state.store.pool())
    .await
    .map_err(CoreError::from)?;
    let total: i64 = total_row.try_get("total").map_err(CoreError::from)?;

    let sql = format!(
        r#"
        SELECT id, seller_id, food_id, lot_number, status, quantity_produced,
               quantity_available, use_by, best_before, created_at
        FROM production_lots
        WHERE ($1::text IS NULL OR status = $1)
        {}
        LIMIT $2 OFFSET $3
        "#,
        page.order_clause()
    );
    let rows = sqlx::query(&sql)
        .bind(&query.status)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(state.store.pool())
        .await
        .map_err(CoreError::from)?;

    let items: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            Ok::<_, CoreError>(serde_json::json!({
                "id": row.try_get::<Uuid, _>("id")?,
                "sellerId": row.try_get::<Uuid, _>("seller_id")?,
                "foodId": row.try_get::<Uuid, _>("food_id")?,
                "lotNumber": row.try_get::<String, _>("lot_number")?,
                "status": row.try_get::<String, _>("status")?,
                "quantityProduced": row.try_get::<i32, _>("quantity_produced")?,
                "quantityAvailable": row.try_get::<i32, _>("quantity_available")?,
                "useBy": row.try_get::<Option<DateTime<Utc>>, _>("use_by")?,
                "bestBefore": row.try_get::<Option<DateTime<Utc>>, _>("best_before")?,
                "createdAt": row.try_get::<DateTime<Utc>, _>("created_at")?,
            }))
        })
        .collect::<Result<_, _>>()?;
    Ok(data_offset(items, page.meta(total)))
}

/// Recall blast radius: orders that received stock from this lot.
async fn lot_orders(
    State(state): State<ServiceState>,
    AdminActor(_actor): AdminActor,
    Path(lot_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(lots::orders_for_lot(&state.store, lot_id).await?))
}

async fn recall_lot(
    State(state): State<ServiceState>,
    AdminActor(actor): AdminActor,
    Path(lot_id): Path<Uuid>,
    Json(body): Json<ReasonBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.store.begin().await?;
    let lot = lots::recall_lot(&mut tx, None, lot_id, &body.reason).await?;
    audit::record(
        &mut tx,
        actor.subject_id(),
        "lot.recall",
        "production_lot",
        Some(lot_id),
        None,
        Some(serde_json::json!({ "status": "recalled" })),
        Some(&body.reason),
    )
    .await?;
    tx.commit().await?;
    Ok(data(lot))
}

pub const ADMIN_COMPLIANCE_SORTS: &[&str] = &["created_at", "submitted_at", "status"];

/// Review queue: profiles filtered by status, oldest submissions first when
/// sorted by `submitted_at asc`.
async fn list_compliance_profiles(
    State(state): State<ServiceState>,
    AdminActor(_actor): AdminActor,
    Query(query): Query<StatusListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = OffsetPage::parse(
        &OffsetQuery {
            page: query.page,
            page_size: query.page_size,
            sort_by: query.sort_by.clone(),
            sort_dir: query.sort_dir.clone(),
        },
        ADMIN_COMPLIANCE_SORTS,
    )?;

    let total_row = sqlx::query(
        "SELECT count(*) AS total FROM seller_compliance_profiles WHERE ($1::text IS NULL OR status = $1)",
    )
    .bind(&query.status)
    .fetch_one(state.store.pool())
    .await
    .map_err(CoreError::from)?;
    let total: i64 = total_row.try_get("total").map_err(CoreError::from)?;

    let sql = format!(
        r#"
        SELECT id, seller_id, status, country, business_name, submitted_at, created_at
        FROM seller_compliance_profiles
        WHERE ($1::text IS NULL OR status = $1)
        {}
        LIMIT $2 OFFSET $3
        "#,
        page.order_clause()
    );
    let rows = sqlx::query(&sql)
        .bind(&query.status)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(state.store.pool())
        .await
        .map_err(CoreError::from)?;

    let items: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            Ok::<_, CoreError>(serde_json::json!({
                "id": row.try_get::<Uuid, _>("id")?,
                "sellerId": row.try_get::<Uuid, _>("seller_id")?,
                "status": row.try_get::<String, _>("status")?,
                "country": row.try_get::<String, _>("country")?,
                "businessName": row.try_get::<Option<String>, _>("business_name")?,
                "submittedAt": row.try_get::<Option<DateTime<Utc>>, _>("submitted_at")?,
                "createdAt": row.try_get::<DateTime<Utc>, _>("created_at")?,
            }))
        })
        .collect::<Result<_, _>>()?;
    Ok(data_offset(items, page.meta(total)))
}

async fn compliance_detail(
    State(state): State<ServiceState>,
    AdminActor(_actor): AdminActor,
    Path(seller_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let profile = compliance::find_profile(&state.store, seller_id)
        .await?
        .ok_or_else(|| {
            CoreError::not_found(
                coziyoo_core::ErrorCode::ComplianceProfileNotFound,
                "compliance profile not found",
            )
        })?;
    let checks = compliance::list_checks(&state.store, seller_id).await?;
    let documents = compliance::list_documents(&state.store, seller_id).await?;
    Ok(data(serde_json::json!({
        "profile": profile,
        "checks": checks,
        "documents": documents,
    })))
}

#[derive(Deserialize)]
struct ReviewBody {
    action: ReviewAction,
    note: Option<String>,
}

async fn review_compliance(
    State(state): State<ServiceState>,
    AdminActor(actor): AdminActor,
    Path(seller_id): Path<Uuid>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let profile = compliance::review(
        &state.store,
        actor.subject_id(),
        seller_id,
        body.action,
        body.note.as_deref(),
    )
    .await?;
    Ok(data(profile))
}

#[derive(Deserialize)]
struct CheckBody {
    status: CheckStatus,
}

async fn set_check(
    State(state): State<ServiceState>,
    AdminActor(actor): AdminActor,
    Path((seller_id, code)): Path<(Uuid, String)>,
    Json(body): Json<CheckBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    compliance::set_check_status(&state.store, actor.subject_id(), seller_id, &code, body.status)
        .await?;
    Ok(data(serde_json::json!({ "checkCode": code, "status": body.status })))
}

async fn get_dispute(
    State(state): State<ServiceState>,
    AdminActor(_actor): AdminActor,
    Path(case_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(disputes::fetch_case(&state.store, case_id).await?))
}

async fn review_dispute(
    State(state): State<ServiceState>,
    AdminActor(actor): AdminActor,
    Path(case_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(disputes::begin_review(&state.store, actor.subject_id(), case_id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveBody {
    outcome: DisputeStatus,
    liability_party: LiabilityParty,
    ratio_seller: Option<Decimal>,
    note: Option<String>,
}

async fn resolve_dispute(
    State(state): State<ServiceState>,
    AdminActor(actor): AdminActor,
    Path(case_id): Path<Uuid>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let case = disputes::resolve(
        &state.store,
        actor.subject_id(),
        case_id,
        body.outcome,
        body.liability_party,
        body.ratio_seller,
        body.note.as_deref(),
    )
    .await?;
    Ok(data(case))
}

async fn get_commission(
    State(state): State<ServiceState>,
    AdminActor(_actor): AdminActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    let row = sqlx::query(
        "SELECT id, commission_rate, effective_from, created_at FROM commission_settings WHERE is_active",
    )
    .fetch_optional(state.store.pool())
    .await
    .map_err(CoreError::from)?;
    let setting = row
        .map(|row| {
            Ok::<_, CoreError>(serde_json::json!({
                "id": row.try_get::<Uuid, _>("id")?,
                "commissionRate": row.try_get::<Decimal, _>("commission_rate")?,
                "effectiveFrom": row.try_get::<DateTime<Utc>, _>("effective_from")?,
                "createdAt": row.try_get::<DateTime<Utc>, _>("created_at")?,
            }))
        })
        .transpose()?;
    Ok(data(setting))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommissionBody {
    commission_rate: Decimal,
    effective_from: Option<DateTime<Utc>>,
}

/// Replacing the commission setting is a super-admin operation.
async fn set_commission(
    State(state): State<ServiceState>,
    AdminActor(actor): AdminActor,
    Json(body): Json<CommissionBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_super_admin(&actor)?;
    let mut tx = state.store.begin().await?;
    let setting = finance::create_commission_setting(
        &mut tx,
        body.commission_rate,
        body.effective_from.unwrap_or_else(Utc::now),
        actor.subject_id(),
    )
    .await?;
    audit::record(
        &mut tx,
        actor.subject_id(),
        "finance.commission_setting",
        "commission_setting",
        Some(setting.id),
        None,
        Some(serde_json::json!({ "commissionRate": setting.commission_rate })),
        None,
    )
    .await?;
    tx.commit().await?;
    Ok(data(setting))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportBody {
    seller_id: Option<Uuid>,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    file_url: String,
}

async fn create_report(
    State(state): State<ServiceState>,
    AdminActor(_actor): AdminActor,
    Json(body): Json<ReportBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = finance::create_reconciliation_report(
        &state.store,
        body.seller_id,
        body.period_start,
        body.period_end,
        &body.file_url,
    )
    .await?;
    Ok(data(report))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HoldBody {
    entity_type: String,
    entity_id: Uuid,
    reason: String,
}

async fn place_hold(
    State(state): State<ServiceState>,
    AdminActor(actor): AdminActor,
    Json(body): Json<HoldBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.store.begin().await?;
    let hold_id = retention::place_hold(
        &mut tx,
        actor.subject_id(),
        &body.entity_type,
        body.entity_id,
        &body.reason,
    )
    .await?;
    audit::record(
        &mut tx,
        actor.subject_id(),
        "legal_hold.place",
        &body.entity_type,
        Some(body.entity_id),
        None,
        Some(serde_json::json!({ "holdId": hold_id })),
        Some(&body.reason),
    )
    .await?;
    tx.commit().await?;
    Ok(data(serde_json::json!({ "holdId": hold_id })))
}

async fn release_hold(
    State(state): State<ServiceState>,
    AdminActor(actor): AdminActor,
    Path((entity_type, entity_id)): Path<(String, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.store.begin().await?;
    let released = retention::release_hold(&mut tx, &entity_type, entity_id).await?;
    if released {
        audit::record(
            &mut tx,
            actor.subject_id(),
            "legal_hold.release",
            &entity_type,
            Some(entity_id),
            None,
            None,
            None,
        )
        .await?;
    }
    tx.commit().await?;
    Ok(data(serde_json::json!({ "released": released })))
}

async fn audit_trail(
    State(state): State<ServiceState>,
    AdminActor(_actor): AdminActor,
    Path((entity_type, entity_id)): Path<(String, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(audit::list_for_entity(&state.store, &entity_type, entity_id).await?))
}
