//! Seller-facing finance surface: summary, per-order finance, adjustments.

use crate::extract::AppActor;
use crate::{data, ApiError, ServiceState};
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use coziyoo_core::actor::require_role;
use coziyoo_core::finance;
use coziyoo_core::types::ActorRole;
use coziyoo_core::{CoreError, ErrorCode};
use sqlx::Row;
use uuid::Uuid;

pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/seller/finance/summary", get(summary))
        .route("/seller/finance/orders/:order_id", get(order_finance))
        .route("/seller/finance/adjustments", get(adjustments))
}

async fn summary(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    Ok(data(finance::seller_summary(&state.store, actor.subject_id()).await?))
}

async fn order_finance(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let finance = finance::order_finance(&state.store, order_id)
        .await?
        .filter(|row| row.seller_id == actor.subject_id())
        .ok_or_else(|| {
            CoreError::not_found(ErrorCode::OrderNotFound, "no finance row for this order")
        })?;
    Ok(data(finance))
}

async fn adjustments(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let rows = sqlx::query(
        r#"
        SELECT id, order_id, dispute_case_id, amount, reason_code, note, created_at
        FROM finance_adjustments
        WHERE seller_id = $1
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(actor.subject_id())
    .fetch_all(state.store.pool())
    .await
    .map_err(CoreError::from)?;

    let items: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            Ok::<_, CoreError>(serde_json::json!({
                "id": row.try_get::<Uuid, _>("id")?,
                "orderId": row.try_get::<Option<Uuid>, _>("order_id")?,
                "disputeCaseId": row.try_get::<Option<Uuid>, _>("dispute_case_id")?,
                "amount": row.try_get::<rust_decimal::Decimal, _>("amount")?,
                "reasonCode": row.try_get::<String, _>("reason_code")?,
                "note": row.try_get::<Option<String>, _>("note")?,
                "createdAt": row.try_get::<chrono::DateTime<chrono::Utc>, _>("created_at")?,
            }))
        })
        .collect::<Result<_, _>>()?;
    Ok(data(items))
}
