//! Seller lot surface: create, list, adjust, recall, discard.

use crate::extract::AppActor;
use crate::{data, ApiError, ServiceState};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use coziyoo_core::actor::require_role;
use coziyoo_core::lots::{self, CreateLotRequest};
use coziyoo_core::types::ActorRole;
use serde::Deserialize;
use uuid::Uuid;

pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/seller/lots", post(create_lot).get(list_lots))
        .route("/seller/lots/:id/adjust", post(adjust_lot))
        .route("/seller/lots/:id/recall", post(recall_lot))
        .route("/seller/lots/:id/discard", post(discard_lot))
}

async fn create_lot(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Json(body): Json<CreateLotRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let mut tx = state.store.begin().await?;
    let lot = lots::create_lot(&mut tx, actor.subject_id(), &body).await?;
    tx.commit().await?;
    Ok(data(lot))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LotListQuery {
    food_id: Option<Uuid>,
}

async fn list_lots(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Query(query): Query<LotListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let lots = lots::list_seller_lots(&state.store, actor.subject_id(), query.food_id).await?;
    Ok(data(lots))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdjustBody {
    quantity_available: i32,
}

async fn adjust_lot(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(lot_id): Path<Uuid>,
    Json(body): Json<AdjustBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let mut tx = state.store.begin().await?;
    let lot = lots::adjust_lot(&mut tx, actor.subject_id(), lot_id, body.quantity_available).await?;
    tx.commit().await?;
    Ok(data(lot))
}

#[derive(Deserialize)]
struct RecallBody {
    reason: String,
}

async fn recall_lot(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(lot_id): Path<Uuid>,
    Json(body): Json<RecallBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let mut tx = state.store.begin().await?;
    let lot = lots::recall_lot(&mut tx, Some(actor.subject_id()), lot_id, &body.reason).await?;
    tx.commit().await?;
    Ok(data(lot))
}

async fn discard_lot(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(lot_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let mut tx = state.store.begin().await?;
    let lot = lots::discard_lot(&mut tx, actor.subject_id(), lot_id).await?;
    tx.commit().await?;
    Ok(data(lot))
}
