//! Order surface: creation (idempotent), the buyer/seller feed, lifecycle
//! transitions, disclosures, delivery proof, and refund requests.

use crate::extract::{AppActor, ClientIp, IdempotencyKey};
use crate::{data, data_feed, ApiError, ServiceState};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use coziyoo_core::abuse::{self, AbuseFlow};
use coziyoo_core::actor::require_role;
use coziyoo_core::delivery;
use coziyoo_core::disclosure;
use coziyoo_core::disputes;
use coziyoo_core::idempotency::{self, IdempotencyScope, Replay};
use coziyoo_core::orders::{self, CreateOrderRequest, Driver};
use coziyoo_core::pagination::{CursorQuery, FeedPage};
use coziyoo_core::types::{ActorRole, DisclosurePhase, OrderStatus, Realm};
use coziyoo_core::CoreError;
use serde::Deserialize;
use uuid::Uuid;

pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/events", get(get_order_events))
        .route("/orders/:id/approve", post(approve_order))
        .route("/orders/:id/reject", post(reject_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/status", post(advance_order))
        .route("/orders/:id/complete", post(complete_order))
        .route("/orders/:id/refund-request", post(refund_request))
        .route("/orders/:id/disclosures", post(record_disclosure).get(list_disclosures))
        .route("/orders/:id/delivery-pin", post(issue_pin))
        .route("/orders/:id/delivery-pin/verify", post(verify_pin))
        .route("/orders/:id/delivery-proof", get(get_delivery_proof))
        .route("/orders/:id/disputes", get(list_order_disputes))
}

/// Run a monetary operation under an idempotency key: replay returns the
/// cached envelope, a fresh run records it, a failed run releases the key.
pub(crate) async fn run_idempotent<F, Fut>(
    state: &ServiceState,
    scope: IdempotencyScope,
    key: String,
    request_hash: String,
    op: F,
) -> Result<Response, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<serde_json::Value, CoreError>>,
{
    match idempotency::check(&state.store, scope, &key, &request_hash).await? {
        Replay::Cached(cached) => {
            let status = StatusCode::from_u16(cached.status as u16)
                .unwrap_or(StatusCode::OK);
            return Ok((status, Json(cached.body)).into_response());
        }
        Replay::Fresh => {}
    }
    idempotency::reserve(&state.store, scope, &key, &request_hash).await?;

    match op().await {
        Ok(payload) => {
            let envelope = serde_json::json!({ "data": payload });
            idempotency::record(&state.store, scope, &key, 200, &envelope).await?;
            Ok((StatusCode::OK, Json(envelope)).into_response())
        }
        Err(err) => {
            idempotency::release(&state.store, scope, &key).await?;
            Err(err.into())
        }
    }
}

async fn create_order(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    ClientIp(ip): ClientIp,
    idem: IdempotencyKey,
    Json(body): Json<CreateOrderRequest>,
) -> Result<Response, ApiError> {
    require_role(&actor, &[ActorRole::Buyer])?;
    let buyer_id = actor.subject_id();
    abuse::gate(
        &state.store,
        AbuseFlow::OrderCreate,
        ip.as_deref(),
        Some(&buyer_id.to_string()),
    )
    .await?;

    let key = idem.require()?;
    let request_hash = idempotency::digest_hex(&serde_json::to_vec(&serde_json::json!({
        "items": body.items.iter().map(|i| (i.food_id, i.quantity)).collect::<Vec<_>>(),
        "deliveryType": body.delivery_type,
        "deliveryAddress": body.delivery_address,
    })).map_err(CoreError::from)?);

    let store = state.store.clone();
    run_idempotent(&state, IdempotencyScope::OrderCreate, key, request_hash, move || async move {
        let order = orders::create_order(&store, buyer_id, &body).await?;
        serde_json::to_value(order).map_err(CoreError::from)
    })
    .await
}

async fn list_orders(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Query(query): Query<CursorQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = FeedPage::parse(&query)?;
    let role = actor.app_role().unwrap_or(ActorRole::Buyer);
    let (orders, meta) = orders::list_for_user(&state.store, actor.subject_id(), role, &page).await?;
    Ok(data_feed(orders, meta))
}

async fn load_scoped_order(
    state: &ServiceState,
    actor_id: Uuid,
    order_id: Uuid,
) -> Result<orders::Order, ApiError> {
    let order = orders::fetch_order(&state.store, order_id).await?;
    if order.buyer_id != actor_id && order.seller_id != actor_id {
        return Err(ApiError(CoreError::domain(
            coziyoo_core::ErrorCode::ForbiddenOrderScope,
            "order belongs to another account",
        )));
    }
    Ok(order)
}

async fn get_order(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let order = load_scoped_order(&state, actor.subject_id(), order_id).await?;
    let items = orders::fetch_items(&state.store, order_id).await?;
    Ok(data(serde_json::json!({ "order": order, "items": items })))
}

async fn get_order_events(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    load_scoped_order(&state, actor.subject_id(), order_id).await?;
    Ok(data(orders::order_events(&state.store, order_id).await?))
}

async fn approve_order(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let order = orders::approve(&state.store, actor.subject_id(), order_id).await?;
    Ok(data(order))
}

#[derive(Deserialize)]
struct ReasonBody {
    reason: Option<String>,
}

async fn reject_order(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(order_id): Path<Uuid>,
    body: Option<Json<ReasonBody>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let reason = body.as_ref().and_then(|b| b.reason.as_deref());
    let order = orders::reject(&state.store, actor.subject_id(), order_id, reason).await?;
    Ok(data(order))
}

async fn cancel_order(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(order_id): Path<Uuid>,
    body: Option<Json<ReasonBody>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Buyer])?;
    let reason = body.as_ref().and_then(|b| b.reason.as_deref());
    let order = orders::cancel(
        &state.store,
        Driver::Buyer,
        Realm::App,
        actor.subject_id(),
        order_id,
        reason,
    )
    .await?;
    Ok(data(order))
}

#[derive(Deserialize)]
struct AdvanceBody {
    status: String,
}

async fn advance_order(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(order_id): Path<Uuid>,
    Json(body): Json<AdvanceBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let to = OrderStatus::parse(&body.status).map_err(|_| {
        CoreError::validation(
            "unknown target status",
            Some(serde_json::json!({ "fields": ["status"] })),
        )
    })?;
    let order = orders::advance(&state.store, actor.subject_id(), order_id, to).await?;
    Ok(data(order))
}

async fn complete_order(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Buyer])?;
    let order = orders::complete(
        &state.store,
        Driver::Buyer,
        Realm::App,
        actor.subject_id(),
        order_id,
        None,
    )
    .await?;
    Ok(data(order))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefundBody {
    reason_code: String,
    note: Option<String>,
}

async fn refund_request(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    ClientIp(ip): ClientIp,
    idem: IdempotencyKey,
    Path(order_id): Path<Uuid>,
    Json(body): Json<RefundBody>,
) -> Result<Response, ApiError> {
    require_role(&actor, &[ActorRole::Buyer])?;
    let buyer_id = actor.subject_id();
    abuse::gate(
        &state.store,
        AbuseFlow::RefundRequest,
        ip.as_deref(),
        Some(&buyer_id.to_string()),
    )
    .await?;

    let key = idem.require()?;
    let request_hash = idempotency::digest_hex(
        &serde_json::to_vec(&serde_json::json!({
            "orderId": order_id,
            "reasonCode": body.reason_code,
            "note": body.note,
        }))
        .map_err(CoreError::from)?,
    );

    let store = state.store.clone();
    run_idempotent(&state, IdempotencyScope::RefundRequest, key, request_hash, move || async move {
        let case =
            disputes::request_refund(&store, buyer_id, order_id, &body.reason_code, body.note.as_deref())
                .await?;
        serde_json::to_value(case).map_err(CoreError::from)
    })
    .await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisclosureBody {
    phase: DisclosurePhase,
    allergens: serde_json::Value,
    confirmation_method: String,
}

async fn record_disclosure(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(order_id): Path<Uuid>,
    Json(body): Json<DisclosureBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = disclosure::record(
        &state.store,
        actor.subject_id(),
        order_id,
        body.phase,
        &body.allergens,
        &body.confirmation_method,
    )
    .await?;
    Ok(data(record))
}

async fn list_disclosures(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    load_scoped_order(&state, actor.subject_id(), order_id).await?;
    Ok(data(disclosure::list_for_order(&state.store, order_id).await?))
}

async fn issue_pin(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let (proof, _pin) = delivery::issue_pin(&state.store, actor.subject_id(), order_id).await?;
    // The clear PIN reaches the buyer through the notification fan-out only.
    Ok(data(proof))
}

#[derive(Deserialize)]
struct VerifyPinBody {
    pin: String,
}

async fn verify_pin(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    ClientIp(ip): ClientIp,
    Path(order_id): Path<Uuid>,
    Json(body): Json<VerifyPinBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    abuse::gate(
        &state.store,
        AbuseFlow::PinVerify,
        ip.as_deref(),
        Some(&order_id.to_string()),
    )
    .await?;
    let proof = delivery::verify_pin(&state.store, actor.subject_id(), order_id, &body.pin).await?;
    Ok(data(proof))
}

async fn get_delivery_proof(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    load_scoped_order(&state, actor.subject_id(), order_id).await?;
    let proof = delivery::fetch(&state.store, order_id).await?.ok_or_else(|| {
        CoreError::not_found(
            coziyoo_core::ErrorCode::DeliveryProofNotFound,
            "no delivery PIN issued",
        )
    })?;
    Ok(data(proof))
}

async fn list_order_disputes(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    load_scoped_order(&state, actor.subject_id(), order_id).await?;
    Ok(data(disputes::cases_for_order(&state.store, order_id).await?))
}
