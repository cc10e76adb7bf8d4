//! Payment surface. The webhook consumes the raw body so the HMAC check
//! covers exactly the bytes the provider signed.

use crate::extract::{AppActor, ClientIp, IdempotencyKey};
use crate::{data, ApiError, ServiceState};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use coziyoo_core::abuse::{self, AbuseFlow};
use coziyoo_core::actor::require_role;
use coziyoo_core::idempotency::{self, IdempotencyScope};
use coziyoo_core::payments;
use coziyoo_core::types::ActorRole;
use coziyoo_core::CoreError;
use serde::Deserialize;
use std::collections::BTreeMap;
use uuid::Uuid;

pub const SIGNATURE_HEADER: &str = "x-provider-signature";

pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/payments/start", post(start))
        .route("/payments/return", get(payment_return))
        .route("/payments/webhook", post(webhook))
        .route("/payments/:order_id/status", get(status))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartBody {
    order_id: Uuid,
}

async fn start(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    ClientIp(ip): ClientIp,
    idem: IdempotencyKey,
    Json(body): Json<StartBody>,
) -> Result<Response, ApiError> {
    require_role(&actor, &[ActorRole::Buyer])?;
    let buyer_id = actor.subject_id();
    abuse::gate(
        &state.store,
        AbuseFlow::PaymentStart,
        ip.as_deref(),
        Some(&buyer_id.to_string()),
    )
    .await?;

    let key = idem.require()?;
    let request_hash = idempotency::digest_hex(
        &serde_json::to_vec(&serde_json::json!({ "orderId": body.order_id }))
            .map_err(CoreError::from)?,
    );

    let store = state.store.clone();
    let provider_base = state.config.payment_provider_base_url.clone();
    let order_id = body.order_id;
    super::orders::run_idempotent(
        &state,
        IdempotencyScope::PaymentStart,
        key,
        request_hash,
        move || async move {
            let session = payments::start_payment(&store, buyer_id, order_id, &provider_base).await?;
            serde_json::to_value(session).map_err(CoreError::from)
        },
    )
    .await
}

/// Informational browser redirect; records the query, never marks paid.
async fn payment_return(
    State(state): State<ServiceState>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session_id = query
        .get("sessionId")
        .or_else(|| query.get("session_id"))
        .cloned()
        .ok_or_else(|| CoreError::validation("sessionId query parameter is required", None))?;
    let query_json = serde_json::to_value(&query).map_err(CoreError::from)?;
    payments::record_return(&state.store, &session_id, &query_json).await?;
    Ok(data(serde_json::json!({ "recorded": true })))
}

async fn webhook(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    let ack = payments::handle_webhook(
        &state.store,
        &state.config.payment_webhook_secret,
        &body,
        signature,
    )
    .await?;
    Ok(data(ack).into_response())
}

async fn status(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let order = coziyoo_core::orders::fetch_order(&state.store, order_id).await?;
    if order.buyer_id != actor.subject_id() && order.seller_id != actor.subject_id() {
        return Err(ApiError(CoreError::domain(
            coziyoo_core::ErrorCode::ForbiddenOrderScope,
            "order belongs to another account",
        )));
    }
    let attempt = payments::payment_status(&state.store, order_id).await?;
    Ok(data(serde_json::json!({
        "orderStatus": order.status,
        "paymentCompleted": order.payment_completed,
        "attempt": attempt,
    })))
}
