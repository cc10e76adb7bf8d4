//! Voice-agent glue: LiveKit token minting for app users and the dispatch
//! RPC, which is protected by the agent runtime's shared secret instead of
//! a user session.

use crate::extract::AppActor;
use crate::{data, ApiError, ServiceState};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use coziyoo_adapters::{mint_room_token, DispatchRequest, RoomTokenRequest};
use coziyoo_core::{CoreError, ErrorCode};
use serde::Deserialize;

pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/agent/token", post(mint_token))
        .route("/agent/dispatch", post(dispatch))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBody {
    room_name: String,
    participant_name: Option<String>,
}

async fn mint_token(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Json(body): Json<TokenBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.room_name.trim().is_empty() {
        return Err(ApiError(CoreError::validation(
            "roomName is required",
            Some(serde_json::json!({ "fields": ["roomName"] })),
        )));
    }
    let token = mint_room_token(
        &state.config.livekit_api_key,
        &state.config.livekit_api_secret,
        &RoomTokenRequest {
            room_name: body.room_name.clone(),
            participant_identity: actor.subject_id().to_string(),
            participant_name: body.participant_name,
        },
    )?;
    Ok(data(serde_json::json!({
        "token": token,
        "wsUrl": state.config.livekit_ws_url,
        "roomName": body.room_name,
    })))
}

async fn dispatch(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(body): Json<DispatchRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let presented = headers
        .get("x-agent-secret")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if presented != state.config.agent_runtime_secret {
        return Err(ApiError(CoreError::domain(
            ErrorCode::Unauthorized,
            "agent shared secret required",
        )));
    }
    let response = state.dispatch.dispatch(&body).await?;
    Ok(data(response))
}
