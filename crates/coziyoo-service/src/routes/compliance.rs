//! Seller compliance surface.

use crate::extract::AppActor;
use crate::{data, ApiError, ServiceState};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use coziyoo_core::actor::require_role;
use coziyoo_core::compliance::{self, ProfileUpdate};
use coziyoo_core::identity;
use coziyoo_core::types::ActorRole;
use serde::Deserialize;

pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/seller/compliance/profile", get(get_profile).put(update_profile))
        .route("/seller/compliance/documents", post(add_document).get(list_documents))
        .route("/seller/compliance/checks", get(list_checks))
        .route("/seller/compliance/submit", post(submit))
}

async fn get_profile(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let seller = identity::find_app_user(&state.store, actor.subject_id()).await?;
    let profile = compliance::ensure_profile(&state.store, seller.id, &seller.country).await?;
    Ok(data(profile))
}

async fn update_profile(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Json(body): Json<ProfileUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let seller = identity::find_app_user(&state.store, actor.subject_id()).await?;
    compliance::ensure_profile(&state.store, seller.id, &seller.country).await?;
    let profile = compliance::update_profile(&state.store, seller.id, &body).await?;
    Ok(data(profile))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentBody {
    doc_type: String,
    storage_key: String,
    content_type: String,
}

async fn add_document(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Json(body): Json<DocumentBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let document = compliance::add_document(
        &state.store,
        actor.subject_id(),
        &body.doc_type,
        &body.storage_key,
        &body.content_type,
    )
    .await?;
    Ok(data(document))
}

async fn list_documents(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    Ok(data(compliance::list_documents(&state.store, actor.subject_id()).await?))
}

async fn list_checks(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    Ok(data(compliance::list_checks(&state.store, actor.subject_id()).await?))
}

async fn submit(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    Ok(data(compliance::submit(&state.store, actor.subject_id()).await?))
}
