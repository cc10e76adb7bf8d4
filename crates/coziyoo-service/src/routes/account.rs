//! Account surface: addresses, notifications, media asset registry.

use crate::extract::AppActor;
use crate::{data, data_feed, ApiError, ServiceState};
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use coziyoo_core::notifications;
use coziyoo_core::pagination::{CursorQuery, FeedPage};
use coziyoo_core::users::{self, AddressInput, MediaAssetInput};
use uuid::Uuid;

pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/me", axum::routing::put(update_profile))
        .route("/me/deactivate", post(deactivate))
        .route("/me/addresses", get(list_addresses).post(create_address))
        .route("/me/addresses/:id", delete(delete_address))
        .route("/notifications", get(list_notifications))
        .route("/notifications/:id/read", post(mark_notification_read))
        .route("/media", post(register_media))
        .route("/media/:id", get(get_media))
}

async fn update_profile(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Json(body): Json<coziyoo_core::identity::ProfileUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(
        coziyoo_core::identity::update_profile(&state.store, actor.subject_id(), &body).await?,
    ))
}

async fn deactivate(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    coziyoo_core::identity::deactivate(&state.store, actor.subject_id()).await?;
    Ok(data(serde_json::json!({ "deactivated": true })))
}

async fn list_addresses(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(users::list_addresses(&state.store, actor.subject_id()).await?))
}

async fn create_address(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Json(body): Json<AddressInput>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(users::create_address(&state.store, actor.subject_id(), &body).await?))
}

async fn delete_address(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(address_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    users::delete_address(&state.store, actor.subject_id(), address_id).await?;
    Ok(data(serde_json::json!({ "deleted": true })))
}

async fn list_notifications(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Query(query): Query<CursorQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = FeedPage::parse(&query)?;
    let (items, meta) =
        notifications::list_for_user(&state.store, actor.subject_id(), &page).await?;
    Ok(data_feed(items, meta))
}

async fn mark_notification_read(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    notifications::mark_read(&state.store, actor.subject_id(), notification_id).await?;
    Ok(data(serde_json::json!({ "read": true })))
}

async fn register_media(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Json(body): Json<MediaAssetInput>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(users::register_media(&state.store, actor.subject_id(), &body).await?))
}

async fn get_media(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(media_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(users::fetch_media(&state.store, actor.subject_id(), media_id).await?))
}
