//! Chat surface: order-scoped chats and their message feeds.

use crate::extract::AppActor;
use crate::{data, data_feed, ApiError, ServiceState};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use coziyoo_core::chat;
use coziyoo_core::pagination::{CursorQuery, FeedPage};
use serde::Deserialize;
use uuid::Uuid;

pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/chats", get(list_chats))
        .route("/orders/:id/chat", post(open_chat))
        .route("/chats/:id/messages", get(list_messages).post(send_message))
}

async fn list_chats(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(chat::list_chats(&state.store, actor.subject_id()).await?))
}

async fn open_chat(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(chat::open_for_order(&state.store, actor.subject_id(), order_id).await?))
}

async fn list_messages(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<CursorQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = FeedPage::parse(&query)?;
    let (messages, meta) =
        chat::list_messages(&state.store, actor.subject_id(), chat_id, &page).await?;
    Ok(data_feed(messages, meta))
}

#[derive(Deserialize)]
struct MessageBody {
    body: String,
}

async fn send_message(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(chat_id): Path<Uuid>,
    Json(body): Json<MessageBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let message =
        chat::append_message(&state.store, actor.subject_id(), chat_id, &body.body).await?;
    Ok(data(message))
}
