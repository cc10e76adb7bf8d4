//! Order-scoped chat. One chat per order between its buyer and seller;
//! messages are an append-only log served through cursor pagination.

use crate::db::Store;
use crate::error::{CoreError, ErrorCode};
use crate::orders;
use crate::pagination::{feed_meta, Cursor, FeedMeta, FeedPage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    pub order_id: Option<Uuid>,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

fn chat_from_row(row: &sqlx::postgres::PgRow) -> Result<Chat, CoreError> {
    Ok(Chat {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        buyer_id: row.try_get("buyer_id")?,
        seller_id: row.try_get("seller_id")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Open (or return) the chat for an order. Only the two participants may.
pub async fn open_for_order(store: &Store, user_id: Uuid, order_id: Uuid) -> Result<Chat, CoreError> {
    let order = orders::fetch_order(store, order_id).await?;
    if user_id != order.buyer_id && user_id != order.seller_id {
        return Err(CoreError::domain(
            ErrorCode::ForbiddenOrderScope,
            "only order participants may chat",
        ));
    }

    sqlx::query(
        r#"
        INSERT INTO chats (id, order_id, buyer_id, seller_id, created_at)
        VALUES ($1, $2, $3, $4, now())
        ON CONFLICT (order_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(order_id)
    .bind(order.buyer_id)
    .bind(order.seller_id)
    .execute(store.pool())
    .await?;

    let row = sqlx::query(
        "SELECT id, order_id, buyer_id, seller_id, created_at FROM chats WHERE order_id = $1",
    )
    .bind(order_id)
    .fetch_optional(store.pool())
    .await?
    .ok_or_else(|| CoreError::not_found(ErrorCode::ChatNotFound, "chat not found"))?;
    chat_from_row(&row)
}

async fn chat_for_participant(store: &Store, user_id: Uuid, chat_id: Uuid) -> Result<Chat, CoreError> {
    let row = sqlx::query(
        "SELECT id, order_id, buyer_id, seller_id, created_at FROM chats WHERE id = $1",
    )
    .bind(chat_id)
    .fetch_optional(store.pool())
    .await?
    .ok_or_else(|| CoreError::not_found(ErrorCode::ChatNotFound, "chat not found"))?;
    let chat = chat_from_row(&row)?;
    if user_id != chat.buyer_id && user_id != chat.seller_id {
        return Err(CoreError::domain(
            ErrorCode::ForbiddenResourceScope,
            "not a participant of this chat",
        ));
    }
    Ok(chat)
}

pub async fn append_message(
    store: &Store,
    user_id: Uuid,
    chat_id: Uuid,
    body: &str,
) -> Result<Message, CoreError> {
    let body = body.trim();
    if body.is_empty() || body.len() > 4000 {
        return Err(CoreError::validation(
            "message body must be 1..=4000 chars",
            Some(serde_json::json!({ "fields": ["body"] })),
        ));
    }
    chat_for_participant(store, user_id, chat_id).await?;

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO messages (id, chat_id, sender_id, body, created_at) VALUES ($1, $2, $3, $4, now())",
    )
    .bind(id)
    .bind(chat_id)
    .bind(user_id)
    .bind(body)
    .execute(store.pool())
    .await?;

    let row = sqlx::query(
        "SELECT id, chat_id, sender_id, body, created_at FROM messages WHERE id = $1",
    )
    .bind(id)
    .fetch_one(store.pool())
    .await?;
    Ok(Message {
        id: row.try_get("id")?,
        chat_id: row.try_get("chat_id")?,
        sender_id: row.try_get("sender_id")?,
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Newest-first message feed with keyset pagination.
pub async fn list_messages(
    store: &Store,
    user_id: Uuid,
    chat_id: Uuid,
    page: &FeedPage,
) -> Result<(Vec<Message>, FeedMeta), CoreError> {
    chat_for_participant(store, user_id, chat_id).await?;

    let rows = sqlx::query(
        r#"
        SELECT id, chat_id, sender_id, body, created_at
        FROM messages
        WHERE chat_id = $1
          AND ($2::timestamptz IS NULL OR (created_at, id) < ($2, $3))
        ORDER BY created_at DESC, id DESC
        LIMIT $4
        "#,
    )
    .bind(chat_id)
    .bind(page.after.map(|c| c.created_at))
    .bind(page.after.map(|c| c.id))
    .bind(page.limit + 1)
    .fetch_all(store.pool())
    .await?;

    let fetched = rows.len();
    let mut messages: Vec<Message> = rows
        .iter()
        .map(|row| {
            Ok::<_, CoreError>(Message {
                id: row.try_get("id")?,
                chat_id: row.try_get("chat_id")?,
                sender_id: row.try_get("sender_id")?,
                body: row.try_get("body")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect::<Result<_, _>>()?;
    messages.truncate(page.limit as usize);

    let last = messages.last().map(|message| Cursor {
        created_at: message.created_at,
        id: message.id,
    });
    Ok((messages, feed_meta(page.limit, fetched, last)))
}

pub async fn list_chats(store: &Store, user_id: Uuid) -> Result<Vec<Chat>, CoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, order_id, buyer_id, seller_id, created_at
        FROM chats WHERE buyer_id = $1 OR seller_id = $1
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(store.pool())
    .await?;
    rows.iter().map(chat_from_row).collect()
}
