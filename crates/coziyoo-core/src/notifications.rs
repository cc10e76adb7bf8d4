//! In-app notification rows, written by the outbox notification handler and
//! listed per user with cursor pagination.

use crate::db::Store;
use crate::error::{CoreError, ErrorCode};
use crate::pagination::{feed_meta, Cursor, FeedMeta, FeedPage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Insert a notification row. The caller picks the id; outbox handlers pass
/// a deterministic id derived from the event so redelivery stays idempotent.
pub async fn publish(
    store: &Store,
    id: Uuid,
    user_id: Uuid,
    kind: &str,
    payload: &serde_json::Value,
) -> Result<Uuid, CoreError> {
    sqlx::query(
        r#"
        INSERT INTO notification_events (id, user_id, kind, payload, created_at)
        VALUES ($1, $2, $3, $4, now())
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(kind)
    .bind(payload)
    .execute(store.pool())
    .await?;
    Ok(id)
}

fn notification_from_row(row: &sqlx::postgres::PgRow) -> Result<Notification, CoreError> {
    Ok(Notification {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind: row.try_get("kind")?,
        payload: row.try_get("payload")?,
        read_at: row.try_get("read_at")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn list_for_user(
    store: &Store,
    user_id: Uuid,
    page: &FeedPage,
) -> Result<(Vec<Notification>, FeedMeta), CoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, user_id, kind, payload, read_at, created_at
        FROM notification_events
        WHERE user_id = $1
          AND ($2::timestamptz IS NULL OR (created_at, id) < ($2, $3))
        ORDER BY created_at DESC, id DESC
        LIMIT $4
        "#,
    )
    .bind(user_id)
    .bind(page.after.map(|c| c.created_at))
    .bind(page.after.map(|c| c.id))
    .bind(page.limit + 1)
    .fetch_all(store.pool())
    .await?;

    let fetched = rows.len();
    let mut items = rows
        .iter()
        .map(notification_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    items.truncate(page.limit as usize);

    let last = items.last().map(|item| Cursor {
        created_at: item.created_at,
        id: item.id,
    });
    Ok((items, feed_meta(page.limit, fetched, last)))
}

pub async fn mark_read(store: &Store, user_id: Uuid, notification_id: Uuid) -> Result<(), CoreError> {
    let result = sqlx::query(
        "UPDATE notification_events SET read_at = now() WHERE id = $1 AND user_id = $2 AND read_at IS NULL",
    )
    .bind(notification_id)
    .bind(user_id)
    .execute(store.pool())
    .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::not_found(
            ErrorCode::NotificationNotFound,
            "notification not found or already read",
        ));
    }
    Ok(())
}
