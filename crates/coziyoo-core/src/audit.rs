//! Immutable record of admin mutations. One row per admin action, written in
//! the same transaction as the mutation it describes.

use crate::db::{Store, Tx};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub admin_id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[allow(clippy::too_many_arguments)]
pub async fn record(
    tx: &mut Tx<'_>,
    admin_id: Uuid,
    action: &str,
    entity_type: &str,
    entity_id: Option<Uuid>,
    before_state: Option<serde_json::Value>,
    after_state: Option<serde_json::Value>,
    reason: Option<&str>,
) -> Result<Uuid, CoreError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO admin_audit_logs (
            id, admin_id, action, entity_type, entity_id,
            before_state, after_state, reason, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
        "#,
    )
    .bind(id)
    .bind(admin_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(before_state)
    .bind(after_state)
    .bind(reason)
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

pub async fn list_for_entity(
    store: &Store,
    entity_type: &str,
    entity_id: Uuid,
) -> Result<Vec<AuditEntry>, CoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, admin_id, action, entity_type, entity_id,
               before_state, after_state, reason, created_at
        FROM admin_audit_logs
        WHERE entity_type = $1 AND entity_id = $2
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(entity_type)
    .bind(entity_id)
    .fetch_all(store.pool())
    .await?;

    rows.iter()
        .map(|row| {
            Ok(AuditEntry {
                id: row.try_get("id")?,
                admin_id: row.try_get("admin_id")?,
                action: row.try_get("action")?,
                entity_type: row.try_get("entity_type")?,
                entity_id: row.try_get("entity_id")?,
                before_state: row.try_get("before_state")?,
                after_state: row.try_get("after_state")?,
                reason: row.try_get("reason")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}
