//! Profile surface owned by an app user: addresses, favorites, and the
//! media asset metadata registry.

use crate::db::Store;
use crate::error::{CoreError, ErrorCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAddress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub label: String,
    pub address: serde_json::Value,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInput {
    pub label: String,
    pub address: serde_json::Value,
    pub is_default: Option<bool>,
}

fn address_from_row(row: &sqlx::postgres::PgRow) -> Result<UserAddress, CoreError> {
    Ok(UserAddress {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        label: row.try_get("label")?,
        address: row.try_get("address")?,
        is_default: row.try_get("is_default")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn list_addresses(store: &Store, user_id: Uuid) -> Result<Vec<UserAddress>, CoreError> {
    let rows = sqlx::query(
        "SELECT id, user_id, label, address, is_default, created_at
         FROM user_addresses WHERE user_id = $1 ORDER BY is_default DESC, created_at DESC",
    )
    .bind(user_id)
    .fetch_all(store.pool())
    .await?;
    rows.iter().map(address_from_row).collect()
}

/// Create an address. Setting it default demotes the previous default in
/// the same transaction (the partial unique index allows only one).
pub async fn create_address(
    store: &Store,
    user_id: Uuid,
    input: &AddressInput,
) -> Result<UserAddress, CoreError> {
    if input.label.trim().is_empty() || !input.address.is_object() {
        return Err(CoreError::validation(
            "address body failed validation",
            Some(serde_json::json!({ "fields": ["label", "address"] })),
        ));
    }

    let mut tx = store.begin().await?;
    let make_default = input.is_default.unwrap_or(false);
    if make_default {
        sqlx::query("UPDATE user_addresses SET is_default = FALSE WHERE user_id = $1 AND is_default")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    }

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO user_addresses (id, user_id, label, address, is_default, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, now(), now())
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(input.label.trim())
    .bind(&input.address)
    .bind(make_default)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let row = sqlx::query(
        "SELECT id, user_id, label, address, is_default, created_at FROM user_addresses WHERE id = $1",
    )
    .bind(id)
    .fetch_one(store.pool())
    .await?;
    address_from_row(&row)
}

pub async fn delete_address(store: &Store, user_id: Uuid, address_id: Uuid) -> Result<(), CoreError> {
    let result = sqlx::query("DELETE FROM user_addresses WHERE id = $1 AND user_id = $2")
        .bind(address_id)
        .bind(user_id)
        .execute(store.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::not_found(ErrorCode::AddressNotFound, "address not found"));
    }
    Ok(())
}

/// Toggle a favorite; returns whether the food is now favorited. The
/// `favorite_count` cache moves with the row.
pub async fn toggle_favorite(store: &Store, user_id: Uuid, food_id: Uuid) -> Result<bool, CoreError> {
    let mut tx = store.begin().await?;
    let food = sqlx::query("SELECT 1 AS ok FROM foods WHERE id = $1 FOR UPDATE")
        .bind(food_id)
        .fetch_optional(&mut *tx)
        .await?;
    if food.is_none() {
        return Err(CoreError::not_found(ErrorCode::FoodNotFound, "food not found"));
    }

    let removed = sqlx::query("DELETE FROM favorites WHERE user_id = $1 AND food_id = $2")
        .bind(user_id)
        .bind(food_id)
        .execute(&mut *tx)
        .await?;

    let now_favorited = if removed.rows_affected() == 0 {
        sqlx::query("INSERT INTO favorites (user_id, food_id, created_at) VALUES ($1, $2, now())")
            .bind(user_id)
            .bind(food_id)
            .execute(&mut *tx)
            .await?;
        true
    } else {
        false
    };

    sqlx::query(
        "UPDATE foods SET favorite_count = (SELECT count(*) FROM favorites WHERE food_id = $1) WHERE id = $1",
    )
    .bind(food_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(now_favorited)
}

pub async fn list_favorites(store: &Store, user_id: Uuid) -> Result<Vec<Uuid>, CoreError> {
    let rows = sqlx::query(
        "SELECT food_id FROM favorites WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(store.pool())
    .await?;
    rows.iter()
        .map(|row| Ok(row.try_get::<Uuid, _>("food_id")?))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAsset {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: String,
    pub storage_key: String,
    pub content_type: String,
    pub byte_size: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAssetInput {
    pub kind: String,
    pub storage_key: String,
    pub content_type: String,
    pub byte_size: i64,
}

/// Register media metadata. Blob storage is an external concern; only the
/// pointer lives here.
pub async fn register_media(
    store: &Store,
    owner_id: Uuid,
    input: &MediaAssetInput,
) -> Result<MediaAsset, CoreError> {
    if input.storage_key.trim().is_empty() || input.byte_size <= 0 {
        return Err(CoreError::validation(
            "media body failed validation",
            Some(serde_json::json!({ "fields": ["storageKey", "byteSize"] })),
        ));
    }

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO media_assets (id, owner_id, kind, storage_key, content_type, byte_size, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, now())
        "#,
    )
    .bind(id)
    .bind(owner_id)
    .bind(&input.kind)
    .bind(input.storage_key.trim())
    .bind(&input.content_type)
    .bind(input.byte_size)
    .execute(store.pool())
    .await?;

    fetch_media(store, owner_id, id).await
}

pub async fn fetch_media(store: &Store, owner_id: Uuid, media_id: Uuid) -> Result<MediaAsset, CoreError> {
    let row = sqlx::query(
        "SELECT id, owner_id, kind, storage_key, content_type, byte_size, created_at
         FROM media_assets WHERE id = $1 AND owner_id = $2",
    )
    .bind(media_id)
    .bind(owner_id)
    .fetch_optional(store.pool())
    .await?
    .ok_or_else(|| CoreError::not_found(ErrorCode::MediaNotFound, "media asset not found"))?;

    Ok(MediaAsset {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        kind: row.try_get("kind")?,
        storage_key: row.try_get("storage_key")?,
        content_type: row.try_get("content_type")?,
        byte_size: row.try_get("byte_size")?,
        created_at: row.try_get("created_at")?,
    })
}
