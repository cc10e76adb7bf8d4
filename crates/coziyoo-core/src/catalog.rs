//! Categories and food listings.
//!
//! `current_stock`, `rating`, `review_count`, and `favorite_count` on a food
//! are derived caches maintained by the lot, review, and favorite flows.
//! Listing activation consults the seller's compliance gate.

use crate::compliance;
use crate::db::Store;
use crate::error::{CoreError, ErrorCode};
use crate::pagination::{OffsetMeta, OffsetPage};
use crate::types::{new_short_id, Money};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Food {
    pub id: Uuid,
    pub short_id: String,
    pub seller_id: Uuid,
    pub category_id: Uuid,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub allergens: serde_json::Value,
    pub is_active: bool,
    pub rating: Decimal,
    pub review_count: i32,
    pub favorite_count: i32,
    pub current_stock: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodInput {
    pub category_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Money,
    pub allergens: Option<serde_json::Value>,
    pub is_active: Option<bool>,
}

pub const FOOD_SORTS: &[&str] = &["created_at", "price", "rating", "name"];

const FOOD_COLUMNS: &str = "id, short_id, seller_id, category_id, name, description, price, \
     allergens, is_active, rating, review_count, favorite_count, current_stock, created_at";

fn food_from_row(row: &sqlx::postgres::PgRow) -> Result<Food, CoreError> {
    Ok(Food {
        id: row.try_get("id")?,
        short_id: row.try_get("short_id")?,
        seller_id: row.try_get("seller_id")?,
        category_id: row.try_get("category_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: row.try_get("price")?,
        allergens: row.try_get("allergens")?,
        is_active: row.try_get("is_active")?,
        rating: row.try_get("rating")?,
        review_count: row.try_get("review_count")?,
        favorite_count: row.try_get("favorite_count")?,
        current_stock: row.try_get("current_stock")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn list_categories(store: &Store) -> Result<Vec<Category>, CoreError> {
    let rows = sqlx::query("SELECT id, name, sort_order FROM categories ORDER BY sort_order, name")
        .fetch_all(store.pool())
        .await?;
    rows.iter()
        .map(|row| {
            Ok(Category {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                sort_order: row.try_get("sort_order")?,
            })
        })
        .collect()
}

fn validate_food(input: &FoodInput) -> Result<(), CoreError> {
    let mut failed: Vec<&str> = Vec::new();
    if input.name.trim().len() < 2 {
        failed.push("name");
    }
    if input.price <= Decimal::ZERO {
        failed.push("price");
    }
    if let Some(allergens) = &input.allergens {
        if !allergens.is_array() {
            failed.push("allergens");
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(CoreError::validation(
            "food body failed validation",
            Some(serde_json::json!({ "fields": failed })),
        ))
    }
}

/// Sellers may keep drafts regardless of compliance, but activating a
/// listing requires the country gate to pass.
async fn check_activation_gate(
    store: &Store,
    seller_id: Uuid,
    country: &str,
    wants_active: bool,
) -> Result<(), CoreError> {
    if wants_active && !compliance::seller_operational(store, seller_id, country).await? {
        return Err(CoreError::domain(
            ErrorCode::ComplianceProfileRequired,
            "compliance requirements must be met before activating listings",
        ));
    }
    Ok(())
}

pub async fn create_food(
    store: &Store,
    seller_id: Uuid,
    seller_country: &str,
    input: &FoodInput,
) -> Result<Food, CoreError> {
    validate_food(input)?;
    let is_active = input.is_active.unwrap_or(false);
    check_activation_gate(store, seller_id, seller_country, is_active).await?;

    let category = sqlx::query("SELECT 1 AS ok FROM categories WHERE id = $1")
        .bind(input.category_id)
        .fetch_optional(store.pool())
        .await?;
    if category.is_none() {
        return Err(CoreError::not_found(ErrorCode::CategoryNotFound, "category not found"));
    }

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO foods (
            id, short_id, seller_id, category_id, name, description, price,
            allergens, is_active, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), now())
        "#,
    )
    .bind(id)
    .bind(new_short_id())
    .bind(seller_id)
    .bind(input.category_id)
    .bind(input.name.trim())
    .bind(input.description.clone().unwrap_or_default())
    .bind(input.price)
    .bind(input.allergens.clone().unwrap_or_else(|| serde_json::json!([])))
    .bind(is_active)
    .execute(store.pool())
    .await?;

    fetch_food(store, id).await
}

pub async fn fetch_food(store: &Store, food_id: Uuid) -> Result<Food, CoreError> {
    let query = format!("SELECT {FOOD_COLUMNS} FROM foods WHERE id = $1");
    let row = sqlx::query(&query)
        .bind(food_id)
        .fetch_optional(store.pool())
        .await?
        .ok_or_else(|| CoreError::not_found(ErrorCode::FoodNotFound, "food not found"))?;
    food_from_row(&row)
}

pub async fn update_food(
    store: &Store,
    seller_id: Uuid,
    seller_country: &str,
    food_id: Uuid,
    input: &FoodInput,
) -> Result<Food, CoreError> {
    validate_food(input)?;
    let existing = fetch_food(store, food_id).await?;
    if existing.seller_id != seller_id {
        return Err(CoreError::domain(
            ErrorCode::ForbiddenResourceScope,
            "food belongs to another seller",
        ));
    }
    let is_active = input.is_active.unwrap_or(existing.is_active);
    check_activation_gate(store, seller_id, seller_country, is_active).await?;

    sqlx::query(
        r#"
        UPDATE foods
        SET category_id = $2, name = $3, description = $4, price = $5,
            allergens = $6, is_active = $7, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(food_id)
    .bind(input.category_id)
    .bind(input.name.trim())
    .bind(
        input
            .description
            .clone()
            .unwrap_or_else(|| existing.description.clone()),
    )
    .bind(input.price)
    .bind(
        input
            .allergens
            .clone()
            .unwrap_or_else(|| existing.allergens.clone()),
    )
    .bind(is_active)
    .execute(store.pool())
    .await?;

    fetch_food(store, food_id).await
}

/// Soft delete: deactivate. Order history keeps pointing at the row.
pub async fn deactivate_food(store: &Store, seller_id: Uuid, food_id: Uuid) -> Result<(), CoreError> {
    let result = sqlx::query(
        "UPDATE foods SET is_active = FALSE, updated_at = now() WHERE id = $1 AND seller_id = $2",
    )
    .bind(food_id)
    .bind(seller_id)
    .execute(store.pool())
    .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::not_found(
            ErrorCode::FoodNotFound,
            "food not found for this seller",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodFilter {
    pub category_id: Option<Uuid>,
    pub seller_id: Option<Uuid>,
    pub search: Option<String>,
    pub include_inactive: Option<bool>,
}

pub async fn list_foods(
    store: &Store,
    filter: &FoodFilter,
    page: &OffsetPage,
) -> Result<(Vec<Food>, OffsetMeta), CoreError> {
    let include_inactive = filter.include_inactive.unwrap_or(false);
    let search = filter.search.as_ref().map(|s| format!("%{}%", s.trim()));

    let total_row = sqlx::query(
        r#"
        SELECT count(*) AS total FROM foods
        WHERE ($1::uuid IS NULL OR category_id = $1)
          AND ($2::uuid IS NULL OR seller_id = $2)
          AND ($3::text IS NULL OR name ILIKE $3)
          AND ($4 OR is_active)
        "#,
    )
    .bind(filter.category_id)
    .bind(filter.seller_id)
    .bind(&search)
    .bind(include_inactive)
    .fetch_one(store.pool())
    .await?;
    let total: i64 = total_row.try_get("total")?;

    let query = format!(
        r#"
        SELECT {FOOD_COLUMNS} FROM foods
        WHERE ($1::uuid IS NULL OR category_id = $1)
          AND ($2::uuid IS NULL OR seller_id = $2)
          AND ($3::text IS NULL OR name ILIKE $3)
          AND ($4 OR is_active)
        {}
        LIMIT $5 OFFSET $6
        "#,
        page.order_clause()
    );
    let rows = sqlx::query(&query)
        .bind(filter.category_id)
        .bind(filter.seller_id)
        .bind(&search)
        .bind(include_inactive)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(store.pool())
        .await?;

    let foods = rows.iter().map(food_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok((foods, page.meta(total)))
}
