//! Verified-purchase reviews. A buyer may review a food once per completed
//! order of theirs containing that food; the unique key (buyer, food, order)
//! is enforced by the database and surfaced as `REVIEW_CONFLICT`. The food's
//! rating aggregates move in the same transaction.

use crate::db::Store;
use crate::error::{unique_violation, CoreError, ErrorCode};
use crate::types::OrderStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub food_id: Uuid,
    pub order_id: Uuid,
    pub rating: i32,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewInput {
    pub food_id: Uuid,
    pub order_id: Uuid,
    pub rating: i32,
    pub body: Option<String>,
}

pub async fn create_review(
    store: &Store,
    buyer_id: Uuid,
    input: &ReviewInput,
) -> Result<Review, CoreError> {
    if !(1..=5).contains(&input.rating) {
        return Err(CoreError::validation(
            "rating must be within 1..=5",
            Some(serde_json::json!({ "fields": ["rating"] })),
        ));
    }

    let mut tx = store.begin().await?;

    // Verified purchase: the order is the buyer's, completed, and contains
    // the food being reviewed.
    let eligible = sqlx::query(
        r#"
        SELECT 1 AS ok
        FROM orders o
        JOIN order_items oi ON oi.order_id = o.id
        WHERE o.id = $1 AND o.buyer_id = $2 AND o.status = $3 AND oi.food_id = $4
        LIMIT 1
        "#,
    )
    .bind(input.order_id)
    .bind(buyer_id)
    .bind(OrderStatus::Completed.as_str())
    .bind(input.food_id)
    .fetch_optional(&mut *tx)
    .await?;
    if eligible.is_none() {
        return Err(CoreError::domain(
            ErrorCode::ForbiddenOrderScope,
            "reviews require a completed order containing this food",
        ));
    }

    let id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT INTO reviews (id, buyer_id, food_id, order_id, rating, body, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, now())
        "#,
    )
    .bind(id)
    .bind(buyer_id)
    .bind(input.food_id)
    .bind(input.order_id)
    .bind(input.rating)
    .bind(input.body.clone().unwrap_or_default())
    .execute(&mut *tx)
    .await;

    if let Err(err) = inserted {
        return match unique_violation(&err) {
            Some(_) => Err(CoreError::domain(
                ErrorCode::ReviewConflict,
                "this order already carries a review for this food",
            )),
            None => Err(err.into()),
        };
    }

    sqlx::query(
        r#"
        UPDATE foods
        SET rating = COALESCE((SELECT ROUND(AVG(rating)::numeric, 2) FROM reviews WHERE food_id = $1), 0),
            review_count = (SELECT count(*) FROM reviews WHERE food_id = $1),
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(input.food_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let row = sqlx::query(
        "SELECT id, buyer_id, food_id, order_id, rating, body, created_at FROM reviews WHERE id = $1",
    )
    .bind(id)
    .fetch_one(store.pool())
    .await?;
    review_from_row(&row)
}

fn review_from_row(row: &sqlx::postgres::PgRow) -> Result<Review, CoreError> {
    Ok(Review {
        id: row.try_get("id")?,
        buyer_id: row.try_get("buyer_id")?,
        food_id: row.try_get("food_id")?,
        order_id: row.try_get("order_id")?,
        rating: row.try_get("rating")?,
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn list_for_food(store: &Store, food_id: Uuid) -> Result<Vec<Review>, CoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, buyer_id, food_id, order_id, rating, body, created_at
        FROM reviews WHERE food_id = $1
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(food_id)
    .fetch_all(store.pool())
    .await?;
    rows.iter().map(review_from_row).collect()
}
