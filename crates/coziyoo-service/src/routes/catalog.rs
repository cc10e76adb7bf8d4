//! Catalog surface: categories, food listings, reviews, favorites.

use crate::extract::AppActor;
use crate::{data, data_offset, ApiError, ServiceState};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use coziyoo_core::actor::require_role;
use coziyoo_core::catalog::{self, FoodFilter, FoodInput, FOOD_SORTS};
use coziyoo_core::identity;
use coziyoo_core::pagination::{OffsetPage, OffsetQuery};
use coziyoo_core::reviews::{self, ReviewInput};
use coziyoo_core::types::ActorRole;
use coziyoo_core::users;
use uuid::Uuid;

pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/categories", get(list_categories))
        .route("/foods", get(list_foods).post(create_food))
        .route("/foods/:id", get(get_food).put(update_food).delete(delete_food))
        .route("/foods/:id/reviews", get(list_reviews))
        .route("/foods/:id/favorite", post(toggle_favorite))
        .route("/favorites", get(list_favorites))
        .route("/reviews", post(create_review))
}

async fn list_categories(State(state): State<ServiceState>) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(catalog::list_categories(&state.store).await?))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct FoodListQuery {
    page: Option<i64>,
    page_size: Option<i64>,
    sort_by: Option<String>,
    sort_dir: Option<String>,
    category_id: Option<Uuid>,
    seller_id: Option<Uuid>,
    search: Option<String>,
    include_inactive: Option<bool>,
}

async fn list_foods(
    State(state): State<ServiceState>,
    Query(query): Query<FoodListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = OffsetPage::parse(
        &OffsetQuery {
            page: query.page,
            page_size: query.page_size,
            sort_by: query.sort_by.clone(),
            sort_dir: query.sort_dir.clone(),
        },
        FOOD_SORTS,
    )?;
    let filter = FoodFilter {
        category_id: query.category_id,
        seller_id: query.seller_id,
        search: query.search.clone(),
        include_inactive: query.include_inactive,
    };
    let (foods, meta) = catalog::list_foods(&state.store, &filter, &page).await?;
    Ok(data_offset(foods, meta))
}

async fn get_food(
    State(state): State<ServiceState>,
    Path(food_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(catalog::fetch_food(&state.store, food_id).await?))
}

async fn create_food(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Json(body): Json<FoodInput>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let seller = identity::find_app_user(&state.store, actor.subject_id()).await?;
    let food = catalog::create_food(&state.store, seller.id, &seller.country, &body).await?;
    Ok(data(food))
}

async fn update_food(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(food_id): Path<Uuid>,
    Json(body): Json<FoodInput>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    let seller = identity::find_app_user(&state.store, actor.subject_id()).await?;
    let food = catalog::update_food(&state.store, seller.id, &seller.country, food_id, &body).await?;
    Ok(data(food))
}

async fn delete_food(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(food_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Seller])?;
    catalog::deactivate_food(&state.store, actor.subject_id(), food_id).await?;
    Ok(data(serde_json::json!({ "deleted": true })))
}

async fn list_reviews(
    State(state): State<ServiceState>,
    Path(food_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(reviews::list_for_food(&state.store, food_id).await?))
}

async fn create_review(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Json(body): Json<ReviewInput>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&actor, &[ActorRole::Buyer])?;
    let review = reviews::create_review(&state.store, actor.subject_id(), &body).await?;
    Ok(data(review))
}

async fn toggle_favorite(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
    Path(food_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let favorited = users::toggle_favorite(&state.store, actor.subject_id(), food_id).await?;
    Ok(data(serde_json::json!({ "favorited": favorited })))
}

async fn list_favorites(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(users::list_favorites(&state.store, actor.subject_id()).await?))
}
