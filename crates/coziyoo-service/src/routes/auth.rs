//! Auth surface for both realms. App and admin endpoints are separate
//! routes over separate user tables and signing secrets.

use crate::extract::{AdminActor, AppActor, ClientIp};
use crate::{data, ApiError, ServiceState};
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use coziyoo_core::abuse::{self, AbuseFlow};
use coziyoo_core::identity::{self, RegisterRequest};
use coziyoo_core::types::Realm;
use serde::Deserialize;

pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/logout-all", post(logout_all))
        .route("/auth/me", get(me))
        .route("/auth/display-name/check", get(display_name_check))
        .route("/admin/auth/login", post(admin_login))
        .route("/admin/auth/refresh", post(admin_refresh))
        .route("/admin/auth/logout", post(admin_logout))
        .route("/admin/auth/me", get(admin_me))
}

async fn register(
    State(state): State<ServiceState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    abuse::gate(
        &state.store,
        AbuseFlow::Signup,
        ip.as_deref(),
        Some(body.email.as_str()),
    )
    .await?;

    let mut tx = state.store.begin().await?;
    let user = identity::register(&mut tx, &body).await?;
    tx.commit().await?;
    Ok(data(user))
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(
    State(state): State<ServiceState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<LoginBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    abuse::gate(
        &state.store,
        AbuseFlow::Login,
        ip.as_deref(),
        Some(body.email.as_str()),
    )
    .await?;
    let pair = identity::login(&state.store, &state.signer, Realm::App, &body.email, &body.password)
        .await?;
    Ok(data(pair))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    refresh_token: String,
}

async fn refresh(
    State(state): State<ServiceState>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pair = identity::refresh(&state.store, &state.signer, Realm::App, &body.refresh_token).await?;
    Ok(data(pair))
}

async fn logout(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let coziyoo_core::actor::Actor::App { session_id, .. } = actor {
        identity::logout(&state.store, session_id).await?;
    }
    Ok(data(serde_json::json!({ "loggedOut": true })))
}

async fn logout_all(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    let revoked = identity::logout_all(&state.store, Realm::App, actor.subject_id()).await?;
    Ok(data(serde_json::json!({ "revokedSessions": revoked })))
}

async fn me(
    State(state): State<ServiceState>,
    AppActor(actor): AppActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = identity::find_app_user(&state.store, actor.subject_id()).await?;
    Ok(data(user))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisplayNameQuery {
    display_name: String,
}

async fn display_name_check(
    State(state): State<ServiceState>,
    ClientIp(ip): ClientIp,
    Query(query): Query<DisplayNameQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    abuse::gate(&state.store, AbuseFlow::DisplayNameCheck, ip.as_deref(), None).await?;
    let available = identity::display_name_available(&state.store, &query.display_name).await?;
    Ok(data(serde_json::json!({ "available": available })))
}

async fn admin_login(
    State(state): State<ServiceState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<LoginBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    abuse::gate(
        &state.store,
        AbuseFlow::Login,
        ip.as_deref(),
        Some(body.email.as_str()),
    )
    .await?;
    let pair = identity::login(
        &state.store,
        &state.signer,
        Realm::Admin,
        &body.email,
        &body.password,
    )
    .await?;
    Ok(data(pair))
}

async fn admin_refresh(
    State(state): State<ServiceState>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pair =
        identity::refresh(&state.store, &state.signer, Realm::Admin, &body.refresh_token).await?;
    Ok(data(pair))
}

async fn admin_logout(
    State(state): State<ServiceState>,
    AdminActor(actor): AdminActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let coziyoo_core::actor::Actor::Admin { session_id, .. } = actor {
        identity::logout(&state.store, session_id).await?;
    }
    Ok(data(serde_json::json!({ "loggedOut": true })))
}

async fn admin_me(
    State(state): State<ServiceState>,
    AdminActor(actor): AdminActor,
) -> Result<Json<serde_json::Value>, ApiError> {
    let admin = identity::find_admin_user(&state.store, actor.subject_id()).await?;
    Ok(data(admin))
}
