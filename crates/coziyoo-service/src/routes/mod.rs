//! `/v1` route table. Each module owns one domain surface; handlers stay
//! thin and call into `coziyoo-core`.

pub mod account;
pub mod admin;
pub mod agent;
pub mod auth;
pub mod catalog;
pub mod chat;
pub mod compliance;
pub mod finance;
pub mod lots;
pub mod orders;
pub mod payments;

use crate::{data, ServiceState};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

pub fn v1_router() -> Router<ServiceState> {
    Router::new()
        .route("/health", get(health))
        .merge(auth::router())
        .merge(account::router())
        .merge(catalog::router())
        .merge(orders::router())
        .merge(payments::router())
        .merge(lots::router())
        .merge(compliance::router())
        .merge(chat::router())
        .merge(finance::router())
        .merge(agent::router())
        .merge(admin::router())
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    service: &'static str,
}

async fn health() -> Json<serde_json::Value> {
    data(Health {
        status: "ok",
        service: "coziyoo-service",
    })
}
