//! Router-level tests over paths that never reach the database: the health
//! probe, version fallback, auth gating, and webhook signature rejection.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use coziyoo_adapters::AgentDispatchClient;
use coziyoo_core::identity::TokenSigner;
use coziyoo_core::{AppConfig, Store};
use coziyoo_service::{build_router, ServiceState};
use std::sync::Arc;
use tower::ServiceExt;

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://127.0.0.1:1/coziyoo_unreachable".into(),
        db_max_connections: 2,
        db_connect_timeout_secs: 1,
        app_jwt_secret: "app-secret-0123456789-0123456789-ok".into(),
        admin_jwt_secret: "adm-secret-0123456789-0123456789-ok".into(),
        access_token_ttl_secs: 900,
        refresh_token_ttl_secs: 2_592_000,
        payment_webhook_secret: "whsec_test_0123456789".into(),
        payment_provider_base_url: "https://pay.example.test".into(),
        agent_runtime_url: "http://127.0.0.1:1".into(),
        agent_runtime_secret: "agent-shared-secret".into(),
        livekit_api_key: "lk_key".into(),
        livekit_api_secret: "lk-secret-0123456789-0123456789-ok".into(),
        livekit_ws_url: "wss://livekit.example.test".into(),
        retention_days: 730,
        approval_expiry_hours: 24,
        payment_expiry_hours: 1,
        auto_complete_hours: 24,
    }
}

fn test_state() -> ServiceState {
    let config = test_config();
    config.validate().unwrap();
    let store = Store::connect_lazy(&config).unwrap();
    let signer = TokenSigner::from_config(&config);
    let dispatch = AgentDispatchClient::new(
        config.agent_runtime_url.clone(),
        config.agent_runtime_secret.clone(),
    )
    .unwrap();
    ServiceState {
        store,
        config: Arc::new(config),
        signer: Arc::new(signer),
        dispatch: Arc::new(dispatch),
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_returns_data_envelope() {
    let app = build_router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/v1/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["service"], "coziyoo-service");
}

#[tokio::test]
async fn non_v1_paths_are_version_unsupported() {
    let app = build_router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/v2/orders").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "API_VERSION_UNSUPPORTED");
}

#[tokio::test]
async fn unknown_v1_path_is_not_found() {
    let app = build_router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/v1/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_bearer_is_unauthorized() {
    let app = build_router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/v1/orders").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn garbage_bearer_is_token_invalid() {
    let app = build_router(test_state());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/orders")
                .header("authorization", "Bearer not.a.token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "TOKEN_INVALID");
}

#[tokio::test]
async fn app_tokens_do_not_open_admin_endpoints() {
    let state = test_state();
    let (token, _) = state
        .signer
        .mint_access(
            coziyoo_core::types::Realm::App,
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            "both",
        )
        .unwrap();

    let app = build_router(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/admin/orders")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Signed with the app secret, rejected by the admin realm.
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "TOKEN_INVALID");
}

#[tokio::test]
async fn webhook_rejects_bad_signature_without_touching_state() {
    let app = build_router(test_state());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/payments/webhook")
                .header("x-provider-signature", "00")
                .header("content-type", "application/json")
                .body(Body::from("arbitrary bytes"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "WEBHOOK_SIGNATURE_INVALID");
}

#[tokio::test]
async fn agent_dispatch_requires_shared_secret() {
    let app = build_router(test_state());
    let payload = serde_json::json!({
        "roomName": "order-1",
        "participantIdentity": "buyer-1",
        "token": "tok",
        "wsUrl": "wss://livekit.example.test",
        "payload": {},
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/agent/dispatch")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn unknown_actor_role_is_rejected() {
    let state = test_state();
    let (token, _) = state
        .signer
        .mint_access(
            coziyoo_core::types::Realm::App,
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            "buyer",
        )
        .unwrap();
    let app = build_router(state);

    // Bad actor-role header is rejected before any database access.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/orders")
                .header("authorization", format!("Bearer {token}"))
                .header("x-actor-role", "superhero")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "ROLE_NOT_ALLOWED");
}
