#![deny(unsafe_code)]

//! Coziyoo REST service: the versioned `/v1` surface, the response
//! envelope, and the shared service state handed to every handler.

pub mod extract;
pub mod handlers;
pub mod routes;
pub mod workers;

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use coziyoo_adapters::AgentDispatchClient;
use coziyoo_core::identity::TokenSigner;
use coziyoo_core::pagination::{FeedMeta, OffsetMeta};
use coziyoo_core::{AppConfig, CoreError, ErrorCode, Store};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Clone)]
pub struct ServiceState {
    pub store: Store,
    pub config: Arc<AppConfig>,
    pub signer: Arc<TokenSigner>,
    pub dispatch: Arc<AgentDispatchClient>,
}

impl ServiceState {
    pub async fn bootstrap(config: AppConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let store = Store::connect(&config).await?;
        store.migrate().await?;
        let signer = TokenSigner::from_config(&config);
        let dispatch =
            AgentDispatchClient::new(config.agent_runtime_url.clone(), config.agent_runtime_secret.clone())?;
        Ok(Self {
            store,
            config: Arc::new(config),
            signer: Arc::new(signer),
            dispatch: Arc::new(dispatch),
        })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .nest("/v1", routes::v1_router())
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Everything outside `/v1` is an unsupported API version; inside `/v1` an
/// unmatched path is a plain not-found.
async fn fallback(uri: Uri) -> Response {
    if uri.path().starts_with("/v1") {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": { "code": "NOT_FOUND", "message": "no such endpoint" }
            })),
        )
            .into_response()
    } else {
        ApiError(CoreError::domain(
            ErrorCode::ApiVersionUnsupported,
            "only /v1 is served",
        ))
        .into_response()
    }
}

/// Success envelope: `{ "data": ..., "pagination"?: ... }`.
pub fn data<T: Serialize>(value: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "data": value }))
}

pub fn data_offset<T: Serialize>(value: T, pagination: OffsetMeta) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "data": value, "pagination": pagination }))
}

pub fn data_feed<T: Serialize>(value: T, pagination: FeedMeta) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "data": value, "pagination": pagination }))
}

/// HTTP translation of a core error. Stable codes drive client branching;
/// infrastructure detail stays in the server log.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

pub fn status_for(code: ErrorCode) -> StatusCode {
    use ErrorCode::*;
    match code {
        ValidationError | PaginationInvalid | SortFieldInvalid | CursorInvalid
        | ApiVersionUnsupported | LotInvalidQuantity | PinInvalid => StatusCode::BAD_REQUEST,
        Unauthorized | TokenInvalid | AuthRealmMismatch | WebhookSignatureInvalid => {
            StatusCode::UNAUTHORIZED
        }
        RoleNotAllowed | ForbiddenOrderScope | ForbiddenResourceScope | ComplianceProfileRequired => {
            StatusCode::FORBIDDEN
        }
        UserNotFound | AddressNotFound | CategoryNotFound | FoodNotFound | OrderNotFound
        | LotNotFound | PaymentAttemptNotFound | ComplianceProfileNotFound | DisclosureNotFound
        | DeliveryProofNotFound | DisputeNotFound | ChatNotFound | MessageNotFound
        | MediaNotFound | NotificationNotFound | ReportNotFound => StatusCode::NOT_FOUND,
        EmailTaken | DisplayNameTaken | OrderInvalidState | LotStatusInvalid
        | InsufficientLotStock | PaymentSessionConflict | IdempotencyConflict
        | ComplianceRequiredChecksMissing | ComplianceInvalidState | DeliveryProofNotRequired
        | PinExpired | PinMaxAttempts | DisputeInvalidState | ReviewConflict
        | CommissionRateInvalid => StatusCode::CONFLICT,
        RateLimited => StatusCode::TOO_MANY_REQUESTS,
        Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = status_for(code);

        // Infrastructure failures are logged with detail and masked outward.
        let (message, details) = match &self.0 {
            CoreError::Domain { message, details, .. } => (message.clone(), details.clone()),
            other => {
                error!(error = %other, "internal error");
                ("internal error".to_string(), None)
            }
        };

        let mut body = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": message,
            }
        });
        if let Some(details) = details {
            body["error"]["details"] = details;
        }
        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError(CoreError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_the_error_taxonomy() {
        assert_eq!(status_for(ErrorCode::ValidationError), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCode::TokenInvalid), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(ErrorCode::WebhookSignatureInvalid),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_for(ErrorCode::RoleNotAllowed), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorCode::OrderNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorCode::OrderInvalidState), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorCode::PaymentSessionConflict),
            StatusCode::CONFLICT
        );
        assert_eq!(status_for(ErrorCode::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            status_for(ErrorCode::Internal),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn error_envelope_shape() {
        let response = ApiError(CoreError::domain(
            ErrorCode::OrderInvalidState,
            "cannot cancel a delivered order",
        ));
        let code = response.0.code();
        assert_eq!(code.as_str(), "ORDER_INVALID_STATE");
    }

    #[test]
    fn internal_errors_mask_detail() {
        let err = ApiError(CoreError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(err.0.code(), ErrorCode::Internal);
    }
}
