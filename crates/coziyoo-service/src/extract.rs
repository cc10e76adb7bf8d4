//! Request gating extractors: bearer auth per realm, the actor-role header,
//! the idempotency key header, and a best-effort client IP.

use crate::{ApiError, ServiceState};
use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use coziyoo_core::actor::{build_admin_actor, build_app_actor, Actor};
use coziyoo_core::identity::{self, AuthContext};
use coziyoo_core::types::{ActorRole, Realm};
use coziyoo_core::{CoreError, ErrorCode};
use std::net::SocketAddr;

pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            ApiError(CoreError::domain(
                ErrorCode::Unauthorized,
                "bearer token required",
            ))
        })
}

fn verify_token(parts: &Parts, state: &ServiceState, realm: Realm) -> Result<AuthContext, ApiError> {
    let token = bearer_token(parts)?;
    Ok(state.signer.verify_access(token, realm)?)
}

/// Revocation wins over token expiry.
async fn require_live_session(state: &ServiceState, ctx: &AuthContext) -> Result<(), ApiError> {
    if !identity::session_is_live(&state.store, ctx.session_id).await? {
        return Err(ApiError(CoreError::domain(
            ErrorCode::TokenInvalid,
            "session is no longer active",
        )));
    }
    Ok(())
}

fn requested_role(parts: &Parts) -> Result<Option<ActorRole>, ApiError> {
    match parts
        .headers
        .get(ACTOR_ROLE_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        None => Ok(None),
        Some("buyer") => Ok(Some(ActorRole::Buyer)),
        Some("seller") => Ok(Some(ActorRole::Seller)),
        Some(other) => Err(ApiError(CoreError::domain(
            ErrorCode::RoleNotAllowed,
            format!("unknown actor role '{other}'"),
        ))),
    }
}

/// Authenticated app-realm caller with its effective per-request role.
pub struct AppActor(pub Actor);

#[async_trait]
impl FromRequestParts<ServiceState> for AppActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServiceState,
    ) -> Result<Self, Self::Rejection> {
        let ctx = verify_token(parts, state, Realm::App)?;
        let role = requested_role(parts)?;
        let actor = build_app_actor(&ctx, role)?;
        require_live_session(state, &ctx).await?;
        Ok(Self(actor))
    }
}

/// Authenticated admin-realm caller.
pub struct AdminActor(pub Actor);

#[async_trait]
impl FromRequestParts<ServiceState> for AdminActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServiceState,
    ) -> Result<Self, Self::Rejection> {
        let ctx = verify_token(parts, state, Realm::Admin)?;
        let actor = build_admin_actor(&ctx)?;
        require_live_session(state, &ctx).await?;
        Ok(Self(actor))
    }
}

/// Client address for abuse accounting: first `x-forwarded-for` hop when a
/// proxy fronted the request, the socket peer otherwise.
pub struct ClientIp(pub Option<String>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let ip = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });
        Ok(Self(ip))
    }
}

/// The idempotency key for monetary writes. Required on the endpoints that
/// declare a scope; the route handler decides.
pub struct IdempotencyKey(pub Option<String>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for IdempotencyKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.headers.get(IDEMPOTENCY_HEADER) {
            None => Ok(Self(None)),
            Some(value) => {
                let key = value.to_str().map_err(|_| {
                    ApiError(CoreError::validation("idempotency key must be ASCII", None))
                })?;
                let key = key.trim();
                if key.is_empty() || key.len() > 255 {
                    return Err(ApiError(CoreError::validation(
                        "idempotency key must be 1..=255 chars",
                        None,
                    )));
                }
                Ok(Self(Some(key.to_string())))
            }
        }
    }
}

impl IdempotencyKey {
    pub fn require(self) -> Result<String, ApiError> {
        self.0.ok_or_else(|| {
            ApiError(CoreError::validation(
                "Idempotency-Key header is required on this endpoint",
                None,
            ))
        })
    }
}
