//! Request replay dedup for monetary writes.
//!
//! The caller supplies an `Idempotency-Key`; the store remembers
//! `(scope, sha256(key))` together with a fingerprint of the request body
//! and the produced response. A replay with the same body returns the cached
//! response; a replay with a different body is a conflict.

use crate::db::Store;
use crate::error::{CoreError, ErrorCode};
use chrono::{Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::Row;

const KEY_TTL_HOURS: i64 = 24;

/// Scopes partition the key space per monetary operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyScope {
    OrderCreate,
    PaymentStart,
    RefundRequest,
}

impl IdempotencyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderCreate => "order_create",
            Self::PaymentStart => "payment_start",
            Self::RefundRequest => "refund_request",
        }
    }
}

pub fn digest_hex(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

#[derive(Debug, Clone, Serialize)]
pub struct CachedResponse {
    pub status: i32,
    pub body: serde_json::Value,
}

/// Result of consulting the store before running the operation.
#[derive(Debug)]
pub enum Replay {
    /// First sight of this key; run the operation and then `record`.
    Fresh,
    /// Same key and body seen before; serve the cached response.
    Cached(CachedResponse),
}

pub async fn check(
    store: &Store,
    scope: IdempotencyScope,
    key: &str,
    request_hash: &str,
) -> Result<Replay, CoreError> {
    let row = sqlx::query(
        r#"
        SELECT request_hash, response_status, response_body
        FROM idempotency_keys
        WHERE scope = $1 AND key_hash = $2 AND expires_at > now()
        "#,
    )
    .bind(scope.as_str())
    .bind(digest_hex(key.as_bytes()))
    .fetch_optional(store.pool())
    .await?;

    let Some(row) = row else {
        return Ok(Replay::Fresh);
    };

    let stored_hash: String = row.try_get("request_hash")?;
    if stored_hash != request_hash {
        return Err(CoreError::domain(
            ErrorCode::IdempotencyConflict,
            "idempotency key was already used with a different request body",
        ));
    }

    let status: Option<i32> = row.try_get("response_status")?;
    let body: Option<serde_json::Value> = row.try_get("response_body")?;
    match (status, body) {
        (Some(status), Some(body)) => Ok(Replay::Cached(CachedResponse { status, body })),
        // Key reserved but no response recorded: a concurrent first attempt
        // is still in flight (or died before recording).
        _ => Err(CoreError::domain(
            ErrorCode::IdempotencyConflict,
            "a request with this idempotency key is still being processed",
        )),
    }
}

/// Reserve the key before running the operation so a concurrent duplicate
/// cannot run the domain write twice.
pub async fn reserve(
    store: &Store,
    scope: IdempotencyScope,
    key: &str,
    request_hash: &str,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO idempotency_keys (scope, key_hash, request_hash, expires_at, created_at)
        VALUES ($1, $2, $3, $4, now())
        ON CONFLICT (scope, key_hash) DO NOTHING
        "#,
    )
    .bind(scope.as_str())
    .bind(digest_hex(key.as_bytes()))
    .bind(request_hash)
    .bind(Utc::now() + Duration::hours(KEY_TTL_HOURS))
    .execute(store.pool())
    .await?;
    Ok(())
}

pub async fn record(
    store: &Store,
    scope: IdempotencyScope,
    key: &str,
    status: i32,
    body: &serde_json::Value,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        UPDATE idempotency_keys
        SET response_status = $3, response_body = $4
        WHERE scope = $1 AND key_hash = $2
        "#,
    )
    .bind(scope.as_str())
    .bind(digest_hex(key.as_bytes()))
    .bind(status)
    .bind(body)
    .execute(store.pool())
    .await?;
    Ok(())
}

/// Drop the reservation after a failed attempt so the caller may retry with
/// the same key.
pub async fn release(
    store: &Store,
    scope: IdempotencyScope,
    key: &str,
) -> Result<(), CoreError> {
    sqlx::query(
        "DELETE FROM idempotency_keys WHERE scope = $1 AND key_hash = $2 AND response_status IS NULL",
    )
    .bind(scope.as_str())
    .bind(digest_hex(key.as_bytes()))
    .execute(store.pool())
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_labels_are_stable() {
        assert_eq!(IdempotencyScope::OrderCreate.as_str(), "order_create");
        assert_eq!(IdempotencyScope::PaymentStart.as_str(), "payment_start");
        assert_eq!(IdempotencyScope::RefundRequest.as_str(), "refund_request");
    }

    #[test]
    fn body_fingerprint_is_content_addressed() {
        let a = digest_hex(br#"{"foodId":"x","quantity":1}"#);
        let b = digest_hex(br#"{"foodId":"x","quantity":1}"#);
        let c = digest_hex(br#"{"foodId":"x","quantity":2}"#);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
