//! Velocity limits for sensitive flows.
//!
//! Sliding windows are counted from the `abuse_risk_events` decision log
//! itself: every admitted request appends an `allowed` row, breaches append
//! a `denied` row and fail the request with `RATE_LIMITED`. Monetary flows
//! fail closed when the store is unreachable.

use crate::db::Store;
use crate::error::{CoreError, ErrorCode};
use chrono::{Duration, Utc};
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbuseFlow {
    Signup,
    Login,
    DisplayNameCheck,
    OrderCreate,
    PaymentStart,
    RefundRequest,
    PinVerify,
}

impl AbuseFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::Login => "login",
            Self::DisplayNameCheck => "display_name_check",
            Self::OrderCreate => "order_create",
            Self::PaymentStart => "payment_start",
            Self::RefundRequest => "refund_request",
            Self::PinVerify => "pin_verify",
        }
    }

    /// (window, max admitted requests per window)
    pub fn limit(&self) -> (Duration, i64) {
        match self {
            Self::Signup => (Duration::hours(1), 5),
            Self::Login => (Duration::minutes(15), 10),
            Self::DisplayNameCheck => (Duration::minutes(1), 30),
            Self::OrderCreate => (Duration::hours(1), 20),
            Self::PaymentStart => (Duration::hours(1), 20),
            Self::RefundRequest => (Duration::hours(1), 5),
            Self::PinVerify => (Duration::minutes(10), 10),
        }
    }

    /// Monetary flows deny on store failure instead of waving traffic through.
    pub fn fails_closed(&self) -> bool {
        matches!(self, Self::OrderCreate | Self::PaymentStart | Self::RefundRequest)
    }
}

async fn window_count(
    store: &Store,
    flow: AbuseFlow,
    column: &str,
    value: &str,
    window: Duration,
) -> Result<i64, CoreError> {
    let query = format!(
        "SELECT count(*) AS hits FROM abuse_risk_events
         WHERE flow = $1 AND {column} = $2 AND decision = 'allowed' AND created_at > $3"
    );
    let row = sqlx::query(&query)
        .bind(flow.as_str())
        .bind(value)
        .bind(Utc::now() - window)
        .fetch_one(store.pool())
        .await?;
    Ok(row.try_get("hits")?)
}

async fn append_decision(
    store: &Store,
    flow: AbuseFlow,
    ip: Option<&str>,
    subject: Option<&str>,
    decision: &str,
    detail: serde_json::Value,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO abuse_risk_events (id, flow, ip, subject, decision, detail, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, now())
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(flow.as_str())
    .bind(ip)
    .bind(subject)
    .bind(decision)
    .bind(detail)
    .execute(store.pool())
    .await?;
    Ok(())
}

/// Admit or deny one request on `flow` for the given ip/subject pair.
pub async fn gate(
    store: &Store,
    flow: AbuseFlow,
    ip: Option<&str>,
    subject: Option<&str>,
) -> Result<(), CoreError> {
    match gate_inner(store, flow, ip, subject).await {
        Ok(outcome) => outcome,
        Err(CoreError::Domain { code, message, details }) => {
            Err(CoreError::Domain { code, message, details })
        }
        Err(err) => {
            if flow.fails_closed() {
                warn!(flow = flow.as_str(), error = %err, "abuse store unavailable; failing closed");
                Err(CoreError::domain(
                    ErrorCode::RateLimited,
                    "request rate cannot be verified right now",
                ))
            } else {
                warn!(flow = flow.as_str(), error = %err, "abuse store unavailable; failing open");
                Ok(())
            }
        }
    }
}

async fn gate_inner(
    store: &Store,
    flow: AbuseFlow,
    ip: Option<&str>,
    subject: Option<&str>,
) -> Result<Result<(), CoreError>, CoreError> {
    let (window, max) = flow.limit();

    let mut breached = false;
    if let Some(ip) = ip {
        breached |= window_count(store, flow, "ip", ip, window).await? >= max;
    }
    if let Some(subject) = subject {
        if !breached {
            breached |= window_count(store, flow, "subject", subject, window).await? >= max;
        }
    }

    if breached {
        append_decision(
            store,
            flow,
            ip,
            subject,
            "denied",
            serde_json::json!({ "limit": max, "window_secs": window.num_seconds() }),
        )
        .await?;
        return Ok(Err(CoreError::domain(
            ErrorCode::RateLimited,
            "too many requests for this flow; slow down",
        )));
    }

    append_decision(store, flow, ip, subject, "allowed", serde_json::json!({})).await?;
    Ok(Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monetary_flows_fail_closed() {
        assert!(AbuseFlow::OrderCreate.fails_closed());
        assert!(AbuseFlow::PaymentStart.fails_closed());
        assert!(AbuseFlow::RefundRequest.fails_closed());
        assert!(!AbuseFlow::Login.fails_closed());
        assert!(!AbuseFlow::PinVerify.fails_closed());
    }

    #[test]
    fn every_flow_has_a_positive_limit() {
        let flows = [
            AbuseFlow::Signup,
            AbuseFlow::Login,
            AbuseFlow::DisplayNameCheck,
            AbuseFlow::OrderCreate,
            AbuseFlow::PaymentStart,
            AbuseFlow::RefundRequest,
            AbuseFlow::PinVerify,
        ];
        for flow in flows {
            let (window, max) = flow.limit();
            assert!(window.num_seconds() > 0, "{}", flow.as_str());
            assert!(max > 0, "{}", flow.as_str());
        }
    }
}
