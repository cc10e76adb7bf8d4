use thiserror::Error;

/// Stable error codes exposed through the API error envelope.
///
/// Codes are part of the public contract; clients branch on them. Never
/// rename an existing code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError,
    Unauthorized,
    TokenInvalid,
    AuthRealmMismatch,
    RoleNotAllowed,
    ForbiddenOrderScope,
    ForbiddenResourceScope,
    EmailTaken,
    DisplayNameTaken,
    UserNotFound,
    AddressNotFound,
    CategoryNotFound,
    FoodNotFound,
    OrderNotFound,
    OrderInvalidState,
    LotNotFound,
    LotStatusInvalid,
    LotInvalidQuantity,
    InsufficientLotStock,
    PaymentSessionConflict,
    PaymentAttemptNotFound,
    WebhookSignatureInvalid,
    IdempotencyConflict,
    RateLimited,
    ComplianceProfileRequired,
    ComplianceRequiredChecksMissing,
    ComplianceProfileNotFound,
    ComplianceInvalidState,
    DisclosureNotFound,
    DeliveryProofNotRequired,
    DeliveryProofNotFound,
    PinInvalid,
    PinExpired,
    PinMaxAttempts,
    DisputeNotFound,
    DisputeInvalidState,
    ReviewConflict,
    ChatNotFound,
    MessageNotFound,
    MediaNotFound,
    NotificationNotFound,
    ReportNotFound,
    CommissionRateInvalid,
    PaginationInvalid,
    SortFieldInvalid,
    CursorInvalid,
    ApiVersionUnsupported,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::AuthRealmMismatch => "AUTH_REALM_MISMATCH",
            Self::RoleNotAllowed => "ROLE_NOT_ALLOWED",
            Self::ForbiddenOrderScope => "FORBIDDEN_ORDER_SCOPE",
            Self::ForbiddenResourceScope => "FORBIDDEN_RESOURCE_SCOPE",
            Self::EmailTaken => "EMAIL_TAKEN",
            Self::DisplayNameTaken => "DISPLAY_NAME_TAKEN",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::AddressNotFound => "ADDRESS_NOT_FOUND",
            Self::CategoryNotFound => "CATEGORY_NOT_FOUND",
            Self::FoodNotFound => "FOOD_NOT_FOUND",
            Self::OrderNotFound => "ORDER_NOT_FOUND",
            Self::OrderInvalidState => "ORDER_INVALID_STATE",
            Self::LotNotFound => "LOT_NOT_FOUND",
            Self::LotStatusInvalid => "LOT_STATUS_INVALID",
            Self::LotInvalidQuantity => "LOT_INVALID_QUANTITY",
            Self::InsufficientLotStock => "INSUFFICIENT_LOT_STOCK",
            Self::PaymentSessionConflict => "PAYMENT_SESSION_CONFLICT",
            Self::PaymentAttemptNotFound => "PAYMENT_ATTEMPT_NOT_FOUND",
            Self::WebhookSignatureInvalid => "WEBHOOK_SIGNATURE_INVALID",
            Self::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::ComplianceProfileRequired => "COMPLIANCE_PROFILE_REQUIRED",
            Self::ComplianceRequiredChecksMissing => "COMPLIANCE_REQUIRED_CHECKS_MISSING",
            Self::ComplianceProfileNotFound => "COMPLIANCE_PROFILE_NOT_FOUND",
            Self::ComplianceInvalidState => "COMPLIANCE_INVALID_STATE",
            Self::DisclosureNotFound => "DISCLOSURE_NOT_FOUND",
            Self::DeliveryProofNotRequired => "DELIVERY_PROOF_NOT_REQUIRED",
            Self::DeliveryProofNotFound => "DELIVERY_PROOF_NOT_FOUND",
            Self::PinInvalid => "PIN_INVALID",
            Self::PinExpired => "PIN_EXPIRED",
            Self::PinMaxAttempts => "PIN_MAX_ATTEMPTS",
            Self::DisputeNotFound => "DISPUTE_NOT_FOUND",
            Self::DisputeInvalidState => "DISPUTE_INVALID_STATE",
            Self::ReviewConflict => "REVIEW_CONFLICT",
            Self::ChatNotFound => "CHAT_NOT_FOUND",
            Self::MessageNotFound => "MESSAGE_NOT_FOUND",
            Self::MediaNotFound => "MEDIA_NOT_FOUND",
            Self::NotificationNotFound => "NOTIFICATION_NOT_FOUND",
            Self::ReportNotFound => "REPORT_NOT_FOUND",
            Self::CommissionRateInvalid => "COMMISSION_RATE_INVALID",
            Self::PaginationInvalid => "PAGINATION_INVALID",
            Self::SortFieldInvalid => "SORT_FIELD_INVALID",
            Self::CursorInvalid => "CURSOR_INVALID",
            Self::ApiVersionUnsupported => "API_VERSION_UNSUPPORTED",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

/// Core runtime errors.
///
/// Domain failures carry a stable [`ErrorCode`]; infrastructure failures are
/// wrapped so the transport layer can collapse them to `INTERNAL_ERROR`
/// without leaking driver details to callers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{message}")]
    Domain {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("credential hashing error: {0}")]
    Credential(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    pub fn domain(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Domain {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        Self::Domain {
            code: ErrorCode::ValidationError,
            message: message.into(),
            details,
        }
    }

    pub fn not_found(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::domain(code, message)
    }

    /// The stable code for this error; infrastructure errors collapse to
    /// `INTERNAL_ERROR`.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Domain { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    pub fn details(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Domain { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}

/// Extract the violated constraint name from a unique-violation database
/// error, if that is what `err` is. Call sites translate the constraint into
/// the matching stable conflict code.
pub fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            db.constraint().map(|c| c.to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_error_keeps_stable_code() {
        let err = CoreError::domain(ErrorCode::OrderInvalidState, "cannot cancel a paid order");
        assert_eq!(err.code().as_str(), "ORDER_INVALID_STATE");
        assert_eq!(err.to_string(), "cannot cancel a paid order");
    }

    #[test]
    fn infrastructure_errors_collapse_to_internal() {
        let err = CoreError::Database(sqlx::Error::RowNotFound);
        assert_eq!(err.code().as_str(), "INTERNAL_ERROR");
    }

    #[test]
    fn validation_error_carries_details() {
        let err = CoreError::validation(
            "body failed validation",
            Some(serde_json::json!({ "fields": ["email"] })),
        );
        assert_eq!(err.code().as_str(), "VALIDATION_ERROR");
        assert!(err.details().is_some());
    }
}
