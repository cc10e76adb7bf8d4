use crate::error::{CoreError, ErrorCode};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Monetary amount with two fractional digits (`NUMERIC(12,2)` in storage).
pub type Money = Decimal;

/// Commission rate with four fractional digits (`NUMERIC(5,4)` in storage).
pub type Rate = Decimal;

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            pub fn parse(value: &str) -> Result<Self, CoreError> {
                match value {
                    $($text => Ok(Self::$variant),)+
                    other => Err(CoreError::domain(
                        ErrorCode::Internal,
                        format!(concat!("unknown ", stringify!($name), " '{}' in storage"), other),
                    )),
                }
            }
        }
    };
}

text_enum! {
    /// What an app user is allowed to act as. `Both` users pick an effective
    /// role per request.
    UserCapability {
        Buyer => "buyer",
        Seller => "seller",
        Both => "both",
    }
}

text_enum! {
    /// The capability a caller exercises for one request.
    ActorRole {
        Buyer => "buyer",
        Seller => "seller",
    }
}

impl UserCapability {
    pub fn allows(&self, role: ActorRole) -> bool {
        matches!(
            (self, role),
            (Self::Buyer, ActorRole::Buyer)
                | (Self::Seller, ActorRole::Seller)
                | (Self::Both, _)
        )
    }
}

text_enum! {
    AdminRole {
        Admin => "admin",
        SuperAdmin => "super_admin",
    }
}

text_enum! {
    /// Authentication domain. Realms are fully isolated: separate user
    /// tables, separate signing secrets, separate endpoints.
    Realm {
        App => "app",
        Admin => "admin",
    }
}

text_enum! {
    OrderStatus {
        Draft => "draft",
        PendingSellerApproval => "pending_seller_approval",
        SellerApproved => "seller_approved",
        AwaitingPayment => "awaiting_payment",
        Paid => "paid",
        Preparing => "preparing",
        Ready => "ready",
        InDelivery => "in_delivery",
        Delivered => "delivered",
        Completed => "completed",
        Rejected => "rejected",
        Cancelled => "cancelled",
        Refunded => "refunded",
        RefundPending => "refund_pending",
        RefundRejected => "refund_rejected",
        Expired => "expired",
    }
}

text_enum! {
    DeliveryType {
        Pickup => "pickup",
        Delivery => "delivery",
    }
}

text_enum! {
    LotStatus {
        Open => "open",
        Locked => "locked",
        Depleted => "depleted",
        Recalled => "recalled",
        Discarded => "discarded",
    }
}

text_enum! {
    PaymentAttemptStatus {
        Initiated => "initiated",
        ReturnedSuccess => "returned_success",
        ReturnedFailed => "returned_failed",
        Confirmed => "confirmed",
        ConfirmationFailed => "confirmation_failed",
    }
}

text_enum! {
    ComplianceStatus {
        NotStarted => "not_started",
        InProgress => "in_progress",
        Submitted => "submitted",
        UnderReview => "under_review",
        Approved => "approved",
        Rejected => "rejected",
        Suspended => "suspended",
    }
}

text_enum! {
    CheckStatus {
        Pending => "pending",
        Verified => "verified",
        Rejected => "rejected",
    }
}

text_enum! {
    DisclosurePhase {
        PreOrder => "pre_order",
        Handover => "handover",
    }
}

text_enum! {
    DeliveryProofStatus {
        Pending => "pending",
        Verified => "verified",
        Failed => "failed",
        Expired => "expired",
    }
}

text_enum! {
    DisputeType {
        Refund => "refund",
        Chargeback => "chargeback",
    }
}

text_enum! {
    DisputeStatus {
        Opened => "opened",
        UnderReview => "under_review",
        Won => "won",
        Lost => "lost",
        Closed => "closed",
    }
}

text_enum! {
    LiabilityParty {
        Seller => "seller",
        Platform => "platform",
        Provider => "provider",
        Shared => "shared",
    }
}

text_enum! {
    OutboxStatus {
        Pending => "pending",
        Processing => "processing",
        Processed => "processed",
        Failed => "failed",
    }
}

const SHORT_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Opaque 12-char public identifier carried next to internal UUIDs.
pub fn new_short_id() -> String {
    let mut rng = rand::thread_rng();
    (0..12)
        .map(|_| SHORT_ID_ALPHABET[rng.gen_range(0..SHORT_ID_ALPHABET.len())] as char)
        .collect()
}

/// Human-readable order code, e.g. `CZ-7F3K9Q2M`.
pub fn new_order_code() -> String {
    const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    let tail: String = (0..8)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("CZ-{tail}")
}

/// Lowercase, trim, and collapse internal whitespace. Uniqueness of display
/// names is enforced on this form.
pub fn normalize_display_name(raw: &str) -> String {
    raw.trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_text_roundtrip() {
        let all = [
            OrderStatus::Draft,
            OrderStatus::PendingSellerApproval,
            OrderStatus::SellerApproved,
            OrderStatus::AwaitingPayment,
            OrderStatus::Paid,
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::InDelivery,
            OrderStatus::Delivered,
            OrderStatus::Completed,
            OrderStatus::Rejected,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
            OrderStatus::RefundPending,
            OrderStatus::RefundRejected,
            OrderStatus::Expired,
        ];
        for status in all {
            assert_eq!(OrderStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_text_is_internal_error() {
        let err = OrderStatus::parse("definitely-not-a-status").unwrap_err();
        assert_eq!(err.code().as_str(), "INTERNAL_ERROR");
    }

    #[test]
    fn capability_role_matrix() {
        assert!(UserCapability::Both.allows(ActorRole::Buyer));
        assert!(UserCapability::Both.allows(ActorRole::Seller));
        assert!(UserCapability::Buyer.allows(ActorRole::Buyer));
        assert!(!UserCapability::Buyer.allows(ActorRole::Seller));
        assert!(!UserCapability::Seller.allows(ActorRole::Buyer));
    }

    #[test]
    fn short_id_shape() {
        let id = new_short_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn order_code_shape() {
        let code = new_order_code();
        assert!(code.starts_with("CZ-"));
        assert_eq!(code.len(), 11);
    }

    #[test]
    fn display_name_normalization() {
        assert_eq!(normalize_display_name("  Ayşe   Mutfak  "), "ayşe mutfak");
        assert_eq!(normalize_display_name("Chef\tOne"), "chef one");
    }
}
