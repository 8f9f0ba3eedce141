//! Gift card model.
//!
//! The redemption code itself is never stored; `code_hash` is the keyed
//! lookup hash of the normalized code. `remaining_amount_cents` is a cached
//! projection of the ledger and only changes in the same transaction as a
//! ledger entry.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Possible states of a gift card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "gift_card_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GiftCardStatus {
    /// Redeemable while unexpired.
    Active,
    /// Switched off by an operator. Never deleted.
    Disabled,
    /// Past its validity period.
    Expired,
    /// Remaining balance reached zero.
    Depleted,
}

impl GiftCardStatus {
    /// Parse a status from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "disabled" => Some(Self::Disabled),
            "expired" => Some(Self::Expired),
            "depleted" => Some(Self::Depleted),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::Expired => "expired",
            Self::Depleted => "depleted",
        }
    }
}

/// A purchased gift card.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GiftCard {
    /// Unique identifier for this card.
    pub id: Uuid,
    /// Keyed hash of the normalized redemption code.
    #[serde(skip_serializing)]
    pub code_hash: String,
    /// Amount issued, in cents. Immutable.
    pub initial_amount_cents: i64,
    /// Cached balance, in cents.
    pub remaining_amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Current status.
    pub status: GiftCardStatus,
    /// Order that bought this card.
    pub purchased_order_id: Option<Uuid>,
    /// Line item that bought this card.
    pub purchased_order_item_id: Option<Uuid>,
    pub recipient_name: Option<String>,
    pub recipient_email: Option<String>,
    pub buyer_name: Option<String>,
    pub buyer_email: Option<String>,
    /// End of validity.
    pub expires_at: DateTime<Utc>,
    /// When this card was issued.
    pub created_at: DateTime<Utc>,
    /// When this card was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Data required to issue a new gift card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGiftCard {
    pub code_hash: String,
    pub amount_cents: i64,
    pub currency: String,
    pub purchased_order_id: Uuid,
    pub purchased_order_item_id: Uuid,
    pub recipient_name: Option<String>,
    pub recipient_email: Option<String>,
    pub buyer_name: Option<String>,
    pub buyer_email: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl GiftCard {
    /// Check if the card is past its validity period.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Check if the card can be reserved against at `now`.
    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == GiftCardStatus::Active && !self.is_expired_at(now)
    }
}

/// Status a card should carry after its balance changes.
///
/// Only `active` and `depleted` follow the balance; operator and expiry
/// states are left alone.
pub fn status_for_balance(current: GiftCardStatus, remaining_cents: i64) -> GiftCardStatus {
    match current {
        GiftCardStatus::Active if remaining_cents == 0 => GiftCardStatus::Depleted,
        GiftCardStatus::Depleted if remaining_cents > 0 => GiftCardStatus::Active,
        other => other,
    }
}

/// Expiry for a card issued at `issued_at`.
pub fn expiry_from(issued_at: DateTime<Utc>, validity_months: u32) -> DateTime<Utc> {
    issued_at
        .checked_add_months(Months::new(validity_months))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
