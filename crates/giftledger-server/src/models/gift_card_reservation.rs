//! Gift card reservation model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Default hold duration in minutes.
pub const DEFAULT_RESERVATION_TTL_MINUTES: i64 = 30;

/// Possible states of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "reservation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Holding balance for a pending order.
    Active,
    /// Spent by a paid order. Final.
    Consumed,
    /// Returned to the card. Final.
    Released,
}

/// A time-boxed hold against a gift card for one order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GiftCardReservation {
    pub id: Uuid,
    pub gift_card_id: Uuid,
    pub order_id: Uuid,
    /// Held amount in cents, always positive.
    pub amount_cents: i64,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// When the hold was consumed or released.
    pub settled_at: Option<DateTime<Utc>>,
}

impl GiftCardReservation {
    /// Check if the hold still counts against the card.
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// Check if an active hold has outlived its expiry.
    pub fn is_lapsed_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at <= now
    }
}

/// Expiry for a hold opened at `now`.
pub fn reservation_expiry(now: DateTime<Utc>, ttl_secs: u64) -> DateTime<Utc> {
    let secs = i64::try_from(ttl_secs).unwrap_or(DEFAULT_RESERVATION_TTL_MINUTES * 60);
    now + Duration::seconds(secs)
}
