//! Gift card ledger model.
//!
//! Entries are append-only (enforced by a trigger in the store). Each entry
//! type carries a fixed sign:
//!
//! | type      | amount |
//! |-----------|--------|
//! | `issue`   | `+A`   |
//! | `reserve` | `-r`   |
//! | `release` | `+r`   |
//! | `consume` | `0`    |
//! | `adjust`  | `±d`   |
//!
//! so that `remaining = Σ entries + Σ active holds` at every commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Types of ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "gift_card_entry_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GiftCardEntryType {
    /// Card created with its initial value.
    Issue,
    /// Amount held for a pending order.
    Reserve,
    /// Hold returned after a failed or expired order.
    Release,
    /// Hold spent by a paid order.
    Consume,
    /// Signed operator correction.
    Adjust,
}

impl GiftCardEntryType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::Reserve => "reserve",
            Self::Release => "release",
            Self::Consume => "consume",
            Self::Adjust => "adjust",
        }
    }

    /// Whether `amount_cents` has the sign this entry type requires.
    pub fn accepts_amount(&self, amount_cents: i64) -> bool {
        match self {
            Self::Issue | Self::Release => amount_cents > 0,
            Self::Reserve => amount_cents < 0,
            Self::Consume => amount_cents == 0,
            Self::Adjust => amount_cents != 0,
        }
    }
}

/// A ledger entry as stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GiftCardLedgerEntry {
    pub id: Uuid,
    pub gift_card_id: Uuid,
    pub entry_type: GiftCardEntryType,
    /// Signed amount in cents.
    pub amount_cents: i64,
    pub order_id: Option<Uuid>,
    pub reservation_id: Option<Uuid>,
    /// Operator or subsystem that wrote the entry.
    pub actor: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Data required to append a ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGiftCardLedgerEntry {
    pub gift_card_id: Uuid,
    pub entry_type: GiftCardEntryType,
    pub amount_cents: i64,
    pub order_id: Option<Uuid>,
    pub reservation_id: Option<Uuid>,
    pub actor: Option<String>,
    pub note: Option<String>,
}

impl NewGiftCardLedgerEntry {
    /// Create an issue entry for a newly bought card.
    pub fn issue(gift_card_id: Uuid, amount_cents: i64, order_id: Uuid) -> Self {
        Self {
            gift_card_id,
            entry_type: GiftCardEntryType::Issue,
            amount_cents: amount_cents.abs(),
            order_id: Some(order_id),
            reservation_id: None,
            actor: Some("system".into()),
            note: None,
        }
    }

    /// Create a reserve entry. The stored amount is negative.
    pub fn reserve(gift_card_id: Uuid, amount_cents: i64, order_id: Uuid, reservation_id: Uuid) -> Self {
        Self {
            gift_card_id,
            entry_type: GiftCardEntryType::Reserve,
            amount_cents: -amount_cents.abs(),
            order_id: Some(order_id),
            reservation_id: Some(reservation_id),
            actor: Some("system".into()),
            note: None,
        }
    }

    /// Create a release entry mirroring a reserve.
    pub fn release(gift_card_id: Uuid, amount_cents: i64, order_id: Uuid, reservation_id: Uuid) -> Self {
        Self {
            gift_card_id,
            entry_type: GiftCardEntryType::Release,
            amount_cents: amount_cents.abs(),
            order_id: Some(order_id),
            reservation_id: Some(reservation_id),
            actor: Some("system".into()),
            note: None,
        }
    }

    /// Create a consume entry. The amount spent is recorded in the note and
    /// taken from the reservation; the entry itself carries zero.
    pub fn consume(gift_card_id: Uuid, spent_cents: i64, order_id: Uuid, reservation_id: Uuid) -> Self {
        Self {
            gift_card_id,
            entry_type: GiftCardEntryType::Consume,
            amount_cents: 0,
            order_id: Some(order_id),
            reservation_id: Some(reservation_id),
            actor: Some("system".into()),
            note: Some(format!("spent {}", spent_cents)),
        }
    }

    /// Create a signed operator adjustment.
    pub fn adjust(gift_card_id: Uuid, delta_cents: i64, actor: String, note: Option<String>) -> Self {
        Self {
            gift_card_id,
            entry_type: GiftCardEntryType::Adjust,
            amount_cents: delta_cents,
            order_id: None,
            reservation_id: None,
            actor: Some(actor),
            note,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_serialization() {
        assert_eq!(
            serde_json::to_string(&GiftCardEntryType::Consume).unwrap(),
            "\"consume\""
        );
        assert_eq!(GiftCardEntryType::Adjust.as_str(), "adjust");
    }

    #[test]
    fn test_constructors_carry_required_signs() {
        let card = Uuid::new_v4();
        let order = Uuid::new_v4();
        let res = Uuid::new_v4();

        let entries = [
            NewGiftCardLedgerEntry::issue(card, 5_000, order),
            NewGiftCardLedgerEntry::reserve(card, 1_000, order, res),
            NewGiftCardLedgerEntry::release(card, 1_000, order, res),
            NewGiftCardLedgerEntry::consume(card, 1_000, order, res),
            NewGiftCardLedgerEntry::adjust(card, -250, "ops".into(), None),
        ];
        for entry in &entries {
            assert!(
                entry.entry_type.accepts_amount(entry.amount_cents),
                "{:?} with {}",
                entry.entry_type,
                entry.amount_cents
            );
        }
        assert_eq!(entries[1].amount_cents, -1_000);
        assert_eq!(entries[3].amount_cents, 0);
    }

    #[test]
    fn test_reserve_release_cancel_out() {
        let card = Uuid::new_v4();
        let order = Uuid::new_v4();
        let res = Uuid::new_v4();
        let reserve = NewGiftCardLedgerEntry::reserve(card, 700, order, res);
        let release = NewGiftCardLedgerEntry::release(card, 700, order, res);
        assert_eq!(reserve.amount_cents + release.amount_cents, 0);
    }

    #[test]
    fn test_sign_rules() {
        assert!(!GiftCardEntryType::Issue.accepts_amount(0));
        assert!(!GiftCardEntryType::Reserve.accepts_amount(10));
        assert!(!GiftCardEntryType::Consume.accepts_amount(-10));
        assert!(!GiftCardEntryType::Adjust.accepts_amount(0));
        assert!(GiftCardEntryType::Adjust.accepts_amount(-1));
    }
}
