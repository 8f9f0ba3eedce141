//! Gift card ledger and reservation manager.
//!
//! Every function here runs on a caller-owned connection, normally the
//! connection of an open transaction, so that the cached balance, the
//! reservation row and the ledger entry commit or roll back together.
//!
//! Lock order is always gift card first, then reservation. The card row lock
//! (`SELECT ... FOR UPDATE`) serializes every balance-changing operation on
//! one card, which is what makes reserve an atomic check-then-insert.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::gift_card::status_for_balance;
use crate::models::gift_card_reservation::reservation_expiry;
use crate::models::{
    GiftCard, GiftCardLedgerEntry, GiftCardReservation, GiftCardStatus, NewGiftCard,
    NewGiftCardLedgerEntry, ReservationStatus,
};

/// Errors raised by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },

    #[error("gift card not found: {0}")]
    CardNotFound(Uuid),

    #[error("gift card {0} is not redeemable")]
    NotRedeemable(Uuid),

    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("adjustment leaves {remaining} below active holds of {held}")]
    BelowActiveHolds { remaining: i64, held: i64 },

    #[error("status {0} cannot be set by an operator")]
    StatusNotSettable(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of consuming an order's reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The hold was spent; the card balance dropped by `amount_cents`.
    Consumed { gift_card_id: Uuid, amount_cents: i64 },
    /// The hold had already been spent earlier.
    AlreadyConsumed { gift_card_id: Uuid },
    /// The order never held anything.
    NothingReserved,
    /// The hold was released before payment and the card no longer covers it.
    Lapsed {
        gift_card_id: Uuid,
        amount_cents: i64,
        available_cents: i64,
    },
}

/// Ledger replay compared with the cached balance.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerAudit {
    pub gift_card_id: Uuid,
    pub initial_amount_cents: i64,
    pub remaining_amount_cents: i64,
    /// Sum of every ledger entry, the issue entry included.
    pub ledger_sum_cents: i64,
    /// Sum of reservations currently in `active` status.
    pub active_holds_cents: i64,
    pub entry_count: i64,
    /// `remaining == ledger_sum + active_holds`.
    pub consistent: bool,
}

const CARD_COLUMNS: &str = r#"
    id, code_hash, initial_amount_cents, remaining_amount_cents, currency, status,
    purchased_order_id, purchased_order_item_id, recipient_name, recipient_email,
    buyer_name, buyer_email, expires_at, created_at, updated_at
"#;

const RESERVATION_COLUMNS: &str =
    "id, gift_card_id, order_id, amount_cents, status, expires_at, created_at, settled_at";

/// Looks up a card by its code hash without locking it.
pub async fn find_card_by_hash(
    conn: &mut PgConnection,
    code_hash: &str,
) -> Result<Option<GiftCard>, LedgerError> {
    let card = sqlx::query_as::<_, GiftCard>(&format!(
        "SELECT {} FROM gift_cards WHERE code_hash = $1",
        CARD_COLUMNS
    ))
    .bind(code_hash)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(card)
}

/// Loads a card without locking it.
pub async fn get_card(conn: &mut PgConnection, gift_card_id: Uuid) -> Result<GiftCard, LedgerError> {
    sqlx::query_as::<_, GiftCard>(&format!(
        "SELECT {} FROM gift_cards WHERE id = $1",
        CARD_COLUMNS
    ))
    .bind(gift_card_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(LedgerError::CardNotFound(gift_card_id))
}

/// Locks a card row for the rest of the transaction.
pub async fn lock_card(conn: &mut PgConnection, gift_card_id: Uuid) -> Result<GiftCard, LedgerError> {
    sqlx::query_as::<_, GiftCard>(&format!(
        "SELECT {} FROM gift_cards WHERE id = $1 FOR UPDATE",
        CARD_COLUMNS
    ))
    .bind(gift_card_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(LedgerError::CardNotFound(gift_card_id))
}

/// Sum of active holds on a card. With `unexpired_at`, lapsed holds are
/// left out.
pub async fn active_holds(
    conn: &mut PgConnection,
    gift_card_id: Uuid,
    unexpired_at: Option<DateTime<Utc>>,
) -> Result<i64, LedgerError> {
    let held: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(amount_cents), 0)::BIGINT
        FROM gift_card_reservations
        WHERE gift_card_id = $1
          AND status = 'active'
          AND ($2::TIMESTAMPTZ IS NULL OR expires_at > $2)
        "#,
    )
    .bind(gift_card_id)
    .bind(unexpired_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(held)
}

/// Available balance: remaining minus active, unexpired holds.
pub async fn available_balance(
    conn: &mut PgConnection,
    gift_card_id: Uuid,
    now: DateTime<Utc>,
) -> Result<i64, LedgerError> {
    let card = get_card(conn, gift_card_id).await?;
    let held = active_holds(conn, gift_card_id, Some(now)).await?;
    Ok((card.remaining_amount_cents - held).max(0))
}

async fn append_entry(
    conn: &mut PgConnection,
    entry: &NewGiftCardLedgerEntry,
) -> Result<Uuid, LedgerError> {
    if !entry.entry_type.accepts_amount(entry.amount_cents) {
        return Err(LedgerError::InvalidAmount(entry.amount_cents));
    }

    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO gift_card_ledger (gift_card_id, entry_type, amount_cents, order_id, reservation_id, actor, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(entry.gift_card_id)
    .bind(entry.entry_type)
    .bind(entry.amount_cents)
    .bind(entry.order_id)
    .bind(entry.reservation_id)
    .bind(&entry.actor)
    .bind(&entry.note)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

async fn write_balance(
    conn: &mut PgConnection,
    card: &GiftCard,
    remaining_cents: i64,
) -> Result<GiftCard, LedgerError> {
    let status = status_for_balance(card.status, remaining_cents);
    let updated = sqlx::query_as::<_, GiftCard>(&format!(
        r#"
        UPDATE gift_cards
        SET remaining_amount_cents = $2, status = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        CARD_COLUMNS
    ))
    .bind(card.id)
    .bind(remaining_cents)
    .bind(status)
    .fetch_one(&mut *conn)
    .await?;
    Ok(updated)
}

/// Creates a card and its single `issue` entry.
pub async fn issue(conn: &mut PgConnection, new_card: &NewGiftCard) -> Result<GiftCard, LedgerError> {
    if new_card.amount_cents <= 0 {
        return Err(LedgerError::InvalidAmount(new_card.amount_cents));
    }

    let card = sqlx::query_as::<_, GiftCard>(&format!(
        r#"
        INSERT INTO gift_cards (
            code_hash, initial_amount_cents, remaining_amount_cents, currency, status,
            purchased_order_id, purchased_order_item_id, recipient_name, recipient_email,
            buyer_name, buyer_email, expires_at
        )
        VALUES ($1, $2, $2, $3, 'active', $4, $5, $6, $7, $8, $9, $10)
        RETURNING {}
        "#,
        CARD_COLUMNS
    ))
    .bind(&new_card.code_hash)
    .bind(new_card.amount_cents)
    .bind(&new_card.currency)
    .bind(new_card.purchased_order_id)
    .bind(new_card.purchased_order_item_id)
    .bind(&new_card.recipient_name)
    .bind(&new_card.recipient_email)
    .bind(&new_card.buyer_name)
    .bind(&new_card.buyer_email)
    .bind(new_card.expires_at)
    .fetch_one(&mut *conn)
    .await?;

    append_entry(
        conn,
        &NewGiftCardLedgerEntry::issue(card.id, new_card.amount_cents, new_card.purchased_order_id),
    )
    .await?;

    tracing::info!(
        gift_card_id = %card.id,
        order_id = %new_card.purchased_order_id,
        amount_cents = new_card.amount_cents,
        "Issued gift card"
    );

    Ok(card)
}

/// Releases the lapsed holds of a card the caller has already locked.
async fn release_lapsed_on_locked_card(
    conn: &mut PgConnection,
    gift_card_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64, LedgerError> {
    let lapsed = sqlx::query_as::<_, GiftCardReservation>(&format!(
        r#"
        SELECT {}
        FROM gift_card_reservations
        WHERE gift_card_id = $1 AND status = 'active' AND expires_at <= $2
        FOR UPDATE
        "#,
        RESERVATION_COLUMNS
    ))
    .bind(gift_card_id)
    .bind(now)
    .fetch_all(&mut *conn)
    .await?;

    let mut released = 0;
    for reservation in &lapsed {
        settle_reservation_released(conn, reservation).await?;
        released += 1;
    }
    Ok(released)
}

async fn settle_reservation_released(
    conn: &mut PgConnection,
    reservation: &GiftCardReservation,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        UPDATE gift_card_reservations
        SET status = 'released', settled_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(reservation.id)
    .execute(&mut *conn)
    .await?;

    append_entry(
        conn,
        &NewGiftCardLedgerEntry::release(
            reservation.gift_card_id,
            reservation.amount_cents,
            reservation.order_id,
            reservation.id,
        ),
    )
    .await?;

    tracing::info!(
        reservation_id = %reservation.id,
        order_id = %reservation.order_id,
        amount_cents = reservation.amount_cents,
        "Released gift card reservation"
    );
    Ok(())
}

async fn insert_reservation(
    conn: &mut PgConnection,
    card: &GiftCard,
    order_id: Uuid,
    amount_cents: i64,
    expires_at: DateTime<Utc>,
) -> Result<GiftCardReservation, LedgerError> {
    let reservation = sqlx::query_as::<_, GiftCardReservation>(&format!(
        r#"
        INSERT INTO gift_card_reservations (gift_card_id, order_id, amount_cents, status, expires_at)
        VALUES ($1, $2, $3, 'active', $4)
        RETURNING {}
        "#,
        RESERVATION_COLUMNS
    ))
    .bind(card.id)
    .bind(order_id)
    .bind(amount_cents)
    .bind(expires_at)
    .fetch_one(&mut *conn)
    .await?;

    append_entry(
        conn,
        &NewGiftCardLedgerEntry::reserve(card.id, amount_cents, order_id, reservation.id),
    )
    .await?;

    Ok(reservation)
}

/// Locks a card and returns it with its available balance.
///
/// Lapsed holds are released first so they never count twice against the
/// remaining balance.
pub async fn lock_with_available(
    conn: &mut PgConnection,
    gift_card_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(GiftCard, i64), LedgerError> {
    let card = lock_card(conn, gift_card_id).await?;
    release_lapsed_on_locked_card(conn, card.id, now).await?;
    let held = active_holds(conn, card.id, None).await?;
    let available = (card.remaining_amount_cents - held).max(0);
    Ok((card, available))
}

/// Opens a hold of exactly `amount_cents` on a card for an order.
///
/// Fails with `InsufficientBalance` when the card's available balance is
/// smaller than the requested amount.
pub async fn reserve(
    conn: &mut PgConnection,
    gift_card_id: Uuid,
    order_id: Uuid,
    amount_cents: i64,
    ttl_secs: u64,
    now: DateTime<Utc>,
) -> Result<GiftCardReservation, LedgerError> {
    if amount_cents <= 0 {
        return Err(LedgerError::InvalidAmount(amount_cents));
    }

    let (card, available) = lock_with_available(conn, gift_card_id, now).await?;
    if !card.is_redeemable_at(now) {
        return Err(LedgerError::NotRedeemable(card.id));
    }
    if amount_cents > available {
        return Err(LedgerError::InsufficientBalance {
            requested: amount_cents,
            available,
        });
    }

    let reservation =
        insert_reservation(conn, &card, order_id, amount_cents, reservation_expiry(now, ttl_secs))
            .await?;

    tracing::info!(
        gift_card_id = %card.id,
        order_id = %order_id,
        reservation_id = %reservation.id,
        amount_cents,
        "Reserved gift card balance"
    );

    Ok(reservation)
}

async fn lock_active_reservation(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> Result<Option<GiftCardReservation>, LedgerError> {
    // Card first, reservation second.
    let card_id: Option<Uuid> = sqlx::query_scalar(
        "SELECT gift_card_id FROM gift_card_reservations WHERE order_id = $1 AND status = 'active'",
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(card_id) = card_id else {
        return Ok(None);
    };
    lock_card(conn, card_id).await?;

    let reservation = sqlx::query_as::<_, GiftCardReservation>(&format!(
        r#"
        SELECT {}
        FROM gift_card_reservations
        WHERE order_id = $1 AND status = 'active'
        FOR UPDATE
        "#,
        RESERVATION_COLUMNS
    ))
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(reservation)
}

/// Releases the active hold of an order.
///
/// Idempotent: an order with no active hold is a no-op and returns `None`.
pub async fn release(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> Result<Option<GiftCardReservation>, LedgerError> {
    match lock_active_reservation(conn, order_id).await? {
        Some(reservation) => {
            settle_reservation_released(conn, &reservation).await?;
            Ok(Some(reservation))
        }
        None => Ok(None),
    }
}

/// Releases one reservation if it is still active and lapsed at `now`.
///
/// Used by the expiry sweeper. Returns whether anything was released.
pub async fn release_if_lapsed(
    conn: &mut PgConnection,
    reservation_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, LedgerError> {
    let card_id: Option<Uuid> =
        sqlx::query_scalar("SELECT gift_card_id FROM gift_card_reservations WHERE id = $1")
            .bind(reservation_id)
            .fetch_optional(&mut *conn)
            .await?;
    let Some(card_id) = card_id else {
        return Ok(false);
    };
    lock_card(conn, card_id).await?;

    let reservation = sqlx::query_as::<_, GiftCardReservation>(&format!(
        "SELECT {} FROM gift_card_reservations WHERE id = $1 FOR UPDATE",
        RESERVATION_COLUMNS
    ))
    .bind(reservation_id)
    .fetch_one(&mut *conn)
    .await?;

    if !reservation.is_lapsed_at(now) {
        return Ok(false);
    }
    settle_reservation_released(conn, &reservation).await?;
    Ok(true)
}

async fn spend_reservation(
    conn: &mut PgConnection,
    card: &GiftCard,
    reservation: &GiftCardReservation,
) -> Result<GiftCard, LedgerError> {
    sqlx::query(
        r#"
        UPDATE gift_card_reservations
        SET status = 'consumed', settled_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(reservation.id)
    .execute(&mut *conn)
    .await?;

    let remaining = card.remaining_amount_cents - reservation.amount_cents;
    if remaining < 0 {
        return Err(LedgerError::InsufficientBalance {
            requested: reservation.amount_cents,
            available: card.remaining_amount_cents,
        });
    }
    let updated = write_balance(conn, card, remaining).await?;

    append_entry(
        conn,
        &NewGiftCardLedgerEntry::consume(
            card.id,
            reservation.amount_cents,
            reservation.order_id,
            reservation.id,
        ),
    )
    .await?;

    tracing::info!(
        gift_card_id = %card.id,
        order_id = %reservation.order_id,
        amount_cents = reservation.amount_cents,
        remaining_cents = remaining,
        "Consumed gift card reservation"
    );
    Ok(updated)
}

/// Spends the hold of a paid order against the card balance.
///
/// A hold that was swept before the payment signal arrived is re-opened and
/// spent when the card still covers it; otherwise `Lapsed` is returned and
/// the caller decides how to record the shortfall.
pub async fn consume(
    conn: &mut PgConnection,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<ConsumeOutcome, LedgerError> {
    if let Some(reservation) = lock_active_reservation(conn, order_id).await? {
        let card = lock_card(conn, reservation.gift_card_id).await?;
        spend_reservation(conn, &card, &reservation).await?;
        return Ok(ConsumeOutcome::Consumed {
            gift_card_id: card.id,
            amount_cents: reservation.amount_cents,
        });
    }

    let latest = sqlx::query_as::<_, GiftCardReservation>(&format!(
        r#"
        SELECT {}
        FROM gift_card_reservations
        WHERE order_id = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#,
        RESERVATION_COLUMNS
    ))
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(latest) = latest else {
        return Ok(ConsumeOutcome::NothingReserved);
    };

    match latest.status {
        ReservationStatus::Consumed => Ok(ConsumeOutcome::AlreadyConsumed {
            gift_card_id: latest.gift_card_id,
        }),
        // Unreachable after the lookup above, but kept total.
        ReservationStatus::Active => Ok(ConsumeOutcome::NothingReserved),
        ReservationStatus::Released => {
            let (card, available) = lock_with_available(conn, latest.gift_card_id, now).await?;
            if available < latest.amount_cents {
                tracing::warn!(
                    order_id = %order_id,
                    gift_card_id = %card.id,
                    amount_cents = latest.amount_cents,
                    available_cents = available,
                    "Lapsed gift card hold can no longer be covered"
                );
                return Ok(ConsumeOutcome::Lapsed {
                    gift_card_id: card.id,
                    amount_cents: latest.amount_cents,
                    available_cents: available,
                });
            }

            let reservation =
                insert_reservation(conn, &card, order_id, latest.amount_cents, now).await?;
            spend_reservation(conn, &card, &reservation).await?;
            tracing::info!(
                order_id = %order_id,
                gift_card_id = %card.id,
                "Re-reserved and consumed a lapsed gift card hold"
            );
            Ok(ConsumeOutcome::Consumed {
                gift_card_id: card.id,
                amount_cents: reservation.amount_cents,
            })
        }
    }
}

/// Applies a signed operator correction.
///
/// The remaining balance may not drop below zero or below the card's active
/// holds.
pub async fn adjust(
    conn: &mut PgConnection,
    gift_card_id: Uuid,
    delta_cents: i64,
    actor: &str,
    note: Option<String>,
) -> Result<GiftCard, LedgerError> {
    if delta_cents == 0 {
        return Err(LedgerError::InvalidAmount(delta_cents));
    }

    let card = lock_card(conn, gift_card_id).await?;
    let held = active_holds(conn, card.id, None).await?;
    let remaining = card
        .remaining_amount_cents
        .checked_add(delta_cents)
        .ok_or(LedgerError::InvalidAmount(delta_cents))?;
    if remaining < held || remaining < 0 {
        return Err(LedgerError::BelowActiveHolds { remaining, held });
    }

    let updated = write_balance(conn, &card, remaining).await?;
    append_entry(
        conn,
        &NewGiftCardLedgerEntry::adjust(card.id, delta_cents, actor.to_string(), note),
    )
    .await?;

    tracing::info!(
        gift_card_id = %card.id,
        delta_cents,
        remaining_cents = remaining,
        actor,
        "Adjusted gift card balance"
    );
    Ok(updated)
}

/// Operator status change. Only `active` and `disabled` can be requested;
/// activating an empty card lands on `depleted`.
pub async fn set_status(
    conn: &mut PgConnection,
    gift_card_id: Uuid,
    requested: GiftCardStatus,
) -> Result<GiftCard, LedgerError> {
    let card = lock_card(conn, gift_card_id).await?;
    let status = match requested {
        GiftCardStatus::Disabled => GiftCardStatus::Disabled,
        GiftCardStatus::Active if card.remaining_amount_cents == 0 => GiftCardStatus::Depleted,
        GiftCardStatus::Active => GiftCardStatus::Active,
        other => return Err(LedgerError::StatusNotSettable(other.as_str())),
    };

    let updated = sqlx::query_as::<_, GiftCard>(&format!(
        "UPDATE gift_cards SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
        CARD_COLUMNS
    ))
    .bind(card.id)
    .bind(status)
    .fetch_one(&mut *conn)
    .await?;

    tracing::info!(gift_card_id = %card.id, status = status.as_str(), "Gift card status changed");
    Ok(updated)
}

/// Entries of a card in insertion order.
pub async fn entries(
    conn: &mut PgConnection,
    gift_card_id: Uuid,
) -> Result<Vec<GiftCardLedgerEntry>, LedgerError> {
    let rows = sqlx::query_as::<_, GiftCardLedgerEntry>(
        r#"
        SELECT id, gift_card_id, entry_type, amount_cents, order_id, reservation_id, actor, note, created_at
        FROM gift_card_ledger
        WHERE gift_card_id = $1
        ORDER BY created_at, id
        "#,
    )
    .bind(gift_card_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Replays a card's ledger and compares it with the cached balance.
pub async fn audit(conn: &mut PgConnection, gift_card_id: Uuid) -> Result<LedgerAudit, LedgerError> {
    let card = get_card(conn, gift_card_id).await?;
    let (ledger_sum, entry_count): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(amount_cents), 0)::BIGINT, COUNT(*)
        FROM gift_card_ledger
        WHERE gift_card_id = $1
        "#,
    )
    .bind(gift_card_id)
    .fetch_one(&mut *conn)
    .await?;
    let held = active_holds(conn, gift_card_id, None).await?;

    Ok(LedgerAudit {
        gift_card_id,
        initial_amount_cents: card.initial_amount_cents,
        remaining_amount_cents: card.remaining_amount_cents,
        ledger_sum_cents: ledger_sum,
        active_holds_cents: held,
        entry_count,
        consistent: balance_reconciles(card.remaining_amount_cents, ledger_sum, held),
    })
}

/// The reconstruction check: the cached balance equals the ledger sum plus
/// the holds that are still open.
pub fn balance_reconciles(remaining_cents: i64, ledger_sum_cents: i64, active_holds_cents: i64) -> bool {
    ledger_sum_cents.checked_add(active_holds_cents) == Some(remaining_cents)
}
