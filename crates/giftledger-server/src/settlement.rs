//! Order settlement: the side effects attached to each lifecycle edge.
//!
//! - `pending | failed | expired -> paid`: consume the gift card hold (a
//!   released hold is re-reserved), issue purchased gift cards.
//! - `pending -> failed | expired`: release the hold.
//! - `paid -> refunded | disputed`: audit only.
//!
//! Everything runs on the caller's transaction. Emails are returned as
//! [`Notification`]s and sent only after the caller commits.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::PgConnection;
use uuid::Uuid;

use giftledger_crypto::{generate_gift_code, lookup_hash};

use crate::config::Settings;
use crate::customers;
use crate::ledger::{self, ConsumeOutcome, LedgerError};
use crate::models::gift_card::expiry_from;
use crate::models::{GiftCard, NewGiftCard, NewOrderEvent, Order, OrderItem, OrderStatus};
use crate::orders::{self, OrderError, ProviderRefs, Transition};

/// Errors raised while settling an order.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A gift card created by a paid order, with its one-time plaintext code.
#[derive(Debug, Clone)]
pub struct IssuedCard {
    pub card: GiftCard,
    pub code: String,
    pub order_item_id: Uuid,
    /// Recipient, else buyer, else the ordering customer.
    pub deliver_to: Option<String>,
}

/// Result of the first `paid` transition of an order.
#[derive(Debug, Clone)]
pub struct PaidSettlement {
    pub order: Order,
    pub customer_email: Option<String>,
    pub issued: Vec<IssuedCard>,
}

/// Emails to send once the settling transaction has committed.
#[derive(Debug, Clone)]
pub enum Notification {
    OrderPaid(PaidSettlement),
    Refund {
        order_id: Uuid,
        refunded_cents: i64,
        currency: String,
        full: bool,
    },
    Dispute {
        order_id: Uuid,
        reason: Option<String>,
    },
}

/// Moves an order to `paid` and runs the paid side effects exactly once.
///
/// Returns `None` when the order was already paid.
pub async fn settle_paid(
    conn: &mut PgConnection,
    settings: &Settings,
    order_id: Uuid,
    refs: &ProviderRefs,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<Option<PaidSettlement>, SettlementError> {
    // Step 1: Transition; a repeat signal stops here
    let transition = orders::transition(
        conn,
        order_id,
        OrderStatus::Paid,
        actor,
        json!({ "payment_intent_id": refs.payment_intent_id, "checkout_session_id": refs.checkout_session_id }),
    )
    .await?;
    orders::record_provider_refs(conn, order_id, refs).await?;
    if !transition.applied() {
        return Ok(None);
    }
    let order = transition.order;
    if transition.from != OrderStatus::Pending {
        tracing::warn!(
            order_id = %order_id,
            from = %transition.from,
            "Provider confirmed payment for an order that had stopped waiting"
        );
    }

    // Step 2: Spend the gift card hold
    match ledger::consume(conn, order_id, now).await? {
        ConsumeOutcome::Consumed { .. } | ConsumeOutcome::AlreadyConsumed { .. } => {}
        ConsumeOutcome::NothingReserved if order.discount_cents == 0 => {}
        outcome => {
            let payload = match &outcome {
                ConsumeOutcome::Lapsed {
                    gift_card_id,
                    amount_cents,
                    available_cents,
                } => json!({
                    "gift_card_id": gift_card_id,
                    "amount_cents": amount_cents,
                    "available_cents": available_cents,
                }),
                _ => json!({ "discount_cents": order.discount_cents, "reason": "no_reservation" }),
            };
            tracing::error!(
                order_id = %order_id,
                discount_cents = order.discount_cents,
                "Paid order's gift card discount could not be consumed"
            );
            orders::append_event(
                conn,
                &NewOrderEvent::new(order_id, actor, "gift_reservation_consume_failed", payload),
            )
            .await?;
        }
    }

    // Step 3: Issue purchased gift cards
    let customer_email = customers::get_customer(conn, order.customer_id)
        .await?
        .map(|c| c.email);
    let items = orders::items_for_order(conn, order_id).await?;
    let mut issued = Vec::new();
    for item in items.iter().filter(|i| i.is_gift_card()) {
        let card = issue_for_item(conn, settings, &order, item, customer_email.as_deref(), now).await?;
        issued.push(card);
    }

    Ok(Some(PaidSettlement {
        order,
        customer_email,
        issued,
    }))
}

async fn issue_for_item(
    conn: &mut PgConnection,
    settings: &Settings,
    order: &Order,
    item: &OrderItem,
    customer_email: Option<&str>,
    now: DateTime<Utc>,
) -> Result<IssuedCard, SettlementError> {
    let code = generate_gift_code();
    let recipient_email = item.meta_str("recipientEmail", "recipient_email");
    let buyer_email = item.meta_str("buyerEmail", "buyer_email");
    let deliver_to = recipient_email
        .clone()
        .or_else(|| buyer_email.clone())
        .or_else(|| customer_email.map(str::to_string));

    let new_card = NewGiftCard {
        code_hash: lookup_hash(&code, &settings.gift_card_pepper),
        amount_cents: item.line_total_cents(),
        currency: order.currency.clone(),
        purchased_order_id: order.id,
        purchased_order_item_id: item.id,
        recipient_name: item.meta_str("recipientName", "recipient_name"),
        recipient_email,
        buyer_name: item.meta_str("buyerName", "buyer_name"),
        buyer_email,
        expires_at: expiry_from(now, settings.gift_card_validity_months),
    };
    let card = ledger::issue(conn, &new_card).await?;

    orders::append_event(
        conn,
        &NewOrderEvent::new(
            order.id,
            crate::models::order_event::ACTOR_SYSTEM,
            "gift_card_issued",
            json!({
                "gift_card_id": card.id,
                "order_item_id": item.id,
                "amount_cents": card.initial_amount_cents,
            }),
        ),
    )
    .await?;

    Ok(IssuedCard {
        card,
        code,
        order_item_id: item.id,
        deliver_to,
    })
}

/// Moves a pending order to `failed` or `expired` and releases its hold.
pub async fn settle_unpaid(
    conn: &mut PgConnection,
    order_id: Uuid,
    to: OrderStatus,
    refs: &ProviderRefs,
    actor: &str,
    details: Value,
) -> Result<Transition, SettlementError> {
    let transition = orders::transition(conn, order_id, to, actor, details).await?;
    orders::record_provider_refs(conn, order_id, refs).await?;
    // Release is idempotent, so a repeated signal is harmless here.
    ledger::release(conn, order_id).await?;
    Ok(transition)
}

/// Records a refund. A full refund moves the order to `refunded`; a partial
/// one is audit only and applies to `paid` or `disputed` orders.
///
/// Returns `None` when nothing was recorded.
pub async fn record_refund(
    conn: &mut PgConnection,
    order_id: Uuid,
    refunded_cents: i64,
    full: bool,
    actor: &str,
    details: Value,
) -> Result<Option<Notification>, SettlementError> {
    let order = orders::get_order(conn, order_id).await?;

    if !full {
        if !matches!(order.status, OrderStatus::Paid | OrderStatus::Disputed) {
            tracing::warn!(
                order_id = %order_id,
                status = %order.status,
                refunded_cents,
                "Ignoring partial refund for an order that was never settled"
            );
            return Ok(None);
        }
        orders::append_event(
            conn,
            &NewOrderEvent::new(
                order_id,
                actor,
                "refund_partial",
                json!({ "refunded_cents": refunded_cents, "details": details }),
            ),
        )
        .await?;
        tracing::info!(order_id = %order_id, refunded_cents, "Recorded partial refund");
        return Ok(Some(Notification::Refund {
            order_id,
            refunded_cents,
            currency: order.currency,
            full: false,
        }));
    }

    let transition = orders::transition(conn, order_id, OrderStatus::Refunded, actor, details).await?;
    if !transition.applied() {
        return Ok(None);
    }
    Ok(Some(Notification::Refund {
        order_id,
        refunded_cents,
        currency: order.currency,
        full: true,
    }))
}

/// Records a dispute. The first signal moves the order to `disputed`; later
/// updates are appended to the audit trail.
pub async fn record_dispute(
    conn: &mut PgConnection,
    order_id: Uuid,
    reason: Option<String>,
    actor: &str,
    details: Value,
) -> Result<Option<Notification>, SettlementError> {
    let transition = orders::transition(
        conn,
        order_id,
        OrderStatus::Disputed,
        actor,
        details.clone(),
    )
    .await?;

    if !transition.applied() {
        orders::append_event(
            conn,
            &NewOrderEvent::new(order_id, actor, "dispute_updated", details),
        )
        .await?;
        return Ok(None);
    }
    Ok(Some(Notification::Dispute { order_id, reason }))
}
