//! Webhook ingestor.
//!
//! Verifies, deduplicates and applies provider events:
//!
//! 1. The signature is checked against the raw body before parsing.
//! 2. The event id is claimed in `processed_events` inside the business
//!    transaction. A claim that returns no row is a duplicate delivery.
//! 3. The event is applied; the idempotency row flips to `processed` in the
//!    same commit.
//! 4. On failure the transaction rolls back and the row is stored as
//!    `failed`, so the provider's redelivery can claim it again.
//!
//! Emails go out after the commit and never affect the response.

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::events::{OrderLocator, RawEvent, WebhookEvent};
use crate::models::order_event::ACTOR_PROVIDER;
use crate::models::{NewOrderEvent, OrderStatus};
use crate::orders::{self, OrderError};
use crate::settlement::{self, Notification, SettlementError};
use crate::state::AppState;

/// Failures that reach the HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error("event {event_id} failed: {message}")]
    Failed { event_id: String, message: String },
}

/// What happened to a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Applied and recorded.
    Processed,
    /// Acknowledged without effect, with the reason stored on the row.
    Ignored(String),
    /// Seen before.
    Duplicate,
}

/// Result of applying one event inside the transaction.
struct Applied {
    note: Option<String>,
    notifications: Vec<Notification>,
}

impl Applied {
    fn done(notifications: Vec<Notification>) -> Self {
        Self {
            note: None,
            notifications,
        }
    }

    fn ignored(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            notifications: Vec::new(),
        }
    }
}

/// Claims an event id for processing.
///
/// Inserts a `processing` row, or re-claims a `failed` one. Returns `false`
/// when the id is already `processing` or `processed`.
pub async fn claim_event(
    conn: &mut PgConnection,
    event_id: &str,
    event_type: &str,
) -> Result<bool, sqlx::Error> {
    let claimed: Option<i32> = sqlx::query_scalar(
        r#"
        INSERT INTO processed_events (event_id, event_type, status, attempts)
        VALUES ($1, $2, 'processing', 1)
        ON CONFLICT (event_id) DO UPDATE
        SET status = 'processing',
            attempts = processed_events.attempts + 1,
            last_error = NULL
        WHERE processed_events.status = 'failed'
        RETURNING attempts
        "#,
    )
    .bind(event_id)
    .bind(event_type)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(claimed.is_some())
}

async fn mark_processed(
    conn: &mut PgConnection,
    event_id: &str,
    note: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE processed_events
        SET status = 'processed', processed_at = NOW(), note = $2
        WHERE event_id = $1
        "#,
    )
    .bind(event_id)
    .bind(note)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Stores a failed attempt outside the rolled-back transaction.
pub async fn mark_failed(
    pool: &PgPool,
    event_id: &str,
    event_type: &str,
    error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO processed_events (event_id, event_type, status, attempts, last_error)
        VALUES ($1, $2, 'failed', 1, $3)
        ON CONFLICT (event_id) DO UPDATE
        SET status = 'failed',
            attempts = processed_events.attempts + 1,
            last_error = EXCLUDED.last_error
        WHERE processed_events.status <> 'processed'
        "#,
    )
    .bind(event_id)
    .bind(event_type)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Verifies and processes one delivery.
pub async fn ingest(
    state: &AppState,
    signature_header: Option<&str>,
    body: &[u8],
) -> Result<IngestOutcome, IngestError> {
    // Step 1: Verify the signature on the raw bytes
    let header = signature_header
        .ok_or_else(|| IngestError::InvalidSignature("missing signature header".into()))?;
    giftledger_crypto::verify_webhook_signature(
        header,
        body,
        &state.settings.stripe_webhook_secret,
        state.settings.webhook_tolerance_secs,
        Utc::now().timestamp(),
    )
    .map_err(|e| IngestError::InvalidSignature(e.to_string()))?;

    // Step 2: Parse the envelope
    let raw: RawEvent =
        serde_json::from_slice(body).map_err(|e| IngestError::Malformed(e.to_string()))?;
    let mut event = WebhookEvent::from_raw(&raw);

    // Step 3: Network lookups happen before the transaction opens
    resolve_dispute_intent(state, &mut event).await;

    // Step 4: Claim, apply and record in one transaction
    match apply_in_transaction(state, &raw, &event).await {
        Ok(Some(applied)) => {
            let outcome = match applied.note {
                Some(note) => IngestOutcome::Ignored(note),
                None => IngestOutcome::Processed,
            };
            tracing::info!(event_id = %raw.id, event_type = %raw.event_type, outcome = ?outcome, "Webhook event handled");
            // Step 5: Side effects after commit
            crate::notify::dispatch(state, applied.notifications).await;
            Ok(outcome)
        }
        Ok(None) => {
            tracing::info!(event_id = %raw.id, event_type = %raw.event_type, "Duplicate webhook delivery");
            Ok(IngestOutcome::Duplicate)
        }
        Err(message) => {
            tracing::error!(event_id = %raw.id, event_type = %raw.event_type, "Webhook handler failed: {}", message);
            if let Err(e) = mark_failed(&state.pool, &raw.id, &raw.event_type, &message).await {
                tracing::error!(event_id = %raw.id, "Failed to record webhook failure: {}", e);
            }
            Err(IngestError::Failed {
                event_id: raw.id.clone(),
                message,
            })
        }
    }
}

/// Fills in a dispute's payment intent from its charge when the event lacks
/// one. Lookup failures leave the event unchanged.
async fn resolve_dispute_intent(state: &AppState, event: &mut WebhookEvent) {
    if let WebhookEvent::Dispute {
        locator,
        charge_id: Some(charge_id),
        ..
    } = event
    {
        if locator.payment_intent_id.is_none() && locator.order_id.is_none() {
            match state.payments.charge_payment_intent(charge_id).await {
                Ok(intent) => locator.payment_intent_id = intent,
                Err(e) => {
                    tracing::warn!(charge_id = %charge_id, "Could not resolve dispute charge: {}", e)
                }
            }
        }
    }
}

async fn apply_in_transaction(
    state: &AppState,
    raw: &RawEvent,
    event: &WebhookEvent,
) -> Result<Option<Applied>, String> {
    let mut tx = state
        .pool
        .begin()
        .await
        .map_err(|e| format!("Failed to begin transaction: {}", e))?;

    let claimed = claim_event(&mut *tx, &raw.id, &raw.event_type)
        .await
        .map_err(|e| format!("Failed to claim event: {}", e))?;
    if !claimed {
        tx.rollback()
            .await
            .map_err(|e| format!("Failed to roll back: {}", e))?;
        return Ok(None);
    }

    let applied = match apply_event(&mut *tx, state, event, Utc::now()).await {
        Ok(applied) => applied,
        Err(e) => {
            // Dropping the transaction rolls it back.
            return Err(e.to_string());
        }
    };

    mark_processed(&mut *tx, &raw.id, applied.note.as_deref())
        .await
        .map_err(|e| format!("Failed to mark event processed: {}", e))?;
    tx.commit()
        .await
        .map_err(|e| format!("Failed to commit: {}", e))?;

    Ok(Some(applied))
}

async fn find_order(conn: &mut PgConnection, locator: &OrderLocator) -> Result<Option<Uuid>, OrderError> {
    orders::resolve_order_id(
        conn,
        locator.order_id,
        locator.payment_intent_id.as_deref(),
        locator.checkout_session_id.as_deref(),
    )
    .await
}

async fn apply_event(
    conn: &mut PgConnection,
    state: &AppState,
    event: &WebhookEvent,
    now: DateTime<Utc>,
) -> Result<Applied, SettlementError> {
    let Some(locator) = event.locator() else {
        return Ok(Applied::ignored("unhandled_event_type"));
    };
    if let WebhookEvent::SessionCompleted { paid: false, .. } = event {
        return Ok(Applied::ignored("payment_not_completed"));
    }
    let Some(order_id) = find_order(conn, locator).await? else {
        tracing::warn!(locator = ?locator, "Webhook event does not match any order");
        return Ok(Applied::ignored("order_not_found"));
    };

    let refs = locator.refs();
    let result = match event {
        WebhookEvent::PaymentSucceeded(_) | WebhookEvent::SessionCompleted { .. } => {
            settlement::settle_paid(conn, &state.settings, order_id, &refs, ACTOR_PROVIDER, now)
                .await
                .map(|settled| match settled {
                    Some(paid) => Applied::done(vec![Notification::OrderPaid(paid)]),
                    None => Applied::ignored("already_paid"),
                })
        }
        WebhookEvent::PaymentFailed(_) | WebhookEvent::SessionPaymentFailed(_) => {
            settlement::settle_unpaid(
                conn,
                order_id,
                OrderStatus::Failed,
                &refs,
                ACTOR_PROVIDER,
                json!({ "payment_intent_id": refs.payment_intent_id }),
            )
            .await
            .map(|t| if t.applied() { Applied::done(vec![]) } else { Applied::ignored("already_failed") })
        }
        WebhookEvent::SessionExpired(_) => settlement::settle_unpaid(
            conn,
            order_id,
            OrderStatus::Expired,
            &refs,
            ACTOR_PROVIDER,
            json!({ "checkout_session_id": refs.checkout_session_id }),
        )
        .await
        .map(|t| if t.applied() { Applied::done(vec![]) } else { Applied::ignored("already_expired") }),
        WebhookEvent::ChargeRefunded {
            charge_id,
            amount_refunded_cents,
            full,
            ..
        } => settlement::record_refund(
            conn,
            order_id,
            *amount_refunded_cents,
            *full,
            ACTOR_PROVIDER,
            json!({ "charge_id": charge_id }),
        )
        .await
        .map(|n| match n {
            Some(n) => Applied::done(vec![n]),
            None if *full => Applied::ignored("already_refunded"),
            None => Applied::ignored("order_not_settled"),
        }),
        WebhookEvent::Dispute {
            dispute_id,
            charge_id,
            reason,
            created,
            ..
        } => settlement::record_dispute(
            conn,
            order_id,
            reason.clone(),
            ACTOR_PROVIDER,
            json!({ "dispute_id": dispute_id, "charge_id": charge_id, "reason": reason, "created": created }),
        )
        .await
        .map(|n| match n {
            Some(n) => Applied::done(vec![n]),
            None => Applied::done(vec![]),
        }),
        WebhookEvent::Unhandled => Ok(Applied::ignored("unhandled_event_type")),
    };

    match result {
        Err(SettlementError::Order(OrderError::InvalidTransition(rejected))) => {
            if rejected.to == OrderStatus::Paid {
                tracing::error!(
                    order_id = %order_id,
                    from = %rejected.from,
                    "Payment succeeded for a refunded or disputed order"
                );
            } else {
                tracing::warn!(order_id = %order_id, "Rejected order transition: {}", rejected);
            }
            orders::append_event(
                conn,
                &NewOrderEvent::new(
                    order_id,
                    ACTOR_PROVIDER,
                    "transition_rejected",
                    json!({ "from": rejected.from, "to": rejected.to }),
                ),
            )
            .await?;
            Ok(Applied::ignored(format!(
                "invalid_transition:{}->{}",
                rejected.from, rejected.to
            )))
        }
        other => other,
    }
}
