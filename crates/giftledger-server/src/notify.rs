//! Post-commit email dispatch for settlement notifications.

use crate::emails;
use crate::models::Locale;
use crate::money::format_cents;
use crate::settlement::{Notification, PaidSettlement};
use crate::state::AppState;

/// Sends every notification. Failures are logged per email and never
/// surface to the caller.
pub async fn dispatch(state: &AppState, notifications: Vec<Notification>) {
    for notification in notifications {
        match notification {
            Notification::OrderPaid(settlement) => paid(state, &settlement).await,
            Notification::Refund {
                order_id,
                refunded_cents,
                currency,
                full,
            } => {
                if let Some(admin) = admin_address(state) {
                    let email = emails::admin_refund(
                        &state.branding(),
                        &order_id.to_string(),
                        &format_cents(refunded_cents, &currency),
                        full,
                    );
                    crate::mailer::deliver(&state.pool, state.mailer.as_ref(), &admin, &email, Some(order_id))
                        .await;
                }
            }
            Notification::Dispute { order_id, reason } => {
                if let Some(admin) = admin_address(state) {
                    let email =
                        emails::admin_dispute(&state.branding(), &order_id.to_string(), reason.as_deref());
                    crate::mailer::deliver(&state.pool, state.mailer.as_ref(), &admin, &email, Some(order_id))
                        .await;
                }
            }
        }
    }
}

fn admin_address(state: &AppState) -> Option<String> {
    state
        .settings
        .admin_email
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

async fn paid(state: &AppState, settlement: &PaidSettlement) {
    let order = &settlement.order;
    let locale = Locale::from_code_or_default(Some(&order.locale));
    let branding = state.branding();
    let total = format_cents(order.total_cents, &order.currency);

    if let Some(to) = settlement.customer_email.as_deref() {
        let email = emails::order_paid(&branding, locale, &total);
        crate::mailer::deliver(&state.pool, state.mailer.as_ref(), to, &email, Some(order.id)).await;
    }

    for issued in &settlement.issued {
        let Some(to) = issued.deliver_to.as_deref() else {
            tracing::warn!(
                order_id = %order.id,
                gift_card_id = %issued.card.id,
                "Issued gift card has no delivery address"
            );
            continue;
        };
        let email = emails::gift_card_recipient(
            &branding,
            locale,
            &issued.code,
            &format_cents(issued.card.initial_amount_cents, &issued.card.currency),
            &issued.card.expires_at.format("%Y-%m-%d").to_string(),
        );
        crate::mailer::deliver(&state.pool, state.mailer.as_ref(), to, &email, Some(order.id)).await;
    }

    if let Some(admin) = admin_address(state) {
        let email = emails::admin_new_order_paid(&branding, &order.id.to_string(), &total);
        crate::mailer::deliver(&state.pool, state.mailer.as_ref(), &admin, &email, Some(order.id)).await;
    }
}
