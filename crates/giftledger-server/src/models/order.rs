//! Order model and its lifecycle graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Possible states of an order in its lifecycle.
///
/// ```text
/// pending ──► paid ──► refunded
///    │          └────► disputed
///    ├──► failed
///    └──► expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Created at checkout, waiting for the payment provider.
    Pending,
    /// Payment confirmed. Fulfillment side effects have fired.
    Paid,
    /// Payment attempt failed.
    Failed,
    /// Hosted checkout session expired unpaid.
    Expired,
    /// Charge fully refunded after payment.
    Refunded,
    /// Charge disputed after payment.
    Disputed,
}

/// Outcome of checking a requested transition against the lifecycle graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCheck {
    /// The edge exists; apply it and run its side effects.
    Apply,
    /// The order is already in the requested state. Nothing to do.
    AlreadyApplied,
}

/// A requested edge that is not part of the lifecycle graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid order transition {from} -> {to}")]
pub struct TransitionError {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl OrderStatus {
    /// Parse a status from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            "refunded" => Some(Self::Refunded),
            "disputed" => Some(Self::Disputed),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Refunded => "refunded",
            Self::Disputed => "disputed",
        }
    }

    /// States with no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Refunded | Self::Disputed)
    }

    /// Whether `self -> to` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Paid)
                | (Self::Pending, Self::Failed)
                | (Self::Pending, Self::Expired)
                // The provider confirmed a charge after a decline or timeout.
                | (Self::Failed, Self::Paid)
                | (Self::Expired, Self::Paid)
                | (Self::Paid, Self::Refunded)
                | (Self::Paid, Self::Disputed)
        )
    }

    /// Checks a requested transition.
    ///
    /// Repeating the current state is `AlreadyApplied` for every state except
    /// `pending`, which is never a target.
    pub fn check_transition(&self, to: OrderStatus) -> Result<TransitionCheck, TransitionError> {
        if self.can_transition_to(to) {
            return Ok(TransitionCheck::Apply);
        }
        if *self == to && to != Self::Pending {
            return Ok(TransitionCheck::AlreadyApplied);
        }
        Err(TransitionError { from: *self, to })
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A storefront order. Financial fields are a snapshot taken at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    /// Unique identifier for this order.
    pub id: Uuid,
    /// Customer who placed the order.
    pub customer_id: Uuid,
    /// Current lifecycle state.
    pub status: OrderStatus,
    /// Locale the order was placed in (`lt` or `en`).
    pub locale: String,
    /// Sum of line totals, in cents.
    pub subtotal_cents: i64,
    /// Gift-card discount applied, in cents.
    pub discount_cents: i64,
    /// Amount charged by the provider, in cents.
    pub total_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Provider payment intent, when one was created or reported.
    pub payment_intent_id: Option<String>,
    /// Provider hosted checkout session, when one was created.
    pub checkout_session_id: Option<String>,
    /// Provider customer reference reported by webhooks.
    pub provider_customer_id: Option<String>,
    /// Operator-managed fulfillment metadata.
    pub fulfillment: serde_json::Value,
    /// When this order was created.
    pub created_at: DateTime<Utc>,
    /// When this order was last modified.
    pub updated_at: DateTime<Utc>,
    /// When payment was confirmed.
    pub paid_at: Option<DateTime<Utc>>,
}

/// Data required to create a new order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_id: Uuid,
    pub locale: String,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub currency: String,
}

impl Order {
    /// Check if the order is waiting for payment.
    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    /// Check if the order has been paid.
    pub fn is_paid(&self) -> bool {
        self.status == OrderStatus::Paid
    }

    /// Check if the discount covers the whole subtotal.
    pub fn is_zero_total(&self) -> bool {
        self.total_cents == 0
    }
}

impl NewOrder {
    /// Create a pending order snapshot. `total_cents` is derived.
    pub fn new(
        customer_id: Uuid,
        locale: String,
        subtotal_cents: i64,
        discount_cents: i64,
        currency: String,
    ) -> Self {
        Self {
            customer_id,
            locale,
            subtotal_cents,
            discount_cents,
            total_cents: crate::money::total_after_discount(subtotal_cents, discount_cents),
            currency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Failed,
        OrderStatus::Expired,
        OrderStatus::Refunded,
        OrderStatus::Disputed,
    ];

    #[test]
    fn test_order_status_serialization() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&OrderStatus::Disputed).unwrap(),
            "\"disputed\""
        );
        for status in ALL {
            assert_eq!(OrderStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::from_str("cancelled"), None);
    }

    #[test]
    fn test_lifecycle_edges() {
        use OrderStatus::*;
        let edges = [
            (Pending, Paid),
            (Pending, Failed),
            (Pending, Expired),
            (Failed, Paid),
            (Expired, Paid),
            (Paid, Refunded),
            (Paid, Disputed),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    edges.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_repeat_paid_is_already_applied() {
        assert_eq!(
            OrderStatus::Paid.check_transition(OrderStatus::Paid),
            Ok(TransitionCheck::AlreadyApplied)
        );
        assert_eq!(
            OrderStatus::Failed.check_transition(OrderStatus::Failed),
            Ok(TransitionCheck::AlreadyApplied)
        );
    }

    #[test]
    fn test_terminal_states_reject_other_edges() {
        let err = OrderStatus::Refunded
            .check_transition(OrderStatus::Paid)
            .unwrap_err();
        assert_eq!(err.from, OrderStatus::Refunded);
        assert_eq!(err.to, OrderStatus::Paid);
        assert!(OrderStatus::Failed
            .check_transition(OrderStatus::Expired)
            .is_err());
        assert!(OrderStatus::Expired
            .check_transition(OrderStatus::Failed)
            .is_err());
        assert!(OrderStatus::Refunded
            .check_transition(OrderStatus::Disputed)
            .is_err());
        assert!(OrderStatus::Paid
            .check_transition(OrderStatus::Pending)
            .is_err());
        assert!(OrderStatus::Pending
            .check_transition(OrderStatus::Pending)
            .is_err());
        assert!(OrderStatus::Pending
            .check_transition(OrderStatus::Refunded)
            .is_err());
    }

    #[test]
    fn test_terminal_flags() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Paid.is_terminal());
        assert!(!OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::Expired.is_terminal());
        assert!(OrderStatus::Refunded.is_terminal());
        assert!(OrderStatus::Disputed.is_terminal());
    }

    #[test]
    fn test_late_payment_recovers_unpaid_orders() {
        assert_eq!(
            OrderStatus::Failed.check_transition(OrderStatus::Paid),
            Ok(TransitionCheck::Apply)
        );
        assert_eq!(
            OrderStatus::Expired.check_transition(OrderStatus::Paid),
            Ok(TransitionCheck::Apply)
        );
    }

    #[test]
    fn test_new_order_derives_total() {
        let order = NewOrder::new(Uuid::new_v4(), "lt".into(), 5_000, 5_000, "EUR".into());
        assert_eq!(order.total_cents, 0);
        let order = NewOrder::new(Uuid::new_v4(), "en".into(), 10_000, 2_500, "EUR".into());
        assert_eq!(order.total_cents, 7_500);
    }
}
