//! Provider webhook events.
//!
//! The raw envelope is `{id, type, data: {object}}`. [`WebhookEvent`] is the
//! closed set of kinds the settlement core reacts to; anything else parses
//! to [`WebhookEvent::Unhandled`] and is acknowledged without effect.

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::orders::ProviderRefs;

/// Event envelope as delivered.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: RawEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEventData {
    pub object: Value,
}

/// How the event names its order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderLocator {
    /// `metadata.order_id` when present and well-formed.
    pub order_id: Option<Uuid>,
    pub payment_intent_id: Option<String>,
    pub checkout_session_id: Option<String>,
    pub provider_customer_id: Option<String>,
}

impl OrderLocator {
    /// Identifiers worth storing on the order.
    pub fn refs(&self) -> ProviderRefs {
        ProviderRefs {
            payment_intent_id: self.payment_intent_id.clone(),
            checkout_session_id: self.checkout_session_id.clone(),
            provider_customer_id: self.provider_customer_id.clone(),
        }
    }
}

/// Event kinds the ingestor dispatches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// `payment_intent.succeeded`
    PaymentSucceeded(OrderLocator),
    /// `payment_intent.payment_failed`
    PaymentFailed(OrderLocator),
    /// `checkout.session.completed` and
    /// `checkout.session.async_payment_succeeded`. `paid` is false while
    /// the session's payment is still outstanding.
    SessionCompleted { locator: OrderLocator, paid: bool },
    /// `checkout.session.async_payment_failed`
    SessionPaymentFailed(OrderLocator),
    /// `checkout.session.expired`
    SessionExpired(OrderLocator),
    /// `charge.refunded`
    ChargeRefunded {
        locator: OrderLocator,
        charge_id: Option<String>,
        amount_refunded_cents: i64,
        full: bool,
    },
    /// `charge.dispute.created` / `charge.dispute.updated`
    Dispute {
        locator: OrderLocator,
        dispute_id: Option<String>,
        charge_id: Option<String>,
        reason: Option<String>,
        created: bool,
    },
    /// Anything else.
    Unhandled,
}

fn str_field(object: &Value, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Reads an id field that may be a bare id or an expanded object.
fn id_field(object: &Value, key: &str) -> Option<String> {
    match object.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Object(_)) => object.get(key).and_then(|o| str_field(o, "id")),
        _ => None,
    }
}

fn metadata_order_id(object: &Value) -> Option<Uuid> {
    object
        .get("metadata")
        .and_then(|m| m.get("order_id"))
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
}

fn payment_intent_locator(object: &Value) -> OrderLocator {
    OrderLocator {
        order_id: metadata_order_id(object),
        payment_intent_id: str_field(object, "id"),
        checkout_session_id: None,
        provider_customer_id: id_field(object, "customer"),
    }
}

fn session_locator(object: &Value) -> OrderLocator {
    OrderLocator {
        order_id: metadata_order_id(object)
            .or_else(|| str_field(object, "client_reference_id").and_then(|s| Uuid::parse_str(&s).ok())),
        payment_intent_id: id_field(object, "payment_intent"),
        checkout_session_id: str_field(object, "id"),
        provider_customer_id: id_field(object, "customer"),
    }
}

fn charge_locator(object: &Value) -> OrderLocator {
    OrderLocator {
        order_id: metadata_order_id(object),
        payment_intent_id: id_field(object, "payment_intent"),
        checkout_session_id: None,
        provider_customer_id: id_field(object, "customer"),
    }
}

impl WebhookEvent {
    /// Maps a raw envelope to an event kind.
    pub fn from_raw(raw: &RawEvent) -> Self {
        let object = &raw.data.object;
        match raw.event_type.as_str() {
            "payment_intent.succeeded" => Self::PaymentSucceeded(payment_intent_locator(object)),
            "payment_intent.payment_failed" => Self::PaymentFailed(payment_intent_locator(object)),
            "checkout.session.completed" => Self::SessionCompleted {
                locator: session_locator(object),
                paid: str_field(object, "payment_status").as_deref() != Some("unpaid"),
            },
            "checkout.session.async_payment_succeeded" => Self::SessionCompleted {
                locator: session_locator(object),
                paid: true,
            },
            "checkout.session.async_payment_failed" => {
                Self::SessionPaymentFailed(session_locator(object))
            }
            "checkout.session.expired" => Self::SessionExpired(session_locator(object)),
            "charge.refunded" => {
                let amount = object.get("amount").and_then(Value::as_i64).unwrap_or(0);
                let refunded = object
                    .get("amount_refunded")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                let full = object
                    .get("refunded")
                    .and_then(Value::as_bool)
                    .unwrap_or(amount > 0 && refunded >= amount);
                Self::ChargeRefunded {
                    locator: charge_locator(object),
                    charge_id: str_field(object, "id"),
                    amount_refunded_cents: refunded,
                    full,
                }
            }
            "charge.dispute.created" | "charge.dispute.updated" => Self::Dispute {
                locator: charge_locator(object),
                dispute_id: str_field(object, "id"),
                charge_id: id_field(object, "charge"),
                reason: str_field(object, "reason"),
                created: raw.event_type == "charge.dispute.created",
            },
            _ => Self::Unhandled,
        }
    }

    /// The order locator, for kinds that carry one.
    pub fn locator(&self) -> Option<&OrderLocator> {
        match self {
            Self::PaymentSucceeded(l)
            | Self::PaymentFailed(l)
            | Self::SessionPaymentFailed(l)
            | Self::SessionExpired(l) => Some(l),
            Self::SessionCompleted { locator, .. }
            | Self::ChargeRefunded { locator, .. }
            | Self::Dispute { locator, .. } => Some(locator),
            Self::Unhandled => None,
        }
    }
}
