//! Order audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Actor recorded for events written by webhook processing.
pub const ACTOR_PROVIDER: &str = "stripe";
/// Actor recorded for events written by the server itself.
pub const ACTOR_SYSTEM: &str = "system";
/// Actor recorded for events written through the admin surface.
pub const ACTOR_ADMIN: &str = "admin";

/// An append-only audit row attached to an order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderEvent {
    pub id: Uuid,
    pub order_id: Uuid,
    /// Who caused the event (`stripe`, `system`, `admin`).
    pub actor_type: String,
    /// What happened, e.g. `status_changed`, `refund_partial`.
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Data required to append an audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderEvent {
    pub order_id: Uuid,
    pub actor_type: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl NewOrderEvent {
    pub fn new(
        order_id: Uuid,
        actor_type: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            order_id,
            actor_type: actor_type.to_string(),
            event_type: event_type.to_string(),
            payload,
        }
    }
}
