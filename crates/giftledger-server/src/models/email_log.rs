//! Outbound email log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Delivery outcome of an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "email_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EmailStatus {
    Sent,
    Failed,
}

/// A logged email attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmailLog {
    pub id: Uuid,
    pub to_email: String,
    /// Template key, e.g. `order_paid`.
    pub template: String,
    pub locale: String,
    pub related_order_id: Option<Uuid>,
    pub provider_message_id: Option<String>,
    pub status: EmailStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
