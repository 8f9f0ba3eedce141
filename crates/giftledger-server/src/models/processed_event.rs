//! Idempotency ledger for provider webhook deliveries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

/// Processing state of a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "processed_event_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProcessedEventStatus {
    /// Claimed by an in-flight transaction.
    Processing,
    /// Handled. Redeliveries are duplicates.
    Processed,
    /// Handler failed. A redelivery may claim it again.
    Failed,
}

/// One row per provider event id.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub event_type: String,
    pub status: ProcessedEventStatus,
    /// Number of claims, including the first.
    pub attempts: i32,
    pub last_error: Option<String>,
    /// Why an event was acknowledged without effect.
    pub note: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ProcessedEvent {
    /// Check if the event may be claimed again.
    pub fn is_retryable(&self) -> bool {
        self.status == ProcessedEventStatus::Failed
    }
}
