//! Background release of gift card holds whose TTL has passed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::ledger::{self, LedgerError};

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Lapsed holds found.
    pub scanned: usize,
    /// Holds actually released.
    pub released: usize,
    /// Holds that failed to release and will be retried next sweep.
    pub failed: usize,
}

/// Releases up to `batch_size` lapsed holds, each in its own transaction.
///
/// A hold consumed or released concurrently is skipped, not counted as a
/// failure.
pub async fn sweep_expired(
    pool: &PgPool,
    now: DateTime<Utc>,
    batch_size: i64,
) -> Result<SweepReport, sqlx::Error> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id
        FROM gift_card_reservations
        WHERE status = 'active' AND expires_at <= $1
        ORDER BY expires_at
        LIMIT $2
        "#,
    )
    .bind(now)
    .bind(batch_size.max(1))
    .fetch_all(pool)
    .await?;

    let mut report = SweepReport {
        scanned: ids.len(),
        ..SweepReport::default()
    };

    for id in ids {
        match release_one(pool, id, now).await {
            Ok(true) => report.released += 1,
            Ok(false) => {}
            Err(e) => {
                report.failed += 1;
                tracing::error!(reservation_id = %id, "Failed to release lapsed hold: {}", e);
            }
        }
    }

    if report.scanned > 0 {
        tracing::info!(
            scanned = report.scanned,
            released = report.released,
            failed = report.failed,
            "Swept lapsed gift card holds"
        );
    }
    Ok(report)
}

async fn release_one(pool: &PgPool, reservation_id: Uuid, now: DateTime<Utc>) -> Result<bool, LedgerError> {
    let mut tx = pool.begin().await?;
    let released = ledger::release_if_lapsed(&mut *tx, reservation_id, now).await?;
    tx.commit().await?;
    Ok(released)
}

/// Runs [`sweep_expired`] every `interval_secs` until the runtime stops.
pub fn spawn_sweeper(pool: PgPool, interval_secs: u64, batch_size: i64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_expired(&pool, Utc::now(), batch_size).await {
                tracing::error!("Reservation sweep failed: {}", e);
            }
        }
    })
}
