//! Integration tests for the gift card ledger and reservations.
//!
//! Run with: cargo test --test ledger_integration -- --ignored

mod common;

use chrono::{Duration, Utc};
use giftledger_server::ledger::{self, ConsumeOutcome, LedgerError};
use giftledger_server::models::GiftCardStatus;
use giftledger_server::sweeper;

use common::{create_test_pool, remaining, seed_card, seed_pending_order};

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_reserve_then_consume_reconciles() {
    let pool = create_test_pool().await;
    let (card, _) = seed_card(&pool, 5000).await;
    let order_id = seed_pending_order(&pool, 2000, 2000).await;
    let now = Utc::now();

    let mut tx = pool.begin().await.unwrap();
    ledger::reserve(&mut *tx, card.id, order_id, 2000, 1800, now)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    // Held but not spent
    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(remaining(&pool, card.id).await, 5000);
    assert_eq!(ledger::available_balance(&mut *conn, card.id, now).await.unwrap(), 3000);
    assert!(ledger::audit(&mut *conn, card.id).await.unwrap().consistent);

    let mut tx = pool.begin().await.unwrap();
    let outcome = ledger::consume(&mut *tx, order_id, now).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(
        outcome,
        ConsumeOutcome::Consumed {
            gift_card_id: card.id,
            amount_cents: 2000
        }
    );
    assert_eq!(remaining(&pool, card.id).await, 3000);

    // A second consume is a no-op
    let mut tx = pool.begin().await.unwrap();
    let again = ledger::consume(&mut *tx, order_id, now).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(again, ConsumeOutcome::AlreadyConsumed { gift_card_id: card.id });
    assert_eq!(remaining(&pool, card.id).await, 3000);

    let audit = ledger::audit(&mut *conn, card.id).await.unwrap();
    assert!(audit.consistent);
    assert_eq!(audit.ledger_sum_cents, 3000);
    assert_eq!(audit.active_holds_cents, 0);
    let types: Vec<&str> = ledger::entries(&mut *conn, card.id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.entry_type.as_str())
        .collect();
    assert_eq!(types, vec!["issue", "reserve", "consume"]);
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_concurrent_reservations_cannot_overspend() {
    let pool = create_test_pool().await;
    let (card, _) = seed_card(&pool, 1000).await;
    let first = seed_pending_order(&pool, 1000, 1000).await;
    let second = seed_pending_order(&pool, 1000, 1000).await;

    let attempt = |order_id| {
        let pool = pool.clone();
        let card_id = card.id;
        tokio::spawn(async move {
            let mut tx = pool.begin().await.unwrap();
            let result = ledger::reserve(&mut *tx, card_id, order_id, 1000, 1800, Utc::now()).await;
            tx.commit().await.unwrap();
            result
        })
    };
    let (a, b) = tokio::join!(attempt(first), attempt(second));
    let results = [a.unwrap(), b.unwrap()];

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let short = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::InsufficientBalance { .. })))
        .count();
    assert_eq!(ok, 1);
    assert_eq!(short, 1);
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_release_is_idempotent() {
    let pool = create_test_pool().await;
    let (card, _) = seed_card(&pool, 4000).await;
    let order_id = seed_pending_order(&pool, 1500, 1500).await;
    let now = Utc::now();

    let mut tx = pool.begin().await.unwrap();
    ledger::reserve(&mut *tx, card.id, order_id, 1500, 1800, now)
        .await
        .unwrap();
    assert!(ledger::release(&mut *tx, order_id).await.unwrap().is_some());
    assert!(ledger::release(&mut *tx, order_id).await.unwrap().is_none());
    tx.commit().await.unwrap();

    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(ledger::available_balance(&mut *conn, card.id, now).await.unwrap(), 4000);
    let audit = ledger::audit(&mut *conn, card.id).await.unwrap();
    assert!(audit.consistent);
    assert_eq!(audit.ledger_sum_cents, 4000);

    // Releasing an order that never held anything is also fine
    let untouched = seed_pending_order(&pool, 100, 0).await;
    assert!(ledger::release(&mut *conn, untouched).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_sweeper_releases_lapsed_holds() {
    let pool = create_test_pool().await;
    let (card, _) = seed_card(&pool, 3000).await;
    let order_id = seed_pending_order(&pool, 3000, 3000).await;
    let long_ago = Utc::now() - Duration::hours(2);

    let mut tx = pool.begin().await.unwrap();
    let reservation = ledger::reserve(&mut *tx, card.id, order_id, 3000, 60, long_ago)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let report = sweeper::sweep_expired(&pool, Utc::now(), 1000).await.unwrap();
    assert!(report.released >= 1);

    let status: String =
        sqlx::query_scalar("SELECT status::TEXT FROM gift_card_reservations WHERE id = $1")
            .bind(reservation.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "released");

    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(
        ledger::available_balance(&mut *conn, card.id, Utc::now()).await.unwrap(),
        3000
    );
    assert!(ledger::audit(&mut *conn, card.id).await.unwrap().consistent);
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_consume_after_sweep_re_reserves() {
    let pool = create_test_pool().await;
    let (card, _) = seed_card(&pool, 2500).await;
    let order_id = seed_pending_order(&pool, 2000, 2000).await;

    let mut tx = pool.begin().await.unwrap();
    ledger::reserve(&mut *tx, card.id, order_id, 2000, 60, Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    tx.commit().await.unwrap();
    sweeper::sweep_expired(&pool, Utc::now(), 1000).await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let outcome = ledger::consume(&mut *tx, order_id, Utc::now()).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(
        outcome,
        ConsumeOutcome::Consumed {
            gift_card_id: card.id,
            amount_cents: 2000
        }
    );
    assert_eq!(remaining(&pool, card.id).await, 500);
    let mut conn = pool.acquire().await.unwrap();
    assert!(ledger::audit(&mut *conn, card.id).await.unwrap().consistent);
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_consume_after_sweep_reports_shortfall() {
    let pool = create_test_pool().await;
    let (card, _) = seed_card(&pool, 2000).await;
    let lapsed_order = seed_pending_order(&pool, 2000, 2000).await;
    let other_order = seed_pending_order(&pool, 1500, 1500).await;

    let mut tx = pool.begin().await.unwrap();
    ledger::reserve(&mut *tx, card.id, lapsed_order, 2000, 60, Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    // A later checkout takes part of the balance the lapsed hold released.
    let mut tx = pool.begin().await.unwrap();
    ledger::reserve(&mut *tx, card.id, other_order, 1500, 1800, Utc::now())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let outcome = ledger::consume(&mut *tx, lapsed_order, Utc::now()).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(
        outcome,
        ConsumeOutcome::Lapsed {
            gift_card_id: card.id,
            amount_cents: 2000,
            available_cents: 500
        }
    );
    assert_eq!(remaining(&pool, card.id).await, 2000);
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_adjust_respects_holds_and_depletion() {
    let pool = create_test_pool().await;
    let (card, _) = seed_card(&pool, 2000).await;
    let order_id = seed_pending_order(&pool, 1500, 1500).await;

    let mut tx = pool.begin().await.unwrap();
    ledger::reserve(&mut *tx, card.id, order_id, 1500, 1800, Utc::now())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    // Cannot drop below what is held
    let mut tx = pool.begin().await.unwrap();
    let err = ledger::adjust(&mut *tx, card.id, -1000, "admin", None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::BelowActiveHolds { remaining: 1000, held: 1500 }));
    tx.rollback().await.unwrap();

    // Release, then drain to zero and restore
    let mut tx = pool.begin().await.unwrap();
    ledger::release(&mut *tx, order_id).await.unwrap();
    let drained = ledger::adjust(&mut *tx, card.id, -2000, "admin", Some("chargeback".into()))
        .await
        .unwrap();
    assert_eq!(drained.status, GiftCardStatus::Depleted);
    let restored = ledger::adjust(&mut *tx, card.id, 700, "admin", None).await.unwrap();
    assert_eq!(restored.status, GiftCardStatus::Active);
    assert_eq!(restored.remaining_amount_cents, 700);
    tx.commit().await.unwrap();

    let mut conn = pool.acquire().await.unwrap();
    assert!(ledger::audit(&mut *conn, card.id).await.unwrap().consistent);
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_disabled_card_cannot_be_reserved() {
    let pool = create_test_pool().await;
    let (card, _) = seed_card(&pool, 2000).await;
    let order_id = seed_pending_order(&pool, 1000, 1000).await;

    let mut tx = pool.begin().await.unwrap();
    let disabled = ledger::set_status(&mut *tx, card.id, GiftCardStatus::Disabled)
        .await
        .unwrap();
    assert_eq!(disabled.status, GiftCardStatus::Disabled);
    let err = ledger::reserve(&mut *tx, card.id, order_id, 1000, 1800, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotRedeemable(_)));

    let err = ledger::set_status(&mut *tx, card.id, GiftCardStatus::Expired)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::StatusNotSettable("expired")));
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_ledger_rejects_mutation() {
    let pool = create_test_pool().await;
    let (card, _) = seed_card(&pool, 1000).await;

    let result = sqlx::query("UPDATE gift_card_ledger SET amount_cents = 1 WHERE gift_card_id = $1")
        .bind(card.id)
        .execute(&pool)
        .await;
    assert!(result.is_err());

    let result = sqlx::query("DELETE FROM gift_card_ledger WHERE gift_card_id = $1")
        .bind(card.id)
        .execute(&pool)
        .await;
    assert!(result.is_err());
}
