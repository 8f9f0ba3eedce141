//! Order persistence and the state machine's database side.
//!
//! `transition` is the only place an order's status is written. It locks the
//! order row, checks the requested edge against [`OrderStatus`]'s lifecycle
//! graph and appends an audit row in the same transaction.

use serde_json::{json, Value};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::{
    NewOrder, NewOrderEvent, NewOrderItem, Order, OrderEvent, OrderItem, OrderStatus,
    TransitionCheck, TransitionError,
};

/// Errors raised by order operations.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("order not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A status change that was checked and, for `Apply`, written.
#[derive(Debug, Clone)]
pub struct Transition {
    /// The order after the change.
    pub order: Order,
    pub from: OrderStatus,
    pub check: TransitionCheck,
}

impl Transition {
    /// Whether this call moved the order. Side effects run only when true.
    pub fn applied(&self) -> bool {
        self.check == TransitionCheck::Apply
    }
}

/// Provider identifiers reported alongside a status signal.
#[derive(Debug, Clone, Default)]
pub struct ProviderRefs {
    pub payment_intent_id: Option<String>,
    pub checkout_session_id: Option<String>,
    pub provider_customer_id: Option<String>,
}

const ORDER_COLUMNS: &str = r#"
    id, customer_id, status, locale, subtotal_cents, discount_cents, total_cents, currency,
    payment_intent_id, checkout_session_id, provider_customer_id, fulfillment,
    created_at, updated_at, paid_at
"#;

/// Inserts an order and its line items.
pub async fn create_order(
    conn: &mut PgConnection,
    new_order: &NewOrder,
    items: &[NewOrderItem],
) -> Result<(Order, Vec<OrderItem>), OrderError> {
    let order = sqlx::query_as::<_, Order>(&format!(
        r#"
        INSERT INTO orders (customer_id, status, locale, subtotal_cents, discount_cents, total_cents, currency)
        VALUES ($1, 'pending', $2, $3, $4, $5, $6)
        RETURNING {}
        "#,
        ORDER_COLUMNS
    ))
    .bind(new_order.customer_id)
    .bind(&new_order.locale)
    .bind(new_order.subtotal_cents)
    .bind(new_order.discount_cents)
    .bind(new_order.total_cents)
    .bind(&new_order.currency)
    .fetch_one(&mut *conn)
    .await?;

    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let row = sqlx::query_as::<_, OrderItem>(
            r#"
            INSERT INTO order_items (order_id, kind, product_id, name, unit_price_cents, qty, meta)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, order_id, kind, product_id, name, unit_price_cents, qty, meta, created_at
            "#,
        )
        .bind(order.id)
        .bind(item.kind)
        .bind(&item.product_id)
        .bind(&item.name)
        .bind(item.unit_price_cents)
        .bind(item.qty)
        .bind(&item.meta)
        .fetch_one(&mut *conn)
        .await?;
        rows.push(row);
    }

    append_event(
        conn,
        &NewOrderEvent::new(
            order.id,
            crate::models::order_event::ACTOR_SYSTEM,
            "order_created",
            json!({
                "subtotal_cents": order.subtotal_cents,
                "discount_cents": order.discount_cents,
                "total_cents": order.total_cents,
            }),
        ),
    )
    .await?;

    Ok((order, rows))
}

/// Loads an order without locking it.
pub async fn get_order(conn: &mut PgConnection, order_id: Uuid) -> Result<Order, OrderError> {
    sqlx::query_as::<_, Order>(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(OrderError::NotFound(order_id))
}

/// Locks an order row for the rest of the transaction.
pub async fn lock_order(conn: &mut PgConnection, order_id: Uuid) -> Result<Order, OrderError> {
    sqlx::query_as::<_, Order>(&format!(
        "SELECT {} FROM orders WHERE id = $1 FOR UPDATE",
        ORDER_COLUMNS
    ))
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(OrderError::NotFound(order_id))
}

/// Line items of an order in insertion order.
pub async fn items_for_order(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> Result<Vec<OrderItem>, OrderError> {
    let items = sqlx::query_as::<_, OrderItem>(
        r#"
        SELECT id, order_id, kind, product_id, name, unit_price_cents, qty, meta, created_at
        FROM order_items
        WHERE order_id = $1
        ORDER BY created_at, id
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(items)
}

/// Resolves an order from provider identifiers.
///
/// `order_id` from event metadata wins; otherwise the stored payment intent
/// or checkout session is matched.
pub async fn resolve_order_id(
    conn: &mut PgConnection,
    order_id: Option<Uuid>,
    payment_intent_id: Option<&str>,
    checkout_session_id: Option<&str>,
) -> Result<Option<Uuid>, OrderError> {
    if let Some(id) = order_id {
        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        if exists.is_some() {
            return Ok(exists);
        }
    }

    if payment_intent_id.is_none() && checkout_session_id.is_none() {
        return Ok(None);
    }

    let found: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM orders
        WHERE ($1::TEXT IS NOT NULL AND payment_intent_id = $1)
           OR ($2::TEXT IS NOT NULL AND checkout_session_id = $2)
        LIMIT 1
        "#,
    )
    .bind(payment_intent_id)
    .bind(checkout_session_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(found)
}

/// Stores provider identifiers the order does not have yet.
pub async fn record_provider_refs(
    conn: &mut PgConnection,
    order_id: Uuid,
    refs: &ProviderRefs,
) -> Result<(), OrderError> {
    sqlx::query(
        r#"
        UPDATE orders
        SET payment_intent_id = COALESCE(payment_intent_id, $2),
            checkout_session_id = COALESCE(checkout_session_id, $3),
            provider_customer_id = COALESCE($4, provider_customer_id),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(order_id)
    .bind(&refs.payment_intent_id)
    .bind(&refs.checkout_session_id)
    .bind(&refs.provider_customer_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Moves an order to `to` if the lifecycle graph allows it.
///
/// `AlreadyApplied` leaves the row untouched. Invalid edges return
/// `OrderError::InvalidTransition` without writing anything.
pub async fn transition(
    conn: &mut PgConnection,
    order_id: Uuid,
    to: OrderStatus,
    actor: &str,
    payload: Value,
) -> Result<Transition, OrderError> {
    let order = lock_order(conn, order_id).await?;
    let from = order.status;
    let check = from.check_transition(to)?;

    if check == TransitionCheck::AlreadyApplied {
        tracing::info!(order_id = %order_id, status = %to, "Order already in requested state");
        return Ok(Transition { order, from, check });
    }

    let updated = sqlx::query_as::<_, Order>(&format!(
        r#"
        UPDATE orders
        SET status = $2,
            paid_at = CASE WHEN $2 = 'paid'::order_status THEN NOW() ELSE paid_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        ORDER_COLUMNS
    ))
    .bind(order_id)
    .bind(to)
    .fetch_one(&mut *conn)
    .await?;

    append_event(
        conn,
        &NewOrderEvent::new(
            order_id,
            actor,
            "status_changed",
            json!({ "from": from, "to": to, "details": payload }),
        ),
    )
    .await?;

    tracing::info!(order_id = %order_id, from = %from, to = %to, "Order status changed");

    Ok(Transition {
        order: updated,
        from,
        check,
    })
}

/// Appends an audit row.
pub async fn append_event(conn: &mut PgConnection, event: &NewOrderEvent) -> Result<Uuid, OrderError> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO order_events (order_id, actor_type, event_type, payload)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(event.order_id)
    .bind(&event.actor_type)
    .bind(&event.event_type)
    .bind(&event.payload)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Audit rows of an order, oldest first.
pub async fn events_for_order(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> Result<Vec<OrderEvent>, OrderError> {
    let events = sqlx::query_as::<_, OrderEvent>(
        r#"
        SELECT id, order_id, actor_type, event_type, payload, created_at
        FROM order_events
        WHERE order_id = $1
        ORDER BY created_at, id
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(events)
}

/// Merges operator fulfillment metadata into an order.
///
/// Only the `fulfillment` column is touched; financial fields are never
/// editable.
pub async fn update_fulfillment(
    conn: &mut PgConnection,
    order_id: Uuid,
    patch: &Value,
    actor: &str,
) -> Result<Order, OrderError> {
    let order = sqlx::query_as::<_, Order>(&format!(
        r#"
        UPDATE orders
        SET fulfillment = fulfillment || $2, updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        ORDER_COLUMNS
    ))
    .bind(order_id)
    .bind(patch)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(OrderError::NotFound(order_id))?;

    append_event(
        conn,
        &NewOrderEvent::new(order_id, actor, "fulfillment_updated", patch.clone()),
    )
    .await?;

    Ok(order)
}
