//! Customer upsert keyed by email.

use sqlx::PgConnection;

use crate::models::{Customer, NewCustomer};

/// Inserts or refreshes the customer with this email.
///
/// Consent timestamps are set on first acceptance and kept afterwards;
/// marketing opt-in follows the latest checkout.
pub async fn upsert_customer(
    conn: &mut PgConnection,
    customer: &NewCustomer,
) -> Result<Customer, sqlx::Error> {
    sqlx::query_as::<_, Customer>(
        r#"
        INSERT INTO customers (
            email, phone, full_name, locale, marketing_opt_in, terms_accepted_at, privacy_accepted_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $6)
        ON CONFLICT (email) DO UPDATE SET
            phone = COALESCE(EXCLUDED.phone, customers.phone),
            full_name = COALESCE(EXCLUDED.full_name, customers.full_name),
            locale = EXCLUDED.locale,
            marketing_opt_in = EXCLUDED.marketing_opt_in,
            terms_accepted_at = COALESCE(customers.terms_accepted_at, EXCLUDED.terms_accepted_at),
            privacy_accepted_at = COALESCE(customers.privacy_accepted_at, EXCLUDED.privacy_accepted_at),
            updated_at = NOW()
        RETURNING id, email, phone, full_name, locale, marketing_opt_in,
                  terms_accepted_at, privacy_accepted_at, created_at, updated_at
        "#,
    )
    .bind(&customer.email)
    .bind(&customer.phone)
    .bind(&customer.full_name)
    .bind(&customer.locale)
    .bind(customer.marketing_opt_in)
    .bind(customer.accepted_at)
    .fetch_one(&mut *conn)
    .await
}

/// Loads a customer by id.
pub async fn get_customer(
    conn: &mut PgConnection,
    customer_id: uuid::Uuid,
) -> Result<Option<Customer>, sqlx::Error> {
    sqlx::query_as::<_, Customer>(
        r#"
        SELECT id, email, phone, full_name, locale, marketing_opt_in,
               terms_accepted_at, privacy_accepted_at, created_at, updated_at
        FROM customers
        WHERE id = $1
        "#,
    )
    .bind(customer_id)
    .fetch_optional(&mut *conn)
    .await
}
