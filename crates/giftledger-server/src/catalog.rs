//! Read-only catalog lookup.

use sqlx::PgConnection;

use crate::models::{Locale, Product};

/// Resolves a product to its price snapshot for a locale.
///
/// Falls back to the default locale's row when the requested locale has no
/// translation. Inactive products do not resolve.
pub async fn lookup_product(
    conn: &mut PgConnection,
    product_id: &str,
    locale: Locale,
) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>(
        r#"
        SELECT product_id, locale, name, description, price_cents, currency, active
        FROM products
        WHERE product_id = $1 AND active AND locale IN ($2, $3)
        ORDER BY (locale = $2) DESC
        LIMIT 1
        "#,
    )
    .bind(product_id)
    .bind(locale.as_str())
    .bind(Locale::default().as_str())
    .fetch_optional(&mut *conn)
    .await
}
