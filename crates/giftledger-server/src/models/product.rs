//! Catalog product rows.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A price snapshot source for one product in one locale.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub product_id: String,
    pub locale: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub currency: String,
    pub active: bool,
}
