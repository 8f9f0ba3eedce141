//! Order line items. Immutable once written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// What a line item sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "order_item_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderItemKind {
    /// A catalog product at its snapshotted price.
    Product,
    /// A gift card of a buyer-chosen amount.
    GiftCard,
}

impl OrderItemKind {
    /// Parse a kind from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "product" => Some(Self::Product),
            "gift_card" => Some(Self::GiftCard),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::GiftCard => "gift_card",
        }
    }
}

/// A line of an order, snapshotted at purchase time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderItem {
    /// Unique identifier for this line.
    pub id: Uuid,
    /// Order this line belongs to.
    pub order_id: Uuid,
    /// Product or gift card.
    pub kind: OrderItemKind,
    /// Catalog product id (products only).
    pub product_id: Option<String>,
    /// Display name at purchase time.
    pub name: String,
    /// Unit price at purchase time, in cents.
    pub unit_price_cents: i64,
    /// Quantity, always positive.
    pub qty: i32,
    /// Opaque metadata (gift card recipient and buyer details).
    pub meta: serde_json::Value,
    /// When this line was created.
    pub created_at: DateTime<Utc>,
}

/// Data required to create a new line item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub kind: OrderItemKind,
    pub product_id: Option<String>,
    pub name: String,
    pub unit_price_cents: i64,
    pub qty: i32,
    pub meta: serde_json::Value,
}

impl OrderItem {
    /// Line total in cents. Quantities and prices were validated at checkout.
    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents.saturating_mul(i64::from(self.qty))
    }

    /// Check if this line buys a gift card.
    pub fn is_gift_card(&self) -> bool {
        self.kind == OrderItemKind::GiftCard
    }

    /// Reads a string field from the metadata, accepting camelCase or
    /// snake_case keys. Blank values count as absent.
    pub fn meta_str(&self, camel: &str, snake: &str) -> Option<String> {
        [camel, snake]
            .iter()
            .filter_map(|key| self.meta.get(*key).and_then(|v| v.as_str()))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(str::to_string)
    }
}

impl NewOrderItem {
    /// A catalog product line.
    pub fn product(product_id: String, name: String, unit_price_cents: i64, qty: i32) -> Self {
        Self {
            kind: OrderItemKind::Product,
            product_id: Some(product_id),
            name,
            unit_price_cents,
            qty,
            meta: serde_json::json!({}),
        }
    }

    /// A gift card line of `amount_cents` per card.
    pub fn gift_card(name: String, amount_cents: i64, qty: i32, meta: serde_json::Value) -> Self {
        Self {
            kind: OrderItemKind::GiftCard,
            product_id: None,
            name,
            unit_price_cents: amount_cents,
            qty,
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(meta: serde_json::Value) -> OrderItem {
        OrderItem {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            kind: OrderItemKind::GiftCard,
            product_id: None,
            name: "Gift card".into(),
            unit_price_cents: 2_500,
            qty: 2,
            meta,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&OrderItemKind::GiftCard).unwrap(),
            "\"gift_card\""
        );
        assert_eq!(OrderItemKind::from_str("product"), Some(OrderItemKind::Product));
        assert_eq!(OrderItemKind::from_str("voucher"), None);
    }

    #[test]
    fn test_line_total() {
        assert_eq!(item(json!({})).line_total_cents(), 5_000);
    }

    #[test]
    fn test_meta_str_accepts_both_key_styles() {
        let camel = item(json!({"recipientEmail": "a@example.com"}));
        assert_eq!(
            camel.meta_str("recipientEmail", "recipient_email").as_deref(),
            Some("a@example.com")
        );
        let snake = item(json!({"recipient_email": " b@example.com "}));
        assert_eq!(
            snake.meta_str("recipientEmail", "recipient_email").as_deref(),
            Some("b@example.com")
        );
        let blank = item(json!({"recipientEmail": "  "}));
        assert_eq!(blank.meta_str("recipientEmail", "recipient_email"), None);
    }
}
