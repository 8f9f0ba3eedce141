//! Checkout orchestration.
//!
//! Prices a cart from the catalog, applies an optional gift code, and opens
//! the order and its gift card hold in one transaction. Only after that
//! commit is the payment provider called. A cart fully covered by a gift code
//! never reaches the provider and is settled in the same transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgConnection;
use uuid::Uuid;

use giftledger_crypto::{lookup_hash, normalize_gift_code};

use crate::catalog;
use crate::customers;
use crate::error::AppError;
use crate::ledger::{self, LedgerError};
use crate::models::customer::looks_like_email;
use crate::models::order_event::ACTOR_SYSTEM;
use crate::models::{Locale, NewCustomer, NewOrder, NewOrderItem, OrderStatus};
use crate::money::{discount_for, line_total, sum_cents};
use crate::orders::{self, ProviderRefs};
use crate::payments::{
    return_paths, CheckoutSessionRequest, GatewayError, GatewayLine, PaymentIntentRequest,
};
use crate::settlement::{self, Notification, SettlementError};
use crate::state::AppState;

/// Upper bound on a single line's quantity.
pub const MAX_LINE_QTY: i32 = 100;

/// Checkout and gift code quote failures.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("cart is empty")]
    EmptyCart,
    #[error("email and consent to terms and privacy are required")]
    MissingRequiredFields,
    #[error("email address is malformed")]
    InvalidEmail,
    #[error("origin must be an http(s) URL")]
    InvalidOrigin,
    #[error("unknown product: {0}")]
    InvalidProduct(String),
    #[error("gift card amount {amount} is below the minimum of {minimum}")]
    InvalidGiftAmount { amount: i64, minimum: i64 },
    #[error("invalid cart item: {0}")]
    InvalidItem(String),
    #[error("gift code is required")]
    MissingCode,
    #[error("cart subtotal must not be negative")]
    InvalidSubtotal,
    #[error("gift code not recognised")]
    InvalidCode,
    #[error("gift card is expired or inactive")]
    ExpiredOrInactive,
    #[error("gift card has no available balance")]
    InsufficientBalance,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CheckoutError {
    /// Stable machine-readable code for caller-side failures.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::EmptyCart => Some("empty_cart"),
            Self::MissingRequiredFields => Some("missing_required_fields"),
            Self::InvalidEmail => Some("invalid_email"),
            Self::InvalidOrigin => Some("invalid_origin"),
            Self::InvalidProduct(_) => Some("invalid_product"),
            Self::InvalidGiftAmount { .. } => Some("invalid_gift_amount"),
            Self::InvalidItem(_) => Some("invalid_item"),
            Self::MissingCode => Some("missing_code"),
            Self::InvalidSubtotal => Some("invalid_subtotal"),
            Self::InvalidCode => Some("invalid_code"),
            Self::ExpiredOrInactive => Some("expired_or_inactive"),
            Self::InsufficientBalance => Some("insufficient_balance"),
            _ => None,
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(e: CheckoutError) -> Self {
        if let Some(code) = e.code() {
            return AppError::rejected(code, e.to_string());
        }
        match e {
            CheckoutError::Ledger(e) => e.into(),
            CheckoutError::Settlement(e) => e.into(),
            CheckoutError::Gateway(e) => e.into(),
            CheckoutError::Database(e) => AppError::Database(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Customer block of a checkout request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInput {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, alias = "full_name")]
    pub full_name: Option<String>,
    #[serde(default, alias = "marketing_opt_in")]
    pub marketing_opt_in: bool,
    #[serde(default, alias = "accept_terms")]
    pub accept_terms: bool,
    #[serde(default, alias = "accept_privacy")]
    pub accept_privacy: bool,
}

/// One requested cart line.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub kind: String,
    #[serde(default, alias = "product_id")]
    pub product_id: Option<String>,
    #[serde(default, alias = "amount_cents", alias = "unitPriceCents")]
    pub amount_cents: Option<i64>,
    #[serde(default)]
    pub qty: Option<i32>,
    #[serde(default)]
    pub meta: Value,
}

/// Body of both checkout endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default, alias = "gift_code")]
    pub gift_code: Option<String>,
    #[serde(default)]
    pub customer: CustomerInput,
    /// Site origin for hosted checkout return URLs.
    #[serde(default)]
    pub origin: Option<String>,
}

/// Which provider object to create for the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentFlavor {
    /// Embedded payment; the caller gets a client secret.
    Intent,
    /// Hosted checkout; the caller gets a redirect URL.
    Session { origin: String },
}

/// Checkout result.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub zero_total: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub currency: String,
}

/// A priced cart, ready to persist.
#[derive(Debug, Clone)]
pub struct PricedCart {
    pub items: Vec<NewOrderItem>,
    pub lines: Vec<GatewayLine>,
    pub subtotal_cents: i64,
}

/// Validates the parts of a request that need no database access.
pub fn validate_request(request: &CheckoutRequest, flavor: &PaymentFlavor) -> Result<(), CheckoutError> {
    if let PaymentFlavor::Session { origin } = flavor {
        if !origin.starts_with("http://") && !origin.starts_with("https://") {
            return Err(CheckoutError::InvalidOrigin);
        }
    }
    if request.items.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }
    let customer = &request.customer;
    if customer.email.trim().is_empty() || !customer.accept_terms || !customer.accept_privacy {
        return Err(CheckoutError::MissingRequiredFields);
    }
    if !looks_like_email(customer.email.trim()) {
        return Err(CheckoutError::InvalidEmail);
    }
    Ok(())
}

/// Display name of a gift card line.
pub fn gift_card_line_name(locale: Locale) -> &'static str {
    match locale {
        Locale::Lt => "Dovanų kuponas",
        Locale::En => "Gift card",
    }
}

fn line_qty(item: &CartItem) -> Result<i32, CheckoutError> {
    let qty = item.qty.unwrap_or(1).max(1);
    if qty > MAX_LINE_QTY {
        return Err(CheckoutError::InvalidItem(format!("quantity {} exceeds {}", qty, MAX_LINE_QTY)));
    }
    Ok(qty)
}

/// Prices every cart line from the catalog.
///
/// Gift card lines are split into one single-quantity line per card so each
/// purchased card maps to exactly one order item.
pub async fn price_cart(
    conn: &mut PgConnection,
    items: &[CartItem],
    locale: Locale,
    min_gift_card_cents: i64,
) -> Result<PricedCart, CheckoutError> {
    let mut priced = Vec::new();
    let mut lines = Vec::new();

    for item in items {
        let qty = line_qty(item)?;
        match item.kind.as_str() {
            "product" => {
                let product_id = item
                    .product_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| CheckoutError::InvalidProduct(String::new()))?;
                let product = catalog::lookup_product(conn, product_id, locale)
                    .await?
                    .ok_or_else(|| CheckoutError::InvalidProduct(product_id.to_string()))?;

                lines.push(GatewayLine {
                    name: product.name.clone(),
                    description: product.description.clone(),
                    unit_amount_cents: product.price_cents,
                    qty,
                });
                priced.push(NewOrderItem::product(
                    product.product_id,
                    product.name,
                    product.price_cents,
                    qty,
                ));
            }
            "gift_card" => {
                let amount = item.amount_cents.unwrap_or(0);
                if amount < min_gift_card_cents {
                    return Err(CheckoutError::InvalidGiftAmount {
                        amount,
                        minimum: min_gift_card_cents,
                    });
                }
                let meta = if item.meta.is_object() { item.meta.clone() } else { json!({}) };
                let name = gift_card_line_name(locale);
                for _ in 0..qty {
                    lines.push(GatewayLine {
                        name: name.to_string(),
                        description: None,
                        unit_amount_cents: amount,
                        qty: 1,
                    });
                    priced.push(NewOrderItem::gift_card(name.to_string(), amount, 1, meta.clone()));
                }
            }
            other => return Err(CheckoutError::InvalidItem(other.to_string())),
        }
    }

    let subtotal_cents = sum_cents(
        priced
            .iter()
            .map(|item| line_total(item.unit_price_cents, item.qty).unwrap_or(i64::MAX)),
    )
    .ok_or_else(|| CheckoutError::InvalidItem("cart total overflows".to_string()))?;

    Ok(PricedCart {
        items: priced,
        lines,
        subtotal_cents,
    })
}

/// Discount a gift code would give on a cart, without holding anything.
pub async fn quote_gift_code(
    conn: &mut PgConnection,
    pepper: &str,
    code: &str,
    subtotal_cents: i64,
    now: DateTime<Utc>,
) -> Result<i64, CheckoutError> {
    if normalize_gift_code(code).is_empty() {
        return Err(CheckoutError::MissingCode);
    }
    if subtotal_cents < 0 {
        return Err(CheckoutError::InvalidSubtotal);
    }
    let card = ledger::find_card_by_hash(conn, &lookup_hash(code, pepper))
        .await?
        .ok_or(CheckoutError::InvalidCode)?;
    if !card.is_redeemable_at(now) {
        return Err(CheckoutError::ExpiredOrInactive);
    }
    let available = ledger::available_balance(conn, card.id, now).await?;
    Ok(discount_for(available, subtotal_cents))
}

/// Opened order, committed before any provider call.
struct OpenedOrder {
    order_id: Uuid,
    locale: Locale,
    email: String,
    subtotal_cents: i64,
    discount_cents: i64,
    total_cents: i64,
    lines: Vec<GatewayLine>,
    discount_label: Option<String>,
    notifications: Vec<Notification>,
}

/// Runs a checkout end to end.
pub async fn checkout(
    state: &AppState,
    request: CheckoutRequest,
    flavor: PaymentFlavor,
) -> Result<CheckoutResponse, CheckoutError> {
    let now = Utc::now();
    validate_request(&request, &flavor)?;

    // Step 1: Persist the order and its hold
    let opened = open_order(state, &request, now).await?;
    let currency = state.settings.currency_code();

    if opened.total_cents == 0 {
        crate::notify::dispatch(state, opened.notifications).await;
        return Ok(CheckoutResponse {
            order_id: opened.order_id,
            zero_total: true,
            client_secret: None,
            url: None,
            subtotal_cents: opened.subtotal_cents,
            discount_cents: opened.discount_cents,
            total_cents: 0,
            currency,
        });
    }

    // Step 2: Create the provider object outside the transaction
    let created = match &flavor {
        PaymentFlavor::Intent => state
            .payments
            .create_payment_intent(&PaymentIntentRequest {
                order_id: opened.order_id,
                locale: opened.locale,
                amount_cents: opened.total_cents,
                currency: currency.clone(),
                receipt_email: opened.email.clone(),
            })
            .await
            .map(|pi| {
                (
                    ProviderRefs {
                        payment_intent_id: Some(pi.id),
                        ..ProviderRefs::default()
                    },
                    Some(pi.client_secret),
                    None,
                )
            }),
        PaymentFlavor::Session { origin } => {
            let (success, cancel) = return_paths(opened.locale);
            state
                .payments
                .create_checkout_session(&CheckoutSessionRequest {
                    order_id: opened.order_id,
                    locale: opened.locale,
                    currency: currency.clone(),
                    customer_email: opened.email.clone(),
                    lines: opened.lines.clone(),
                    discount_cents: opened.discount_cents,
                    discount_label: opened.discount_label.clone(),
                    success_url: format!("{}{}", origin, success),
                    cancel_url: format!("{}{}", origin, cancel),
                })
                .await
                .map(|session| {
                    (
                        ProviderRefs {
                            checkout_session_id: Some(session.id),
                            ..ProviderRefs::default()
                        },
                        None,
                        Some(session.url),
                    )
                })
        }
    };

    let (refs, client_secret, url) = match created {
        Ok(created) => created,
        Err(e) => {
            abandon_order(state, opened.order_id, &e).await;
            return Err(e.into());
        }
    };

    // Step 3: Remember the provider ids for webhook matching
    let mut conn = state.pool.acquire().await?;
    orders::record_provider_refs(&mut *conn, opened.order_id, &refs)
        .await
        .map_err(SettlementError::from)?;

    tracing::info!(
        order_id = %opened.order_id,
        total_cents = opened.total_cents,
        discount_cents = opened.discount_cents,
        "Checkout opened"
    );

    Ok(CheckoutResponse {
        order_id: opened.order_id,
        zero_total: false,
        client_secret,
        url,
        subtotal_cents: opened.subtotal_cents,
        discount_cents: opened.discount_cents,
        total_cents: opened.total_cents,
        currency,
    })
}

async fn open_order(
    state: &AppState,
    request: &CheckoutRequest,
    now: DateTime<Utc>,
) -> Result<OpenedOrder, CheckoutError> {
    let settings = &state.settings;
    let locale = Locale::from_code_or_default(request.locale.as_deref());
    let mut tx = state.pool.begin().await?;

    let cart = price_cart(&mut *tx, &request.items, locale, settings.min_gift_card_cents).await?;

    let input = &request.customer;
    let customer = customers::upsert_customer(
        &mut *tx,
        &NewCustomer::new(
            &input.email,
            input.phone.as_deref(),
            input.full_name.as_deref(),
            locale.as_str().to_string(),
            input.marketing_opt_in,
        ),
    )
    .await?;

    // Gift code: lock the card so concurrent checkouts serialize here
    let mut applied_card = None;
    let mut discount_label = None;
    let mut discount_cents = 0;
    if let Some(raw) = request.gift_code.as_deref().filter(|c| !c.trim().is_empty()) {
        let code = normalize_gift_code(raw);
        if code.is_empty() {
            return Err(CheckoutError::InvalidCode);
        }
        let card = ledger::find_card_by_hash(&mut *tx, &lookup_hash(&code, &settings.gift_card_pepper))
            .await?
            .ok_or(CheckoutError::InvalidCode)?;
        let (card, available) = ledger::lock_with_available(&mut *tx, card.id, now).await?;
        if !card.is_redeemable_at(now) {
            return Err(CheckoutError::ExpiredOrInactive);
        }
        if available == 0 {
            return Err(CheckoutError::InsufficientBalance);
        }
        discount_cents = discount_for(available, cart.subtotal_cents);
        discount_label = Some(format!("Gift card ({}…)", code.chars().take(4).collect::<String>()));
        applied_card = Some(card.id);
    }

    let (order, _) = orders::create_order(
        &mut *tx,
        &NewOrder::new(
            customer.id,
            locale.as_str().to_string(),
            cart.subtotal_cents,
            discount_cents,
            settings.currency_code(),
        ),
        &cart.items,
    )
    .await
    .map_err(SettlementError::from)?;

    if let Some(card_id) = applied_card.filter(|_| discount_cents > 0) {
        ledger::reserve(
            &mut *tx,
            card_id,
            order.id,
            discount_cents,
            settings.reservation_ttl_secs,
            now,
        )
        .await?;
    }

    // A fully covered cart is settled here; no provider signal will follow.
    let mut notifications = Vec::new();
    if order.is_zero_total() {
        let settled = settlement::settle_paid(
            &mut *tx,
            settings,
            order.id,
            &ProviderRefs::default(),
            ACTOR_SYSTEM,
            now,
        )
        .await?;
        if let Some(paid) = settled {
            notifications.push(Notification::OrderPaid(paid));
        }
        tracing::info!(order_id = %order.id, "Zero-total order settled at checkout");
    }

    tx.commit().await?;

    Ok(OpenedOrder {
        order_id: order.id,
        locale,
        email: customer.email,
        subtotal_cents: order.subtotal_cents,
        discount_cents: order.discount_cents,
        total_cents: order.total_cents,
        lines: cart.lines,
        discount_label,
        notifications,
    })
}

/// Fails an order whose provider object could not be created and frees its
/// hold. Errors here are logged; the caller already has a failure to report.
async fn abandon_order(state: &AppState, order_id: Uuid, cause: &GatewayError) {
    let result = async {
        let mut tx = state.pool.begin().await?;
        settlement::settle_unpaid(
            &mut *tx,
            order_id,
            OrderStatus::Failed,
            &ProviderRefs::default(),
            ACTOR_SYSTEM,
            json!({ "reason": "payment_provider_error", "error": cause.to_string() }),
        )
        .await?;
        tx.commit().await?;
        Ok::<_, SettlementError>(())
    }
    .await;

    match result {
        Ok(()) => tracing::warn!(order_id = %order_id, "Order failed: payment provider error: {}", cause),
        Err(e) => tracing::error!(order_id = %order_id, "Failed to abandon order after provider error: {}", e),
    }
}
