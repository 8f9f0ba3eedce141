//! Payment provider gateway.
//!
//! The settlement core only needs three calls from the provider: create a
//! payment intent, create a hosted checkout session, and look up the payment
//! intent behind a charge. [`StripeGateway`] speaks the provider's
//! form-encoded REST API; tests substitute an in-memory gateway.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::models::Locale;

/// Errors raised by the payment gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment provider request failed: {0}")]
    Transport(String),
    #[error("payment provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected payment provider response: {0}")]
    Decode(String),
}

/// One priced line sent to the provider.
#[derive(Debug, Clone)]
pub struct GatewayLine {
    pub name: String,
    pub description: Option<String>,
    pub unit_amount_cents: i64,
    pub qty: i32,
}

/// Request for an embedded-payment intent.
#[derive(Debug, Clone)]
pub struct PaymentIntentRequest {
    pub order_id: Uuid,
    pub locale: Locale,
    pub amount_cents: i64,
    pub currency: String,
    pub receipt_email: String,
}

/// Request for a hosted checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub order_id: Uuid,
    pub locale: Locale,
    pub currency: String,
    pub customer_email: String,
    pub lines: Vec<GatewayLine>,
    /// Gift discount, applied as a single-use coupon.
    pub discount_cents: i64,
    /// Label for the coupon, never the full gift code.
    pub discount_label: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

/// Created payment intent.
#[derive(Debug, Clone)]
pub struct CreatedPaymentIntent {
    pub id: String,
    pub client_secret: String,
}

/// Created checkout session.
#[derive(Debug, Clone)]
pub struct CreatedCheckoutSession {
    pub id: String,
    pub url: String,
}

/// Outbound calls to the payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<CreatedPaymentIntent, GatewayError>;

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CreatedCheckoutSession, GatewayError>;

    /// Payment intent a charge belongs to, if any.
    async fn charge_payment_intent(&self, charge_id: &str) -> Result<Option<String>, GatewayError>;
}

/// Hosted checkout return paths per locale.
pub fn return_paths(locale: Locale) -> (&'static str, &'static str) {
    match locale {
        Locale::Lt => ("/lt/sekme", "/lt/atsaukta"),
        Locale::En => ("/en/success", "/en/cancel"),
    }
}

/// Form body for a payment intent.
pub fn payment_intent_form(request: &PaymentIntentRequest) -> Vec<(String, String)> {
    vec![
        ("amount".into(), request.amount_cents.to_string()),
        ("currency".into(), request.currency.to_lowercase()),
        ("receipt_email".into(), request.receipt_email.clone()),
        ("automatic_payment_methods[enabled]".into(), "true".into()),
        ("metadata[order_id]".into(), request.order_id.to_string()),
        ("metadata[locale]".into(), request.locale.as_str().into()),
    ]
}

/// Form body for a checkout session, with an optional coupon id.
pub fn checkout_session_form(
    request: &CheckoutSessionRequest,
    coupon_id: Option<&str>,
) -> Vec<(String, String)> {
    let currency = request.currency.to_lowercase();
    let mut form: Vec<(String, String)> = vec![
        ("mode".into(), "payment".into()),
        ("currency".into(), currency.clone()),
        ("customer_email".into(), request.customer_email.clone()),
        ("success_url".into(), request.success_url.clone()),
        ("cancel_url".into(), request.cancel_url.clone()),
        ("metadata[order_id]".into(), request.order_id.to_string()),
        ("metadata[locale]".into(), request.locale.as_str().into()),
        (
            "payment_intent_data[metadata][order_id]".into(),
            request.order_id.to_string(),
        ),
    ];

    for (i, line) in request.lines.iter().enumerate() {
        let prefix = format!("line_items[{}]", i);
        form.push((format!("{}[quantity]", prefix), line.qty.to_string()));
        form.push((format!("{}[price_data][currency]", prefix), currency.clone()));
        form.push((
            format!("{}[price_data][unit_amount]", prefix),
            line.unit_amount_cents.to_string(),
        ));
        form.push((
            format!("{}[price_data][product_data][name]", prefix),
            line.name.clone(),
        ));
        if let Some(description) = line.description.as_deref().filter(|d| !d.is_empty()) {
            form.push((
                format!("{}[price_data][product_data][description]", prefix),
                description.to_string(),
            ));
        }
    }

    if let Some(coupon) = coupon_id {
        form.push(("discounts[0][coupon]".into(), coupon.to_string()));
    }
    form
}

#[derive(Debug, Deserialize)]
struct IdAndSecret {
    id: String,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdAndUrl {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Charge {
    payment_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Gateway backed by the provider's REST API.
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(api_base: &str, secret_key: &str) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorEnvelope>().await {
                Ok(envelope) => envelope
                    .error
                    .message
                    .unwrap_or_else(|| "unknown error".to_string()),
                Err(e) => e.to_string(),
            };
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: &str,
    ) -> Result<T, GatewayError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key)
            .form(form)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    async fn create_coupon(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<String, GatewayError> {
        let mut form = vec![
            ("duration".to_string(), "once".to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            ("amount_off".to_string(), request.discount_cents.to_string()),
            ("max_redemptions".to_string(), "1".to_string()),
        ];
        if let Some(label) = &request.discount_label {
            form.push(("name".to_string(), label.clone()));
        }
        let coupon: IdOnly = self
            .post_form("/v1/coupons", &form, &format!("coupon-{}", request.order_id))
            .await?;
        Ok(coupon.id)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<CreatedPaymentIntent, GatewayError> {
        let created: IdAndSecret = self
            .post_form(
                "/v1/payment_intents",
                &payment_intent_form(request),
                &format!("pi-{}", request.order_id),
            )
            .await?;
        let client_secret = created
            .client_secret
            .ok_or_else(|| GatewayError::Decode("payment intent without client_secret".into()))?;
        Ok(CreatedPaymentIntent {
            id: created.id,
            client_secret,
        })
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CreatedCheckoutSession, GatewayError> {
        let coupon = if request.discount_cents > 0 {
            Some(self.create_coupon(request).await?)
        } else {
            None
        };

        let created: IdAndUrl = self
            .post_form(
                "/v1/checkout/sessions",
                &checkout_session_form(request, coupon.as_deref()),
                &format!("cs-{}", request.order_id),
            )
            .await?;
        let url = created
            .url
            .ok_or_else(|| GatewayError::Decode("checkout session without url".into()))?;
        Ok(CreatedCheckoutSession {
            id: created.id,
            url,
        })
    }

    async fn charge_payment_intent(&self, charge_id: &str) -> Result<Option<String>, GatewayError> {
        let response = self
            .client
            .get(format!("{}/v1/charges/{}", self.api_base, charge_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let charge: Charge = Self::decode(response).await?;
        Ok(charge.payment_intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
        form.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_payment_intent_form() {
        let order_id = Uuid::new_v4();
        let form = payment_intent_form(&PaymentIntentRequest {
            order_id,
            locale: Locale::En,
            amount_cents: 10_000,
            currency: "EUR".into(),
            receipt_email: "a@example.com".into(),
        });
        assert_eq!(find(&form, "amount"), Some("10000"));
        assert_eq!(find(&form, "currency"), Some("eur"));
        assert_eq!(find(&form, "metadata[order_id]"), Some(order_id.to_string().as_str()));
        assert_eq!(find(&form, "metadata[locale]"), Some("en"));
    }

    #[test]
    fn test_checkout_session_form_lines_and_coupon() {
        let request = CheckoutSessionRequest {
            order_id: Uuid::new_v4(),
            locale: Locale::Lt,
            currency: "EUR".into(),
            customer_email: "a@example.com".into(),
            lines: vec![
                GatewayLine {
                    name: "Program".into(),
                    description: Some("8 weeks".into()),
                    unit_amount_cents: 10_000,
                    qty: 1,
                },
                GatewayLine {
                    name: "Dovanų kuponas".into(),
                    description: None,
                    unit_amount_cents: 5_000,
                    qty: 1,
                },
            ],
            discount_cents: 2_000,
            discount_label: Some("Gift card (ABCD…)".into()),
            success_url: "https://shop.example/lt/sekme".into(),
            cancel_url: "https://shop.example/lt/atsaukta".into(),
        };

        let form = checkout_session_form(&request, Some("coupon_1"));
        assert_eq!(find(&form, "line_items[0][price_data][unit_amount]"), Some("10000"));
        assert_eq!(
            find(&form, "line_items[0][price_data][product_data][description]"),
            Some("8 weeks")
        );
        assert_eq!(find(&form, "line_items[1][price_data][product_data][description]"), None);
        assert_eq!(find(&form, "discounts[0][coupon]"), Some("coupon_1"));

        let without = checkout_session_form(&request, None);
        assert_eq!(find(&without, "discounts[0][coupon]"), None);
    }

    #[test]
    fn test_return_paths() {
        assert_eq!(return_paths(Locale::Lt), ("/lt/sekme", "/lt/atsaukta"));
        assert_eq!(return_paths(Locale::En), ("/en/success", "/en/cancel"));
    }
}
