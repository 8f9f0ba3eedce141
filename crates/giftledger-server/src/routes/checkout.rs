//! Checkout endpoints.

use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};

use crate::checkout::{self, CheckoutRequest, CheckoutResponse, PaymentFlavor};
use crate::error::AppError;
use crate::rate_limit;
use crate::state::AppState;

/// Creates the checkout router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/payment-intent", post(create_payment_intent))
        .route("/session", post(create_session))
        .with_state(state)
}

async fn limit(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    rate_limit::enforce(
        &state.pool,
        headers,
        "checkout",
        state.settings.checkout_rate_limit,
        state.settings.rate_limit_window_secs,
    )
    .await
}

/// Opens an order and returns a payment intent client secret.
///
/// POST /api/v1/checkout/payment-intent
async fn create_payment_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    limit(&state, &headers).await?;
    let response = checkout::checkout(&state, request, PaymentFlavor::Intent).await?;
    Ok(Json(response))
}

/// Opens an order and returns a hosted checkout URL.
///
/// POST /api/v1/checkout/session
async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    limit(&state, &headers).await?;
    let origin = request
        .origin
        .as_deref()
        .unwrap_or_default()
        .trim()
        .trim_end_matches('/')
        .to_string();
    let response = checkout::checkout(&state, request, PaymentFlavor::Session { origin }).await?;
    Ok(Json(response))
}
