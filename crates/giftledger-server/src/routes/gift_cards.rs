//! Public gift code validation.

use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::checkout::quote_gift_code;
use crate::error::AppError;
use crate::rate_limit;
use crate::state::AppState;

/// Request body for validating a gift code against a cart.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default, alias = "cart_subtotal_cents")]
    pub cart_subtotal_cents: i64,
}

/// Discount the code would give. Nothing is held.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub discount_cents: i64,
}

/// Creates the gift card router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/validate", post(validate_gift_code))
        .with_state(state)
}

/// POST /api/v1/gift-cards/validate
async fn validate_gift_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>, AppError> {
    rate_limit::enforce(
        &state.pool,
        &headers,
        "validate-gift-card",
        state.settings.validate_rate_limit,
        state.settings.rate_limit_window_secs,
    )
    .await?;

    let mut conn = state.pool.acquire().await?;
    let discount_cents = quote_gift_code(
        &mut *conn,
        &state.settings.gift_card_pepper,
        &request.code,
        request.cart_subtotal_cents,
        Utc::now(),
    )
    .await?;

    Ok(Json(ValidateResponse { discount_cents }))
}
