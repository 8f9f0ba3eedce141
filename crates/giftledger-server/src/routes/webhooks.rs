//! Payment provider webhook endpoint.
//!
//! Responses are plain text: `ok` for anything the provider should stop
//! retrying, `invalid_signature` for rejected deliveries, `error` when the
//! handler failed and a retry may succeed.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};

use crate::ingest::{self, IngestError};
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Creates the webhook router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stripe", post(handle_stripe_webhook))
        .with_state(state)
}

/// POST /api/v1/webhooks/stripe
async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    match ingest::ingest(&state, signature, &body).await {
        Ok(_) => (StatusCode::OK, "ok"),
        Err(IngestError::InvalidSignature(reason)) => {
            tracing::warn!("Rejected webhook: {}", reason);
            (StatusCode::BAD_REQUEST, "invalid_signature")
        }
        Err(IngestError::Malformed(reason)) => {
            tracing::warn!("Malformed webhook payload: {}", reason);
            (StatusCode::BAD_REQUEST, "invalid_payload")
        }
        Err(IngestError::Failed { .. }) => (StatusCode::INTERNAL_SERVER_ERROR, "error"),
    }
}
