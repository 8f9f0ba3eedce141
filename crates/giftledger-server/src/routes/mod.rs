//! API routes for the giftledger server.

pub mod admin;
pub mod checkout;
pub mod gift_cards;
pub mod webhooks;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Creates the main API router with all routes mounted.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state.clone())
        .nest("/api/v1", api_v1_routes(state))
        .layer(TraceLayer::new_for_http())
}

/// Creates the v1 API routes.
fn api_v1_routes(state: AppState) -> Router {
    // Browser-facing routes only; webhooks and admin calls are server to server.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/checkout", checkout::router(state.clone()).layer(cors.clone()))
        .nest("/gift-cards", gift_cards::router(state.clone()).layer(cors))
        .nest("/webhooks", webhooks::router(state.clone()))
        .nest("/admin", admin::router(state))
}

/// Liveness plus a database round trip.
async fn health(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match crate::db::ping(&state.pool).await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}
