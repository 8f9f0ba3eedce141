//! Error types for the giftledger server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::ledger::LedgerError;
use crate::orders::OrderError;
use crate::payments::GatewayError;
use crate::settlement::SettlementError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// A validation or conflict failure with a stable machine-readable code.
    #[error("Rejected ({code}): {message}")]
    Rejected { code: &'static str, message: String },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Rate limit exceeded: {message}")]
    TooManyRequests {
        message: String,
        /// Seconds until rate limit resets.
        retry_after: u64,
    },
}

impl AppError {
    pub fn rejected(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Rejected {
            code,
            message: message.into(),
        }
    }
}

fn error_body(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({ "error": code, "message": message }))).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "Internal server error")
            }
            AppError::NotFound(msg) => error_body(StatusCode::NOT_FOUND, "not_found", &msg),
            AppError::BadRequest(msg) => error_body(StatusCode::BAD_REQUEST, "bad_request", &msg),
            AppError::Rejected { code, message } => {
                let status = match code {
                    "insufficient_balance" | "invalid_state" => StatusCode::CONFLICT,
                    _ => StatusCode::BAD_REQUEST,
                };
                error_body(status, code, &message)
            }
            AppError::Unauthorized => {
                error_body(StatusCode::UNAUTHORIZED, "unauthorized", "Missing or invalid token")
            }
            AppError::Upstream(msg) => {
                tracing::error!("Upstream error: {}", msg);
                error_body(StatusCode::BAD_GATEWAY, "payment_provider_error", "Payment provider unavailable")
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "Internal server error")
            }
            AppError::TooManyRequests { message, retry_after } => {
                let mut response = error_body(StatusCode::TOO_MANY_REQUESTS, "rate_limited", &message);
                response.headers_mut().insert(
                    axum::http::header::RETRY_AFTER,
                    axum::http::HeaderValue::from_str(&retry_after.to_string())
                        .unwrap_or_else(|_| axum::http::HeaderValue::from_static("60")),
                );
                response
            }
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientBalance { requested, available } => AppError::rejected(
                "insufficient_balance",
                format!("requested {} but only {} available", requested, available),
            ),
            LedgerError::CardNotFound(id) => AppError::NotFound(format!("Gift card {} not found", id)),
            LedgerError::NotRedeemable(_) => {
                AppError::rejected("expired_or_inactive", "Gift card is expired or inactive")
            }
            LedgerError::InvalidAmount(amount) => {
                AppError::rejected("invalid_amount", format!("invalid amount {}", amount))
            }
            e @ LedgerError::BelowActiveHolds { .. } => AppError::rejected("invalid_amount", e.to_string()),
            e @ LedgerError::StatusNotSettable(_) => AppError::rejected("invalid_status", e.to_string()),
            LedgerError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::NotFound(id) => AppError::NotFound(format!("Order {} not found", id)),
            OrderError::InvalidTransition(t) => AppError::rejected("invalid_state", t.to_string()),
            OrderError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(e: SettlementError) -> Self {
        match e {
            SettlementError::Order(e) => e.into(),
            SettlementError::Ledger(e) => e.into(),
            SettlementError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        AppError::Upstream(e.to_string())
    }
}
