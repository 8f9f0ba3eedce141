//! Operator endpoints, guarded by a static bearer token.

use axum::{
    extract::{Path, Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::{self, Next},
    response::Response,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppError;
use crate::ledger::{self, LedgerAudit};
use crate::models::order_event::ACTOR_ADMIN;
use crate::models::{GiftCard, GiftCardLedgerEntry, GiftCardStatus, Order};
use crate::orders;
use crate::state::AppState;
use crate::sweeper::{self, SweepReport};

/// Request body for a balance correction.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustRequest {
    #[serde(alias = "delta_cents")]
    pub delta_cents: i64,
    #[serde(default)]
    pub note: Option<String>,
    /// Operator name recorded on the entry.
    #[serde(default)]
    pub actor: Option<String>,
}

/// Request body for a status change.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

/// Ledger audit with the entries it was computed from.
#[derive(Debug, Serialize)]
pub struct AuditResponse {
    #[serde(flatten)]
    pub audit: LedgerAudit,
    pub entries: Vec<GiftCardLedgerEntry>,
}

/// Creates the admin router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/gift-cards/{id}/adjust", post(adjust_gift_card))
        .route("/gift-cards/{id}/status", post(set_gift_card_status))
        .route("/gift-cards/{id}/audit", get(audit_gift_card))
        .route("/reservations/sweep", post(sweep_reservations))
        .route("/orders/{id}/fulfillment", patch(update_fulfillment))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .with_state(state)
}

/// Compares tokens without short-circuiting on the first mismatch.
fn tokens_match(expected: &str, provided: &str) -> bool {
    let (a, b) = (expected.as_bytes(), provided.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Rejects every call when no token is configured.
async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let expected = state
        .settings
        .admin_api_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Unauthorized)?;
    let authorized = bearer_token(request.headers()).is_some_and(|token| tokens_match(expected, token));
    if !authorized {
        tracing::warn!(path = %request.uri().path(), "Rejected admin request");
        return Err(AppError::Unauthorized);
    }
    Ok(next.run(request).await)
}

fn actor_label(actor: Option<&str>) -> String {
    match actor.map(str::trim).filter(|a| !a.is_empty()) {
        Some(name) => format!("{}:{}", ACTOR_ADMIN, name),
        None => ACTOR_ADMIN.to_string(),
    }
}

/// POST /api/v1/admin/gift-cards/{id}/adjust
async fn adjust_gift_card(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AdjustRequest>,
) -> Result<Json<GiftCard>, AppError> {
    let mut tx = state.pool.begin().await?;
    let card = ledger::adjust(
        &mut *tx,
        id,
        request.delta_cents,
        &actor_label(request.actor.as_deref()),
        request.note,
    )
    .await?;
    tx.commit().await?;
    Ok(Json(card))
}

/// POST /api/v1/admin/gift-cards/{id}/status
async fn set_gift_card_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<GiftCard>, AppError> {
    let status = GiftCardStatus::from_str(request.status.trim()).ok_or_else(|| {
        AppError::rejected("invalid_status", format!("unknown status '{}'", request.status))
    })?;

    let mut tx = state.pool.begin().await?;
    let card = ledger::set_status(&mut *tx, id, status).await?;
    tx.commit().await?;
    Ok(Json(card))
}

/// GET /api/v1/admin/gift-cards/{id}/audit
async fn audit_gift_card(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AuditResponse>, AppError> {
    let mut conn = state.pool.acquire().await?;
    let audit = ledger::audit(&mut *conn, id).await?;
    let entries = ledger::entries(&mut *conn, id).await?;
    if !audit.consistent {
        tracing::error!(gift_card_id = %id, audit = ?audit, "Gift card balance does not reconcile with its ledger");
    }
    Ok(Json(AuditResponse { audit, entries }))
}

/// POST /api/v1/admin/reservations/sweep
async fn sweep_reservations(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    let report = sweeper::sweep_expired(&state.pool, Utc::now(), state.settings.sweep_batch_size).await?;
    Ok(Json(report))
}

/// PATCH /api/v1/admin/orders/{id}/fulfillment
async fn update_fulfillment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<Value>,
) -> Result<Json<Order>, AppError> {
    if !patch.is_object() {
        return Err(AppError::BadRequest("fulfillment patch must be a JSON object".into()));
    }
    let mut tx = state.pool.begin().await?;
    let order = orders::update_fulfillment(&mut *tx, id, &patch, ACTOR_ADMIN).await?;
    tx.commit().await?;
    Ok(Json(order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("secret", "secret"));
        assert!(!tokens_match("secret", "secreT"));
        assert!(!tokens_match("secret", "secret2"));
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_actor_label() {
        assert_eq!(actor_label(None), "admin");
        assert_eq!(actor_label(Some(" ")), "admin");
        assert_eq!(actor_label(Some("rasa")), "admin:rasa");
    }
}
