//! Fixed-window per-client rate limiting backed by the `rate_limits` table.

use axum::http::HeaderMap;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;

use crate::error::AppError;

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

/// Best-effort client address: first `x-forwarded-for` hop, then
/// `x-real-ip`, else `unknown`.
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// Start of the aligned window containing `now`.
pub fn window_start(now: DateTime<Utc>, window_secs: u64) -> DateTime<Utc> {
    let window = i64::try_from(window_secs.max(1)).unwrap_or(i64::MAX);
    let start = now.timestamp().div_euclid(window) * window;
    Utc.timestamp_opt(start, 0).single().unwrap_or(now)
}

/// Seconds until the window containing `now` ends, at least 1.
pub fn retry_after(now: DateTime<Utc>, window_secs: u64) -> u64 {
    let start = window_start(now, window_secs);
    let elapsed = u64::try_from((now - start).num_seconds()).unwrap_or(0);
    window_secs.saturating_sub(elapsed).max(1)
}

/// Counts a request against `{scope}:{ip}` and decides whether it may pass.
///
/// The upsert increments atomically; a new window resets the counter.
pub async fn check(
    pool: &PgPool,
    scope: &str,
    ip: &str,
    limit: i64,
    window_secs: u64,
    now: DateTime<Utc>,
) -> Result<RateDecision, sqlx::Error> {
    let key = format!("{}:{}", scope, ip);
    let start = window_start(now, window_secs);

    let count: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO rate_limits (key, window_started_at, count)
        VALUES ($1, $2, 1)
        ON CONFLICT (key) DO UPDATE SET
            count = CASE
                WHEN rate_limits.window_started_at = EXCLUDED.window_started_at THEN rate_limits.count + 1
                ELSE 1
            END,
            window_started_at = EXCLUDED.window_started_at
        RETURNING count
        "#,
    )
    .bind(&key)
    .bind(start)
    .fetch_one(pool)
    .await?;

    if i64::from(count) > limit {
        Ok(RateDecision::Limited {
            retry_after_secs: retry_after(now, window_secs),
        })
    } else {
        Ok(RateDecision::Allowed)
    }
}

/// Handler helper: counts the request and maps a refusal to a 429.
pub async fn enforce(
    pool: &PgPool,
    headers: &HeaderMap,
    scope: &str,
    limit: i64,
    window_secs: u64,
) -> Result<(), AppError> {
    let ip = client_ip(headers);
    match check(pool, scope, &ip, limit, window_secs, Utc::now()).await? {
        RateDecision::Allowed => Ok(()),
        RateDecision::Limited { retry_after_secs } => {
            tracing::warn!(scope, ip = %ip, "Rate limit exceeded");
            Err(AppError::TooManyRequests {
                message: "rate_limited".to_string(),
                retry_after: retry_after_secs,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_fallbacks() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers), "10.0.0.2");
    }

    #[test]
    fn test_window_alignment() {
        let now = Utc.timestamp_opt(1_700_000_059, 0).unwrap();
        assert_eq!(window_start(now, 60).timestamp(), 1_700_000_040);
        assert_eq!(retry_after(now, 60), 41);

        let edge = Utc.timestamp_opt(1_700_000_040, 0).unwrap();
        assert_eq!(window_start(edge, 60), edge);
        assert_eq!(retry_after(edge, 60), 60);
    }
}
