//! Mail sending and the email log.
//!
//! Sending is fire-and-forget from the settlement core's point of view: a
//! failed send is logged to `email_log` and to tracing, never propagated.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::emails::RenderedEmail;
use crate::models::EmailStatus;

/// Errors raised by a mail sender.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail transport error: {0}")]
    Transport(String),
    #[error("mail provider rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Outbound mail sink.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends one email. Returns the provider's message id when it reports one.
    async fn send(&self, to: &str, email: &RenderedEmail) -> Result<Option<String>, MailError>;
}

/// Mailer backed by the Resend HTTP API.
pub struct ResendMailer {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    from: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: Option<String>,
}

impl ResendMailer {
    pub fn new(api_base: &str, api_key: &str, from: &str) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, to: &str, email: &RenderedEmail) -> Result<Option<String>, MailError> {
        let response = self
            .client
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": to,
                "subject": email.subject,
                "html": email.html,
                "text": email.text,
            }))
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response.json::<SendResponse>().await.ok();
        Ok(parsed.and_then(|r| r.id))
    }
}

/// Mailer that only logs. Used when no provider is configured.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, email: &RenderedEmail) -> Result<Option<String>, MailError> {
        tracing::info!(
            to,
            template = email.template,
            subject = %email.subject,
            "Mail provider not configured; email not sent"
        );
        Ok(None)
    }
}

/// Sends an email and records the attempt in `email_log`.
///
/// Never fails: send and log errors are reported through tracing only.
pub async fn deliver(
    pool: &PgPool,
    mailer: &dyn Mailer,
    to: &str,
    email: &RenderedEmail,
    related_order_id: Option<Uuid>,
) -> EmailStatus {
    let (status, provider_message_id, error) = match mailer.send(to, email).await {
        Ok(id) => (EmailStatus::Sent, id, None),
        Err(e) => {
            tracing::warn!(
                template = email.template,
                order_id = ?related_order_id,
                "Email send failed: {}",
                e
            );
            (EmailStatus::Failed, None, Some(e.to_string()))
        }
    };

    let logged = sqlx::query(
        r#"
        INSERT INTO email_log (to_email, template, locale, related_order_id, provider_message_id, status, error)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(to)
    .bind(email.template)
    .bind(email.locale.as_str())
    .bind(related_order_id)
    .bind(&provider_message_id)
    .bind(status)
    .bind(&error)
    .execute(pool)
    .await;

    if let Err(e) = logged {
        tracing::error!(template = email.template, "Failed to write email log: {}", e);
    }
    status
}
