// HTTP client for the settlement API's admin and webhook endpoints

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

/// Outcome of a call that the server answered, successful or not.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body parsed as JSON, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Thin blocking client bound to one server base URL.
pub struct ApiClient {
    base_url: String,
    admin_token: Option<String>,
    agent: ureq::Agent,
}

impl ApiClient {
    pub fn new(base_url: &str, admin_token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            admin_token,
            agent: ureq::AgentBuilder::new()
                .timeout(std::time::Duration::from_secs(30))
                .build(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn admin_request(&self, method: &str, path: &str) -> Result<ureq::Request> {
        let token = self
            .admin_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("Admin token required. Pass --token or set GIFTLEDGER_ADMIN_API_TOKEN"))?;
        Ok(self
            .agent
            .request(method, &self.url(path))
            .set("Authorization", &format!("Bearer {}", token)))
    }

    /// Sends an admin call with an optional JSON body.
    pub fn admin(&self, method: &str, path: &str, body: Option<&Value>) -> Result<Reply> {
        let request = self.admin_request(method, path)?;
        let result = match body {
            Some(body) => request.send_json(body.clone()),
            None => request.call(),
        };
        into_reply(result)
    }

    /// Posts a raw webhook payload with its signature header.
    pub fn webhook(&self, path: &str, payload: &str, signature: &str) -> Result<Reply> {
        let result = self
            .agent
            .post(&self.url(path))
            .set("Content-Type", "application/json")
            .set("Stripe-Signature", signature)
            .send_string(payload);
        into_reply(result)
    }
}

fn into_reply(result: std::result::Result<ureq::Response, ureq::Error>) -> Result<Reply> {
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(e) => return Err(anyhow!("Request failed: {}", e)),
    };
    let status = response.status();
    let body = response
        .into_string()
        .context("Failed to read response body")?;
    Ok(Reply { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_dropped() {
        let client = ApiClient::new("http://localhost:3000/", None);
        assert_eq!(
            client.url("/api/v1/admin/reservations/sweep"),
            "http://localhost:3000/api/v1/admin/reservations/sweep"
        );
    }

    #[test]
    fn test_admin_calls_require_a_token() {
        let client = ApiClient::new("http://localhost:3000", Some(String::new()));
        let err = client.admin("POST", "/api/v1/admin/reservations/sweep", None).unwrap_err();
        assert!(err.to_string().contains("Admin token required"));
    }

    #[test]
    fn test_reply_helpers() {
        let reply = Reply {
            status: 409,
            body: r#"{"error":"insufficient_balance","message":"x"}"#.into(),
        };
        assert!(!reply.is_success());
        assert_eq!(reply.json().unwrap()["error"], "insufficient_balance");

        let plain = Reply { status: 200, body: "ok".into() };
        assert!(plain.is_success());
        assert!(plain.json().is_none());
    }
}
