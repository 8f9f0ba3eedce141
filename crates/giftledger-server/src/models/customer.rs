//! Customer model. One row per email address.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storefront customer.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: Uuid,
    /// Lower-cased email, unique.
    pub email: String,
    pub phone: Option<String>,
    pub full_name: Option<String>,
    /// Locale of the customer's latest checkout.
    pub locale: String,
    pub marketing_opt_in: bool,
    pub terms_accepted_at: Option<DateTime<Utc>>,
    pub privacy_accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contact and consent details captured at checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCustomer {
    pub email: String,
    pub phone: Option<String>,
    pub full_name: Option<String>,
    pub locale: String,
    pub marketing_opt_in: bool,
    pub accepted_at: DateTime<Utc>,
}

impl NewCustomer {
    /// Normalizes the email and drops blank optional fields.
    pub fn new(
        email: &str,
        phone: Option<&str>,
        full_name: Option<&str>,
        locale: String,
        marketing_opt_in: bool,
    ) -> Self {
        let non_blank = |v: Option<&str>| {
            v.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            email: normalize_email(email),
            phone: non_blank(phone),
            full_name: non_blank(full_name),
            locale,
            marketing_opt_in,
            accepted_at: Utc::now(),
        }
    }
}

/// Trims and lower-cases an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Minimal shape check: one `@` with a dotted domain after it.
pub fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_customer_normalizes() {
        let c = NewCustomer::new(" Jonas@Example.COM ", Some("  "), Some(" Jonas "), "lt".into(), true);
        assert_eq!(c.email, "jonas@example.com");
        assert_eq!(c.phone, None);
        assert_eq!(c.full_name.as_deref(), Some("Jonas"));
        assert!(c.marketing_opt_in);
    }

    #[test]
    fn test_looks_like_email() {
        assert!(looks_like_email("a@b.lt"));
        assert!(!looks_like_email("ab.lt"));
        assert!(!looks_like_email("@b.lt"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("a@@b.lt"));
        assert!(!looks_like_email("a b@c.lt"));
    }
}
