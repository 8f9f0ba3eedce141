//! Server configuration and tracing setup.
//!
//! Sources are layered: built-in defaults, then an optional `giftledger.toml`
//! (or the file named by `GIFTLEDGER_CONFIG`), then `GIFTLEDGER_*` environment
//! variables.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Default config file looked up in the working directory.
const DEFAULT_CONFIG_FILE: &str = "giftledger";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("configuration load error: {0}")]
    Load(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime settings for the server.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub bind_addr: String,
    pub max_connections: u32,
    pub auto_migrate: bool,

    /// Server-side secret mixed into gift code lookup hashes.
    pub gift_card_pepper: String,

    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    /// Allowed clock skew for signed webhooks; 0 disables the check.
    pub webhook_tolerance_secs: i64,

    /// Lower-case ISO currency code used for every order.
    pub currency: String,
    pub min_gift_card_cents: i64,
    pub reservation_ttl_secs: u64,
    pub gift_card_validity_months: u32,
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: i64,

    pub rate_limit_window_secs: u64,
    pub checkout_rate_limit: i64,
    pub validate_rate_limit: i64,

    pub resend_api_key: Option<String>,
    pub resend_api_base: String,
    pub email_from: Option<String>,
    pub admin_email: Option<String>,
    pub support_email: Option<String>,
    /// Bearer token for `/api/v1/admin`. Admin routes are closed when unset.
    pub admin_api_token: Option<String>,
    pub site_name: String,
    pub public_site_url: String,

    pub log_level: String,
    pub log_json: bool,
}

impl Settings {
    /// Loads settings from defaults, an optional file and the environment.
    pub fn load() -> Result<Self, SettingsError> {
        let file = env::var("GIFTLEDGER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let config = Self::defaults()?
            .add_source(File::with_name(&file).required(false))
            .add_source(Environment::with_prefix("GIFTLEDGER").try_parsing(true))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Builder preloaded with every default value.
    pub fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("bind_addr", "0.0.0.0:8080")?
            .set_default("max_connections", 10)?
            .set_default("auto_migrate", true)?
            .set_default("stripe_api_base", "https://api.stripe.com")?
            .set_default("webhook_tolerance_secs", 300)?
            .set_default("currency", "eur")?
            .set_default("min_gift_card_cents", 1000)?
            .set_default("reservation_ttl_secs", 1800)?
            .set_default("gift_card_validity_months", 12)?
            .set_default("sweep_interval_secs", 60)?
            .set_default("sweep_batch_size", 100)?
            .set_default("rate_limit_window_secs", 60)?
            .set_default("checkout_rate_limit", 20)?
            .set_default("validate_rate_limit", 30)?
            .set_default("resend_api_base", "https://api.resend.com")?
            .set_default("site_name", "Giftledger")?
            .set_default("public_site_url", "http://localhost:3000")?
            .set_default("log_level", "info")?
            .set_default("log_json", false)
    }

    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.gift_card_pepper.trim().is_empty() {
            return Err(SettingsError::Invalid("gift_card_pepper must not be empty".into()));
        }
        if self.stripe_webhook_secret.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "stripe_webhook_secret must not be empty".into(),
            ));
        }
        if self.min_gift_card_cents <= 0 {
            return Err(SettingsError::Invalid(
                "min_gift_card_cents must be positive".into(),
            ));
        }
        if self.reservation_ttl_secs == 0 {
            return Err(SettingsError::Invalid(
                "reservation_ttl_secs must be positive".into(),
            ));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(SettingsError::Invalid(format!(
                "currency must be a 3-letter ISO code, got '{}'",
                self.currency
            )));
        }
        Ok(())
    }

    /// Upper-case currency code as stored on orders and cards.
    pub fn currency_code(&self) -> String {
        self.currency.to_uppercase()
    }

    /// Whether a real mail provider is configured.
    pub fn mail_enabled(&self) -> bool {
        self.resend_api_key.as_deref().is_some_and(|k| !k.is_empty())
            && self.email_from.as_deref().is_some_and(|f| !f.is_empty())
    }
}

/// Initializes tracing with `level` as the default filter.
///
/// `RUST_LOG` takes precedence when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("giftledger_server={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(overrides: &[(&str, &str)]) -> Result<Settings, SettingsError> {
        let mut builder = Settings::defaults()?
            .set_override("database_url", "postgres://localhost/giftledger")?
            .set_override("gift_card_pepper", "pepper")?
            .set_override("stripe_secret_key", "sk_test")?
            .set_override("stripe_webhook_secret", "whsec_test")?;
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    #[test]
    fn test_defaults() {
        let settings = build(&[]).unwrap();
        assert_eq!(settings.bind_addr, "0.0.0.0:8080");
        assert_eq!(settings.min_gift_card_cents, 1000);
        assert_eq!(settings.reservation_ttl_secs, 1800);
        assert_eq!(settings.gift_card_validity_months, 12);
        assert_eq!(settings.checkout_rate_limit, 20);
        assert_eq!(settings.validate_rate_limit, 30);
        assert_eq!(settings.currency_code(), "EUR");
        assert!(settings.admin_api_token.is_none());
        assert!(!settings.mail_enabled());
    }

    #[test]
    fn test_rejects_empty_pepper() {
        let result = build(&[("gift_card_pepper", " ")]);
        assert!(matches!(result, Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn test_rejects_bad_currency() {
        let result = build(&[("currency", "euro")]);
        assert!(matches!(result, Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn test_mail_requires_key_and_sender() {
        let settings = build(&[("resend_api_key", "re_123")]).unwrap();
        assert!(!settings.mail_enabled());
        let settings = build(&[("resend_api_key", "re_123"), ("email_from", "shop@example.com")]).unwrap();
        assert!(settings.mail_enabled());
    }
}
