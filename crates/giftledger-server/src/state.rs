//! Shared application state.

use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Settings;
use crate::emails::Branding;
use crate::mailer::Mailer;
use crate::payments::PaymentGateway;

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub settings: Arc<Settings>,
    pub payments: Arc<dyn PaymentGateway>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        settings: Settings,
        payments: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            pool,
            settings: Arc::new(settings),
            payments,
            mailer,
        }
    }

    /// Email shell details from settings.
    pub fn branding(&self) -> Branding {
        Branding {
            site_name: self.settings.site_name.clone(),
            site_url: self.settings.public_site_url.clone(),
            support_email: self.settings.support_email.clone(),
        }
    }
}
