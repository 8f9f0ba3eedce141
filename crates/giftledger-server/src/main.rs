use std::sync::Arc;

use anyhow::Context;
use tokio::signal;

use giftledger_server::config::{init_tracing, Settings};
use giftledger_server::mailer::{LogMailer, Mailer, ResendMailer};
use giftledger_server::payments::{PaymentGateway, StripeGateway};
use giftledger_server::{create_router, db, sweeper, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading configuration")?;
    init_tracing(&settings.log_level, settings.log_json);

    // Init DB
    let pool = db::create_pool(&settings.database_url, settings.max_connections)
        .await
        .context("connecting to the database")?;
    if settings.auto_migrate {
        db::run_migrations(&pool).await.map_err(|e| {
            tracing::error!("Failed running migrations: {}", e);
            e
        })?;
    }

    // Outbound collaborators
    let payments: Arc<dyn PaymentGateway> = Arc::new(
        StripeGateway::new(&settings.stripe_api_base, &settings.stripe_secret_key)
            .context("building payment gateway")?,
    );
    let mailer: Arc<dyn Mailer> = match (settings.mail_enabled(), &settings.resend_api_key, &settings.email_from) {
        (true, Some(key), Some(from)) => Arc::new(
            ResendMailer::new(&settings.resend_api_base, key, from).context("building mailer")?,
        ),
        _ => {
            tracing::warn!("Mail provider not configured; emails will only be logged");
            Arc::new(LogMailer)
        }
    };

    let sweeper = sweeper::spawn_sweeper(
        pool.clone(),
        settings.sweep_interval_secs,
        settings.sweep_batch_size,
    );

    let bind_addr = settings.bind_addr.clone();
    let app = create_router(AppState::new(pool, settings, payments, mailer));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;
    tracing::info!("giftledger-server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    sweeper.abort();
    tracing::info!("giftledger-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
