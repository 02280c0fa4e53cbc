//! Studyhall backend server.
//!
//! Bootstraps configuration, the database pool, the billing adapters, the
//! daily trial reminder task, and the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use studyhall::adapters::email::ResendEmailSink;
use studyhall::adapters::http::billing::{billing_router, BillingAppState};
use studyhall::adapters::postgres::{PostgresEntitlementStore, PostgresPlanCatalog};
use studyhall::adapters::scheduler::TrialReminderTask;
use studyhall::adapters::stripe::{StripeClient, StripeConfig};
use studyhall::application::handlers::billing::SendTrialRemindersHandler;
use studyhall::config::AppConfig;
use studyhall::ports::{EmailSink, EntitlementStore, PaymentProvider, PlanCatalog};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.server.log_level))
        .init();

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .idle_timeout(config.database.idle_timeout())
        .connect(&config.database.url)
        .await?;

    let store: Arc<dyn EntitlementStore> = Arc::new(PostgresEntitlementStore::new(pool.clone()));
    let plan_catalog: Arc<dyn PlanCatalog> = Arc::new(PostgresPlanCatalog::new(pool.clone()));
    let payment_provider: Arc<dyn PaymentProvider> = Arc::new(StripeClient::new(
        StripeConfig::from_payment_config(&config.payment),
    ));
    let email_sink: Arc<dyn EmailSink> =
        Arc::new(ResendEmailSink::new(config.email.clone(), pool.clone()));

    if config.scheduler.trial_reminders_enabled {
        let handler = SendTrialRemindersHandler::new(store.clone(), email_sink.clone());
        let task = Arc::new(TrialReminderTask::new(
            handler,
            config.scheduler.reminder_hour_utc,
        ));
        task.spawn();
        tracing::info!(
            hour_utc = config.scheduler.reminder_hour_utc,
            "trial reminder task scheduled"
        );
    }

    let state = BillingAppState {
        store,
        payment_provider,
        plan_catalog,
        email_sink,
        webhook_secret: config.payment.stripe_webhook_secret.clone(),
    };

    let cors = build_cors_layer(&config.server.cors_origins_list());
    let app = Router::new()
        .nest("/api", billing_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.server.request_timeout_secs,
                )))
                .layer(cors),
        )
        .with_state(state);

    let addr = config.server.socket_addr();
    tracing::info!(%addr, environment = ?config.server.environment, "studyhall backend listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let parsed: Vec<http::HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(Any)
        .allow_headers(Any)
}
