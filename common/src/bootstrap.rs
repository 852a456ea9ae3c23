// Bootstrap utilities for binary initialization, shared by the api, worker,
// and scheduler entry points

use crate::config::Settings;
use crate::db::DbPool;
use crate::mailer::{Mailer, SmtpMailer};
use crate::queue::{EventBusConfig, NatsClient};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Initialize the database pool
/// Used by: API server, Worker, Scheduler
///
/// # Errors
/// Returns error if database pool initialization fails
#[tracing::instrument(skip(settings))]
pub async fn init_database_pool(settings: &Settings) -> Result<DbPool> {
    info!("Initializing database pool");

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;

    info!("Database pool initialized");
    Ok(db_pool)
}

/// Initialize the NATS client and make sure the event stream exists
/// Used by: API server, Worker, Scheduler
///
/// # Arguments
/// * `settings` - Application settings
/// * `consumer_name` - Name for the durable consumer (e.g., "worker-consumer")
///
/// # Errors
/// Returns error if NATS client or stream initialization fails
#[tracing::instrument(skip(settings))]
pub async fn init_nats_client(settings: &Settings, consumer_name: &str) -> Result<NatsClient> {
    info!(consumer_name = %consumer_name, "Initializing NATS client");

    let bus_config = EventBusConfig {
        url: settings.nats.url.clone(),
        stream_name: settings.nats.stream_name.clone(),
        consumer_name: consumer_name.to_string(),
        ..EventBusConfig::default()
    };

    let nats_client = NatsClient::new(bus_config)
        .await
        .context("Failed to initialize NATS client")?;

    nats_client
        .initialize_stream()
        .await
        .context("Failed to initialize event stream")?;

    info!("NATS client initialized");
    Ok(nats_client)
}

/// Initialize the SMTP mailer
/// Used by: Worker
///
/// # Errors
/// Returns error if the transport cannot be built from the configuration
#[tracing::instrument(skip(settings))]
pub fn init_mailer(settings: &Settings) -> Result<Arc<dyn Mailer>> {
    info!(host = %settings.smtp.host, "Initializing SMTP mailer");

    let mailer = SmtpMailer::new(&settings.smtp).context("Failed to initialize SMTP mailer")?;

    info!("SMTP mailer initialized");
    Ok(Arc::new(mailer))
}

/// Initialize tracing for JSON logging
/// Used by: Worker, Scheduler
///
/// This sets up structured JSON logging with thread IDs and log levels
pub fn init_json_tracing() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .json()
        .init();
}

/// Initialize tracing for human-readable logging
/// Used by: API server (development)
///
/// This sets up human-readable logging with environment filter
pub fn init_human_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[tokio::test]
    async fn test_mailer_builds_from_default_settings() {
        let settings = Settings::default();
        assert!(init_mailer(&settings).is_ok());
    }
}
