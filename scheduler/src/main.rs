// Scheduler binary entry point: resumes notification runs whose durable
// wait has elapsed

use common::config::Settings;
use common::db::repositories::RunRepository;
use common::queue::{EventPublisher, NatsEventPublisher};
use common::scheduler::{WakeupEngine, WakeupEngineConfig, WakeupScheduler};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Structured JSON logging
    common::bootstrap::init_json_tracing();

    info!("Starting Taskpulse scheduler");

    // Load configuration
    let settings = Settings::load().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;
    settings.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    info!(
        database_url = %settings.database.url,
        nats_url = %settings.nats.url,
        poll_interval_seconds = settings.scheduler.poll_interval_seconds,
        "Configuration loaded"
    );

    // Prometheus metrics exporter
    common::telemetry::init_metrics(settings.observability.metrics_port)?;

    // Database pool
    let db_pool = common::bootstrap::init_database_pool(&settings).await?;

    // NATS client and resume-event publisher
    let nats_client = common::bootstrap::init_nats_client(&settings, "scheduler").await?;
    let publisher =
        Arc::new(NatsEventPublisher::new(nats_client)) as Arc<dyn EventPublisher>;
    info!("Resume publisher initialized");

    // Wake-up engine
    let engine_config = WakeupEngineConfig {
        poll_interval_seconds: settings.scheduler.poll_interval_seconds,
        max_runs_per_poll: settings.scheduler.max_runs_per_poll,
    };
    let engine = Arc::new(WakeupEngine::new(
        engine_config,
        RunRepository::new(db_pool),
        publisher,
    ));
    info!("Wake-up engine created");

    // Graceful shutdown on Ctrl+C
    let engine_for_shutdown = Arc::clone(&engine);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        if let Err(e) = engine_for_shutdown.stop().await {
            error!(error = %e, "Error during scheduler shutdown");
        }
    });

    // Start the polling loop
    info!("Starting wake-up polling loop");
    if let Err(e) = engine.start().await {
        error!(error = %e, "Scheduler error");
        return Err(e);
    }

    info!("Scheduler stopped");
    Ok(())
}
