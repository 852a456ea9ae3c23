// Worker binary entry point: consumes events from the bus and dispatches
// them to the sync handlers and the notification flow

use common::config::Settings;
use common::db::repositories::{RunRepository, TaskRepository, UserRepository, WorkspaceRepository};
use common::handlers::assignment::TaskStore;
use common::handlers::{AssignmentNotifier, IdentitySync};
use common::mailer::Mailer;
use common::queue::{EventConsumer, NatsEventConsumer};
use common::runtime::RunStore;
use common::telemetry::{AlertNotifier, LogAlertNotifier};
use common::worker::EventDispatcher;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Structured JSON logging
    common::bootstrap::init_json_tracing();

    info!("Starting Taskpulse worker");

    // Load configuration
    let settings = Settings::load().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;
    settings.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;
    let timezone = settings
        .scheduler
        .timezone()
        .expect("timezone validated above");

    info!(
        database_url = %settings.database.url,
        nats_url = %settings.nats.url,
        timezone = %settings.scheduler.timezone,
        "Configuration loaded"
    );

    // Prometheus metrics exporter
    common::telemetry::init_metrics(settings.observability.metrics_port)?;

    // Database pool, with migrations applied before anything consumes
    let db_pool = common::bootstrap::init_database_pool(&settings).await?;
    db_pool.run_migrations().await?;

    // NATS client with the shared durable consumer
    let nats_client =
        common::bootstrap::init_nats_client(&settings, &settings.nats.consumer_name).await?;

    // SMTP mailer
    let mailer: Arc<dyn Mailer> = common::bootstrap::init_mailer(&settings)?;

    // Repositories
    let run_repo = RunRepository::new(db_pool.clone());
    let task_repo = Arc::new(TaskRepository::new(db_pool.clone())) as Arc<dyn TaskStore>;
    let user_repo = UserRepository::new(db_pool.clone());
    let workspace_repo = WorkspaceRepository::new(db_pool.clone());

    // Handlers
    let identity = IdentitySync::new(user_repo, workspace_repo);
    let notifier = Arc::new(AssignmentNotifier::new(
        task_repo,
        mailer,
        Arc::new(run_repo.clone()) as Arc<dyn RunStore>,
        timezone,
        settings.worker.mail_max_retries,
    ));
    let alerts = Arc::new(LogAlertNotifier) as Arc<dyn AlertNotifier>;

    // Dispatcher wired into the consumer
    let dispatcher = EventDispatcher::new(identity, notifier, run_repo, alerts);
    let consumer = Arc::new(NatsEventConsumer::new(&nats_client, dispatcher.into_handler()).await?);
    info!("Event consumer created");

    // Graceful shutdown on Ctrl+C / SIGTERM
    let consumer_for_shutdown = Arc::clone(&consumer);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        consumer_for_shutdown.shutdown();
    });

    // Consume until shutdown
    info!("Starting event consumption loop");
    if let Err(e) = consumer.start().await {
        error!(error = %e, "Consumer error");
        return Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>);
    }

    db_pool.close().await;
    info!("Worker stopped");
    Ok(())
}
