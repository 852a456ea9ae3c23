// Wake-up engine: the external re-invocation mechanism behind durable
// suspensions. Polls the store for runs whose wake_at has passed, claims
// them atomically, records their sleep step as elapsed, and publishes a
// resume event for the worker.

use crate::db::repositories::RunRepository;
use crate::errors::QueueError;
use crate::events::{names, Event, RunResumePayload};
use crate::handlers::assignment::STEP_WAIT_DUE;
use crate::models::NotificationRun;
use crate::queue::EventPublisher;
use crate::runtime::RunStore;
use crate::telemetry;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the wake-up engine
#[derive(Debug, Clone)]
pub struct WakeupEngineConfig {
    /// How often to poll for due runs (in seconds)
    pub poll_interval_seconds: u64,
    /// Maximum number of runs to resume per poll
    pub max_runs_per_poll: usize,
}

impl Default for WakeupEngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 10,
            max_runs_per_poll: 100,
        }
    }
}

/// Scheduler trait for the wake-up loop
#[async_trait]
pub trait WakeupScheduler: Send + Sync {
    /// Start the polling loop; returns when shutdown is requested
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Stop the scheduler gracefully
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Resume runs whose wake-up time has passed
    async fn process_due_runs(&self) -> Result<usize, Box<dyn std::error::Error + Send + Sync>>;
}

/// Main wake-up engine implementation
pub struct WakeupEngine {
    config: WakeupEngineConfig,
    runs: RunRepository,
    publisher: Arc<dyn EventPublisher>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl WakeupEngine {
    pub fn new(
        config: WakeupEngineConfig,
        runs: RunRepository,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel(1);

        Self {
            config,
            runs,
            publisher,
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Resume one claimed run: record its sleep step as elapsed, then
    /// publish the resume event.
    ///
    /// Recording the sleep step first is what lets the re-entered flow sail
    /// past its `sleep_until`; the record is conflict-tolerant, so a crash
    /// between the two writes is repaired by the next poll.
    #[instrument(skip(self, run), fields(run_id = %run.id, task_id = %run.task_id))]
    async fn resume_run(&self, run: &NotificationRun) -> Result<(), QueueError> {
        if let Err(e) = self
            .runs
            .record_step(
                run.id,
                STEP_WAIT_DUE,
                &serde_json::json!({ "woke_at": Utc::now() }),
            )
            .await
        {
            // Put the run back so a later poll retries it
            warn!(error = %e, "Failed to record elapsed wait, requeueing run");
            self.requeue(run).await;
            return Err(QueueError::PublishFailed(format!(
                "Failed to record elapsed wait: {}",
                e
            )));
        }

        let event = match Event::new(names::RUN_RESUME, &RunResumePayload { run_id: run.id }) {
            Ok(event) => event,
            Err(e) => {
                return Err(QueueError::SerializationFailed(format!(
                    "Failed to build resume event: {}",
                    e
                )))
            }
        };

        match self.publisher.publish_with_retry(&event, 3).await {
            Ok(()) => {
                info!("Run resume published");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to publish resume event, requeueing run");
                self.requeue(run).await;
                Err(e)
            }
        }
    }

    async fn requeue(&self, run: &NotificationRun) {
        let wake_at = run.wake_at.unwrap_or_else(Utc::now);
        if let Err(e) = self.runs.requeue_waiting(run.id, wake_at).await {
            error!(run_id = %run.id, error = %e, "Failed to requeue claimed run");
        }
    }

    async fn update_pending_gauge(&self) {
        match self.runs.count_waiting().await {
            Ok(count) => telemetry::update_pending_wakeups(count),
            Err(e) => debug!(error = %e, "Failed to count waiting runs"),
        }
    }
}

#[async_trait]
impl WakeupScheduler for WakeupEngine {
    /// Start the polling loop with graceful shutdown support
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            "Starting wake-up engine"
        );

        let mut poll_interval = interval(Duration::from_secs(self.config.poll_interval_seconds));
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    debug!("Polling for due runs");

                    match self.process_due_runs().await {
                        Ok(count) => {
                            if count > 0 {
                                info!(runs_resumed = count, "Resumed due runs");
                            } else {
                                debug!("No runs due for resume");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Error processing due runs");
                        }
                    }

                    self.update_pending_gauge().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping wake-up engine");
                    break;
                }
            }
        }

        info!("Wake-up engine stopped");
        Ok(())
    }

    /// Stop the engine gracefully
    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Stopping wake-up engine");

        let _ = self.shutdown_tx.send(());

        // Give in-flight resume operations a moment to complete
        sleep(Duration::from_secs(2)).await;

        info!("Wake-up engine stopped gracefully");
        Ok(())
    }

    /// Claim and resume every run whose wake-up time has passed.
    ///
    /// The claim itself is a single atomic state transition, so concurrent
    /// scheduler nodes resume disjoint sets of runs.
    #[instrument(skip(self))]
    async fn process_due_runs(&self) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        let due = match self
            .runs
            .claim_due_runs(Utc::now(), self.config.max_runs_per_poll as i64)
            .await
        {
            Ok(runs) => runs,
            Err(e) => {
                error!(error = %e, "Failed to claim due runs");
                return Err(Box::new(e));
            }
        };

        let mut resumed = 0;

        for run in &due {
            match self.resume_run(run).await {
                Ok(()) => {
                    resumed += 1;
                }
                Err(e) => {
                    error!(
                        run_id = %run.id,
                        error = %e,
                        "Failed to resume run"
                    );
                    // Continue with the remaining claimed runs
                }
            }
        }

        Ok(resumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wakeup_engine_config_default() {
        let config = WakeupEngineConfig::default();
        assert_eq!(config.poll_interval_seconds, 10);
        assert_eq!(config.max_runs_per_poll, 100);
    }

    #[test]
    fn test_wakeup_engine_config_custom() {
        let config = WakeupEngineConfig {
            poll_interval_seconds: 5,
            max_runs_per_poll: 25,
        };
        assert_eq!(config.poll_interval_seconds, 5);
        assert_eq!(config.max_runs_per_poll, 25);
    }
}
