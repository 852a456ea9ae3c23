// Durable step runner for notification runs
//
// A run executes as a sequence of named steps. Each completed step is
// persisted keyed by (run id, step name); re-entering the run replays the
// recorded results and only the first unrecorded step actually executes.
// That replay is what makes redelivered events and crash-resumed runs safe:
// a side effect recorded once is never repeated.

use crate::errors::{DatabaseError, RunError};
use crate::models::NotificationRun;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Persistence seam for runs and their memoized steps.
/// Implemented by `RunRepository` against PostgreSQL.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a run row if absent. Returns false when the run already
    /// existed (the event was redelivered).
    async fn create_run(&self, run: &NotificationRun) -> Result<bool, DatabaseError>;

    /// Load a run row
    async fn find_run(&self, run_id: Uuid) -> Result<Option<NotificationRun>, DatabaseError>;

    /// Park the run: record the wake-up time and flip the state to waiting
    async fn mark_waiting(
        &self,
        run_id: Uuid,
        wake_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Mark the run finished
    async fn mark_completed(&self, run_id: Uuid) -> Result<(), DatabaseError>;

    /// Record a run-level failure message (the run stays re-creatable from
    /// the original event)
    async fn mark_failed(&self, run_id: Uuid, error: &str) -> Result<(), DatabaseError>;

    /// Look up a memoized step output
    async fn find_step(
        &self,
        run_id: Uuid,
        step_name: &str,
    ) -> Result<Option<serde_json::Value>, DatabaseError>;

    /// Record a step output. Recording the same step twice must be a no-op.
    async fn record_step(
        &self,
        run_id: Uuid,
        step_name: &str,
        output: &serde_json::Value,
    ) -> Result<(), DatabaseError>;
}

/// StepRunner drives one run's steps against a `RunStore`
pub struct StepRunner {
    run_id: Uuid,
    store: Arc<dyn RunStore>,
}

impl StepRunner {
    pub fn new(run_id: Uuid, store: Arc<dyn RunStore>) -> Self {
        Self { run_id, store }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Execute a named step exactly once per run.
    ///
    /// A recorded step returns its memoized output without re-executing.
    /// Failures of the step body and store I/O propagate as retryable
    /// errors; a memo that cannot be encoded or decoded surfaces as
    /// `RunError::Scheduling`, which no redelivery can fix.
    pub async fn run_step<T, F, Fut>(&self, name: &str, f: F) -> Result<T, RunError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RunError>>,
    {
        if let Some(recorded) = self.store.find_step(self.run_id, name).await? {
            debug!(run_id = %self.run_id, step = name, "Replaying memoized step");
            return serde_json::from_value(recorded).map_err(|e| scheduling(name, &e));
        }

        let output = f().await?;

        let value = serde_json::to_value(&output).map_err(|e| scheduling(name, &e))?;
        self.store.record_step(self.run_id, name, &value).await?;

        debug!(run_id = %self.run_id, step = name, "Step recorded");
        Ok(output)
    }

    /// Durably suspend the run until `wake_at`.
    ///
    /// First pass: persists the wake-up time on the run row and yields
    /// `RunError::Suspended` — the caller acks the triggering event and the
    /// scheduler re-invokes the run at/after `wake_at`. On re-entry the
    /// sleep step has been recorded by the scheduler, so this returns Ok
    /// and execution continues past the wait. No thread, timer, or socket
    /// is held for the duration.
    pub async fn sleep_until(&self, name: &str, wake_at: DateTime<Utc>) -> Result<(), RunError> {
        if self.store.find_step(self.run_id, name).await?.is_some() {
            debug!(run_id = %self.run_id, step = name, "Wait already elapsed");
            return Ok(());
        }

        self.store.mark_waiting(self.run_id, wake_at).await?;

        info!(
            run_id = %self.run_id,
            step = name,
            wake_at = %wake_at,
            "Run suspended until wake-up"
        );
        Err(RunError::Suspended { wake_at })
    }
}

fn scheduling(step: &str, reason: &dyn std::fmt::Display) -> RunError {
    RunError::Scheduling {
        step: step.to_string(),
        reason: reason.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::InMemoryRunStore;
    use super::*;
    use crate::models::RunState;
    use chrono::Duration;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn new_runner(store: &Arc<InMemoryRunStore>) -> (Uuid, StepRunner) {
        let run_id = Uuid::new_v4();
        let run = NotificationRun::new(run_id, Uuid::new_v4(), "https://app".to_string());
        let store_dyn: Arc<dyn RunStore> = Arc::clone(store) as Arc<dyn RunStore>;
        store.create_run(&run).await.unwrap();
        (run_id, StepRunner::new(run_id, store_dyn))
    }

    #[tokio::test]
    async fn test_step_executes_once_and_memoizes() {
        let store = Arc::new(InMemoryRunStore::new());
        let (_, runner) = new_runner(&store).await;
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let value: u32 = runner
                .run_step("count", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42u32)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_step_is_not_recorded() {
        let store = Arc::new(InMemoryRunStore::new());
        let (run_id, runner) = new_runner(&store).await;

        let result: Result<u32, _> = runner
            .run_step("flaky", || async {
                Err(RunError::Database(DatabaseError::QueryFailed(
                    "connection reset".to_string(),
                )))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.step_count(run_id).await, 0);

        // A later attempt succeeds and records
        let value: u32 = runner.run_step("flaky", || async { Ok(7u32) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(store.step_count(run_id).await, 1);
    }

    #[tokio::test]
    async fn test_sleep_until_suspends_then_resumes() {
        let store = Arc::new(InMemoryRunStore::new());
        let (run_id, runner) = new_runner(&store).await;
        let wake_at = Utc::now() + Duration::days(3);

        // First pass parks the run
        let result = runner.run_step("noop", || async { Ok(true) }).await;
        assert!(result.is_ok());
        let err = runner.sleep_until("wait", wake_at).await.unwrap_err();
        assert!(matches!(err, RunError::Suspended { .. }));

        let run = store.find_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Waiting);
        assert_eq!(run.wake_at, Some(wake_at));

        // The scheduler records the sleep step at wake time; the next pass
        // sails through
        store
            .record_step(run_id, "wait", &serde_json::json!({ "woke_at": Utc::now() }))
            .await
            .unwrap();
        assert!(runner.sleep_until("wait", wake_at).await.is_ok());
    }

    #[tokio::test]
    async fn test_recording_same_step_twice_keeps_first_output() {
        let store = Arc::new(InMemoryRunStore::new());
        let (run_id, _) = new_runner(&store).await;

        store
            .record_step(run_id, "s", &serde_json::json!(1))
            .await
            .unwrap();
        store
            .record_step(run_id, "s", &serde_json::json!(2))
            .await
            .unwrap();

        let value = store.find_step(run_id, "s").await.unwrap().unwrap();
        assert_eq!(value, serde_json::json!(1));
    }
}
