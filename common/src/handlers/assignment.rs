// Task assignment notification flow
//
// On `app/task.assigned`: load the task, send the assignment email, and,
// unless the task is due today, durably wait until the due date, re-read the
// task, and send a reminder only if it is still not DONE. Every side effect
// is a named durable step, so redelivered events and crash-resumed runs
// never repeat an email.

use crate::db::repositories::TaskRepository;
use crate::errors::{DatabaseError, RunError};
use crate::events::TaskAssignedPayload;
use crate::mailer::{send_with_retry, templates, Mailer};
use crate::models::{NotificationRun, RunState, TaskDetail, TaskStatus};
use crate::retry::ExponentialBackoff;
use crate::runtime::{RunStore, StepRunner};
use crate::telemetry;
use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const STEP_LOAD_TASK: &str = "load-task";
pub const STEP_SEND_ASSIGNMENT: &str = "send-assignment-email";
pub const STEP_DECIDE_WAIT: &str = "decide-reminder-wait";
pub const STEP_WAIT_DUE: &str = "wait-for-due-date";
pub const STEP_CHECK_COMPLETED: &str = "check-task-completed";
pub const STEP_SEND_REMINDER: &str = "send-reminder-email";

/// Outcome of the calendar-date comparison between the due date and "today"
/// at event-processing time. Memoized as a step so a run resumed on its due
/// date keeps the decision it made when the assignment arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
enum WaitDecision {
    DueToday,
    Wait,
    Overdue,
}

/// Task read seam for the flow. Backed by `TaskRepository` in production
/// and by an in-memory map in tests.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn find_detail(&self, task_id: Uuid) -> Result<Option<TaskDetail>, DatabaseError>;
}

#[async_trait]
impl TaskStore for TaskRepository {
    async fn find_detail(&self, task_id: Uuid) -> Result<Option<TaskDetail>, DatabaseError> {
        TaskRepository::find_detail(self, task_id).await
    }
}

/// The notification flow with its collaborators injected once at startup
pub struct AssignmentNotifier {
    tasks: Arc<dyn TaskStore>,
    mailer: Arc<dyn Mailer>,
    runs: Arc<dyn RunStore>,
    timezone: Tz,
    mail_retry: ExponentialBackoff,
}

impl AssignmentNotifier {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        mailer: Arc<dyn Mailer>,
        runs: Arc<dyn RunStore>,
        timezone: Tz,
        mail_max_retries: u32,
    ) -> Self {
        Self {
            tasks,
            mailer,
            runs,
            timezone,
            mail_retry: ExponentialBackoff::with_config(1_000, 30_000, 0.1, mail_max_retries),
        }
    }

    /// Entry point for a delivered `app/task.assigned` event.
    ///
    /// The run id is stable per event, so a redelivery either finds the run
    /// already terminal (skip), parked on its wait (skip, the scheduler owns
    /// it), or mid-flight (re-execute, replaying memoized steps).
    #[instrument(skip(self, payload), fields(run_id = %run_id, task_id = %payload.task_id))]
    pub async fn on_task_assigned(
        &self,
        run_id: Uuid,
        payload: &TaskAssignedPayload,
    ) -> Result<(), RunError> {
        let run = NotificationRun::new(run_id, payload.task_id, payload.origin.clone());
        let created = self.runs.create_run(&run).await?;

        if !created {
            let Some(existing) = self.runs.find_run(run_id).await? else {
                warn!("Run row vanished after conflict, skipping");
                return Ok(());
            };
            if existing.is_terminal() {
                info!(state = %existing.state, "Run already finished, ignoring redelivery");
                return Ok(());
            }
            if existing.state == RunState::Waiting {
                info!("Run is parked on its durable wait, ignoring redelivery");
                return Ok(());
            }
        }

        self.execute(run_id, payload.task_id, &payload.origin).await
    }

    /// Entry point for `notify/run.resume`, published by the scheduler when
    /// the durable wait elapses
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn on_run_resume(&self, run_id: Uuid) -> Result<(), RunError> {
        let Some(run) = self.runs.find_run(run_id).await? else {
            warn!("Resume for unknown run, skipping");
            return Ok(());
        };

        if run.is_terminal() {
            info!(state = %run.state, "Resume for finished run, skipping");
            return Ok(());
        }

        self.execute(run.id, run.task_id, &run.origin).await
    }

    async fn execute(&self, run_id: Uuid, task_id: Uuid, origin: &str) -> Result<(), RunError> {
        telemetry::record_run_started();
        let steps = StepRunner::new(run_id, Arc::clone(&self.runs));

        match self.drive(&steps, task_id, origin).await {
            Ok(()) => {
                self.runs.mark_completed(run_id).await?;
                telemetry::record_run_completed("completed");
                info!(run_id = %run_id, "Notification run completed");
                Ok(())
            }
            Err(RunError::Suspended { wake_at }) => {
                // Not a failure: the run is durably parked and the scheduler
                // re-invokes it at wake_at
                info!(run_id = %run_id, wake_at = %wake_at, "Notification run suspended");
                Ok(())
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Notification run attempt failed");
                if e.is_scheduling() {
                    // No redelivery can repair a corrupt memo; park the run
                    // as failed so it stops consuming deliveries
                    if let Err(mark_err) = self.runs.mark_failed(run_id, &e.to_string()).await {
                        warn!(error = %mark_err, "Could not record run failure");
                    }
                    telemetry::record_run_completed("failed");
                }
                Err(e)
            }
        }
    }

    /// The steps themselves. Called for fresh runs and resumed runs alike;
    /// completed steps replay from their memos.
    async fn drive(&self, steps: &StepRunner, task_id: Uuid, origin: &str) -> Result<(), RunError> {
        // Load the task with assignee and project included
        let Some(task) = steps
            .run_step(STEP_LOAD_TASK, || async {
                Ok(self.tasks.find_detail(task_id).await?)
            })
            .await?
        else {
            info!(task_id = %task_id, "Task no longer exists, ending run without email");
            return Ok(());
        };

        // Immediate assignment email. A send that exhausts its retries is
        // logged and recorded as unsent; it never aborts the wait below.
        steps
            .run_step(STEP_SEND_ASSIGNMENT, || async {
                let message = templates::assignment_email(&task, origin, self.timezone);
                match send_with_retry(self.mailer.as_ref(), &message, &self.mail_retry).await {
                    Ok(()) => {
                        telemetry::record_email_sent("assignment");
                        Ok(true)
                    }
                    Err(e) => {
                        error!(
                            task_id = %task.id,
                            to = %task.assignee_email,
                            error = %e,
                            "Assignment email failed after retries, continuing"
                        );
                        telemetry::record_email_failure("assignment");
                        Ok(false)
                    }
                }
            })
            .await?;

        // Calendar-date comparison in the one configured zone, made once at
        // event-processing time
        let decision = steps
            .run_step(STEP_DECIDE_WAIT, || async {
                let today = Utc::now().with_timezone(&self.timezone).date_naive();
                let due_day = task.due_date.with_timezone(&self.timezone).date_naive();
                Ok(if due_day == today {
                    WaitDecision::DueToday
                } else if due_day > today {
                    WaitDecision::Wait
                } else {
                    WaitDecision::Overdue
                })
            })
            .await?;

        match decision {
            WaitDecision::DueToday => {
                info!(task_id = %task.id, "Task is due today, no reminder scheduled");
                return Ok(());
            }
            WaitDecision::Wait => {
                steps.sleep_until(STEP_WAIT_DUE, task.due_date).await?;
            }
            WaitDecision::Overdue => {
                // Already past due at assignment time, go straight to the
                // completion check
            }
        }

        // Re-read the task as of the resumed moment
        let Some(current) = steps
            .run_step(STEP_CHECK_COMPLETED, || async {
                Ok(self.tasks.find_detail(task_id).await?)
            })
            .await?
        else {
            info!(task_id = %task_id, "Task deleted during the wait, no reminder");
            return Ok(());
        };

        if current.status == TaskStatus::Done {
            info!(task_id = %current.id, "Task completed before the due date, no reminder");
            return Ok(());
        }

        // Reminder goes to the assignee on the re-read snapshot
        steps
            .run_step(STEP_SEND_REMINDER, || async {
                let message = templates::reminder_email(&current, origin, self.timezone);
                match send_with_retry(self.mailer.as_ref(), &message, &self.mail_retry).await {
                    Ok(()) => {
                        telemetry::record_email_sent("reminder");
                        Ok(true)
                    }
                    Err(e) => {
                        error!(
                            task_id = %current.id,
                            to = %current.assignee_email,
                            error = %e,
                            "Reminder email failed after retries"
                        );
                        telemetry::record_email_failure("reminder");
                        Ok(false)
                    }
                }
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::EmailMessage;
    use crate::runtime::testing::InMemoryRunStore;
    use chrono::Duration;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    struct FakeTaskStore {
        tasks: Mutex<HashMap<Uuid, TaskDetail>>,
    }

    impl FakeTaskStore {
        fn new() -> Self {
            Self {
                tasks: Mutex::new(HashMap::new()),
            }
        }

        async fn insert(&self, task: TaskDetail) {
            self.tasks.lock().await.insert(task.id, task);
        }

        async fn remove(&self, task_id: Uuid) {
            self.tasks.lock().await.remove(&task_id);
        }

        async fn set_status(&self, task_id: Uuid, status: TaskStatus) {
            if let Some(task) = self.tasks.lock().await.get_mut(&task_id) {
                task.status = status;
            }
        }
    }

    #[async_trait]
    impl TaskStore for FakeTaskStore {
        async fn find_detail(
            &self,
            task_id: Uuid,
        ) -> Result<Option<TaskDetail>, DatabaseError> {
            Ok(self.tasks.lock().await.get(&task_id).cloned())
        }
    }

    struct RecordingMailer {
        sent: Mutex<Vec<EmailMessage>>,
        fail_remaining: AtomicU32,
    }

    impl RecordingMailer {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_remaining: AtomicU32::new(0),
            }
        }

        fn failing(times: u32) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_remaining: AtomicU32::new(times),
            }
        }

        async fn sent_count(&self) -> usize {
            self.sent.lock().await.len()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, message: &EmailMessage) -> Result<(), crate::errors::MailError> {
            if self.fail_remaining.load(Ordering::SeqCst) > 0 {
                self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(crate::errors::MailError::DeliveryFailed(
                    "smtp down".to_string(),
                ));
            }
            self.sent.lock().await.push(message.clone());
            Ok(())
        }
    }

    struct Harness {
        tasks: Arc<FakeTaskStore>,
        mailer: Arc<RecordingMailer>,
        runs: Arc<InMemoryRunStore>,
        notifier: AssignmentNotifier,
    }

    fn harness_with_mailer(mailer: RecordingMailer) -> Harness {
        let tasks = Arc::new(FakeTaskStore::new());
        let mailer = Arc::new(mailer);
        let runs = Arc::new(InMemoryRunStore::new());
        let notifier = AssignmentNotifier::new(
            Arc::clone(&tasks) as Arc<dyn TaskStore>,
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            Arc::clone(&runs) as Arc<dyn RunStore>,
            chrono_tz::UTC,
            0,
        );
        Harness {
            tasks,
            mailer,
            runs,
            notifier,
        }
    }

    fn harness() -> Harness {
        harness_with_mailer(RecordingMailer::new())
    }

    fn task_due_in(days: i64) -> TaskDetail {
        TaskDetail {
            id: Uuid::new_v4(),
            title: "Prepare quarterly report".to_string(),
            description: "Numbers for Q1".to_string(),
            due_date: Utc::now() + Duration::days(days),
            status: TaskStatus::Todo,
            assignee_id: "user_1".to_string(),
            assignee_name: "Ana".to_string(),
            assignee_email: "a@x.com".to_string(),
            project_id: Uuid::new_v4(),
            project_name: "Finance".to_string(),
        }
    }

    fn payload(task: &TaskDetail) -> TaskAssignedPayload {
        TaskAssignedPayload {
            task_id: task.id,
            origin: "https://app.example.com".to_string(),
        }
    }

    /// Simulate the scheduler: record the sleep step so the resumed run
    /// continues past its wait
    async fn wake(runs: &InMemoryRunStore, run_id: Uuid) {
        runs.record_step(
            run_id,
            STEP_WAIT_DUE,
            &serde_json::json!({ "woke_at": Utc::now() }),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_due_today_sends_one_email_and_completes() {
        let h = harness();
        let task = task_due_in(0);
        h.tasks.insert(task.clone()).await;

        let run_id = Uuid::new_v4();
        h.notifier
            .on_task_assigned(run_id, &payload(&task))
            .await
            .unwrap();

        assert_eq!(h.mailer.sent_count().await, 1);
        let run = h.runs.find_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Completed);
        assert!(run.wake_at.is_none());
    }

    #[tokio::test]
    async fn test_future_due_date_parks_the_run() {
        let h = harness();
        let task = task_due_in(9);
        h.tasks.insert(task.clone()).await;

        let run_id = Uuid::new_v4();
        h.notifier
            .on_task_assigned(run_id, &payload(&task))
            .await
            .unwrap();

        assert_eq!(h.mailer.sent_count().await, 1);
        let sent = h.mailer.sent.lock().await;
        assert!(sent[0].subject.starts_with("New Task Assignment"));
        drop(sent);

        let run = h.runs.find_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Waiting);
        assert_eq!(run.wake_at, Some(task.due_date));
    }

    #[tokio::test]
    async fn test_reminder_sent_when_still_not_done() {
        let h = harness();
        let task = task_due_in(9);
        h.tasks.insert(task.clone()).await;

        let run_id = Uuid::new_v4();
        h.notifier
            .on_task_assigned(run_id, &payload(&task))
            .await
            .unwrap();

        h.tasks.set_status(task.id, TaskStatus::InProgress).await;
        wake(&h.runs, run_id).await;
        h.notifier.on_run_resume(run_id).await.unwrap();

        assert_eq!(h.mailer.sent_count().await, 2);
        let sent = h.mailer.sent.lock().await;
        assert!(sent[1].subject.starts_with("Reminder for"));
        assert_eq!(sent[1].to, "a@x.com");
        drop(sent);

        let run = h.runs.find_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Completed);
    }

    #[tokio::test]
    async fn test_no_reminder_when_done_by_due_date() {
        let h = harness();
        let task = task_due_in(9);
        h.tasks.insert(task.clone()).await;

        let run_id = Uuid::new_v4();
        h.notifier
            .on_task_assigned(run_id, &payload(&task))
            .await
            .unwrap();

        h.tasks.set_status(task.id, TaskStatus::Done).await;
        wake(&h.runs, run_id).await;
        h.notifier.on_run_resume(run_id).await.unwrap();

        assert_eq!(h.mailer.sent_count().await, 1);
        let run = h.runs.find_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Completed);
    }

    #[tokio::test]
    async fn test_no_reminder_when_task_deleted_during_wait() {
        let h = harness();
        let task = task_due_in(9);
        h.tasks.insert(task.clone()).await;

        let run_id = Uuid::new_v4();
        h.notifier
            .on_task_assigned(run_id, &payload(&task))
            .await
            .unwrap();

        h.tasks.remove(task.id).await;
        wake(&h.runs, run_id).await;
        // No error escapes the run
        h.notifier.on_run_resume(run_id).await.unwrap();

        assert_eq!(h.mailer.sent_count().await, 1);
        let run = h.runs.find_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Completed);
    }

    #[tokio::test]
    async fn test_missing_task_at_start_ends_run_without_email() {
        let h = harness();
        let task = task_due_in(5);
        // Never inserted into the store

        let run_id = Uuid::new_v4();
        h.notifier
            .on_task_assigned(run_id, &payload(&task))
            .await
            .unwrap();

        assert_eq!(h.mailer.sent_count().await, 0);
        let run = h.runs.find_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Completed);
    }

    #[tokio::test]
    async fn test_redelivery_does_not_resend_assignment_email() {
        let h = harness();
        let task = task_due_in(9);
        h.tasks.insert(task.clone()).await;

        let run_id = Uuid::new_v4();
        let p = payload(&task);
        h.notifier.on_task_assigned(run_id, &p).await.unwrap();
        // At-least-once delivery: the same event arrives again
        h.notifier.on_task_assigned(run_id, &p).await.unwrap();

        assert_eq!(h.mailer.sent_count().await, 1);
    }

    #[tokio::test]
    async fn test_redelivery_mid_flight_replays_memoized_steps() {
        let h = harness();
        let task = task_due_in(9);
        h.tasks.insert(task.clone()).await;

        let run_id = Uuid::new_v4();
        let p = payload(&task);
        h.notifier.on_task_assigned(run_id, &p).await.unwrap();

        // Simulate a crash before the wait was recorded: force the run back
        // to running and redeliver
        {
            let mut runs = h.runs.runs.lock().await;
            let run = runs.get_mut(&run_id).unwrap();
            run.state = RunState::Running;
        }
        h.notifier.on_task_assigned(run_id, &p).await.unwrap();

        // The assignment email was replayed from its memo, not re-sent
        assert_eq!(h.mailer.sent_count().await, 1);
        let run = h.runs.find_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Waiting);
    }

    #[tokio::test]
    async fn test_assignment_send_failure_still_schedules_the_wait() {
        let h = harness_with_mailer(RecordingMailer::failing(10));
        let task = task_due_in(9);
        h.tasks.insert(task.clone()).await;

        let run_id = Uuid::new_v4();
        h.notifier
            .on_task_assigned(run_id, &payload(&task))
            .await
            .unwrap();

        // Nothing was delivered, but the run is parked on its wait anyway
        assert_eq!(h.mailer.sent_count().await, 0);
        let run = h.runs.find_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Waiting);
    }

    #[tokio::test]
    async fn test_cancelled_run_is_not_resumed() {
        let h = harness();
        let task = task_due_in(9);
        h.tasks.insert(task.clone()).await;

        let run_id = Uuid::new_v4();
        h.notifier
            .on_task_assigned(run_id, &payload(&task))
            .await
            .unwrap();

        {
            let mut runs = h.runs.runs.lock().await;
            runs.get_mut(&run_id).unwrap().state = RunState::Cancelled;
        }
        wake(&h.runs, run_id).await;
        h.notifier.on_run_resume(run_id).await.unwrap();

        assert_eq!(h.mailer.sent_count().await, 1);
        let run = h.runs.find_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Cancelled);
    }

    #[tokio::test]
    async fn test_overdue_task_goes_straight_to_completion_check() {
        let h = harness();
        let task = task_due_in(-3);
        h.tasks.insert(task.clone()).await;

        let run_id = Uuid::new_v4();
        h.notifier
            .on_task_assigned(run_id, &payload(&task))
            .await
            .unwrap();

        // Assignment email plus an immediate reminder, no wait in between
        assert_eq!(h.mailer.sent_count().await, 2);
        let run = h.runs.find_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Completed);
    }
}
