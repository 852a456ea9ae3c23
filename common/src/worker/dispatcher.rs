// Event dispatch: routes delivered events to their handlers and decides
// ack/redeliver per outcome

use crate::db::repositories::RunRepository;
use crate::errors::DatabaseError;
use crate::events::{names, Event};
use crate::handlers::{AssignmentNotifier, IdentitySync};
use crate::queue::EventHandler;
use crate::telemetry::AlertNotifier;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{error, instrument, warn};

/// Routes events by name. Returning Ok acknowledges the event; returning
/// Err nacks it for redelivery. Business end states (sync target missing,
/// run already finished) are acknowledged, infrastructure failures are not.
pub struct EventDispatcher {
    identity: IdentitySync,
    notifier: Arc<AssignmentNotifier>,
    runs: RunRepository,
    alerts: Arc<dyn AlertNotifier>,
}

impl EventDispatcher {
    pub fn new(
        identity: IdentitySync,
        notifier: Arc<AssignmentNotifier>,
        runs: RunRepository,
        alerts: Arc<dyn AlertNotifier>,
    ) -> Self {
        Self {
            identity,
            notifier,
            runs,
            alerts,
        }
    }

    /// Wrap the dispatcher into the callback shape the consumer expects
    pub fn into_handler(self) -> EventHandler {
        let dispatcher = Arc::new(self);
        Arc::new(move |event| {
            let dispatcher = Arc::clone(&dispatcher);
            Box::pin(async move { dispatcher.dispatch(event).await })
        })
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, event_name = %event.name))]
    pub async fn dispatch(&self, event: Event) -> Result<(), anyhow::Error> {
        match event.name.as_str() {
            names::USER_CREATED => {
                let Some(payload) = decode(&event) else { return Ok(()) };
                complete_sync(self.identity.user_created(&payload).await)
            }
            names::USER_UPDATED => {
                let Some(payload) = decode(&event) else { return Ok(()) };
                complete_sync(self.identity.user_updated(&payload).await)
            }
            names::USER_DELETED => {
                let Some(payload) = decode(&event) else { return Ok(()) };
                complete_sync(self.identity.user_deleted(&payload).await)
            }
            names::ORGANIZATION_CREATED => {
                let Some(payload) = decode(&event) else { return Ok(()) };
                complete_sync(self.identity.organization_created(&payload).await)
            }
            names::ORGANIZATION_UPDATED => {
                let Some(payload) = decode(&event) else { return Ok(()) };
                complete_sync(self.identity.organization_updated(&payload).await)
            }
            names::ORGANIZATION_DELETED => {
                let Some(payload) = decode(&event) else { return Ok(()) };
                complete_sync(self.identity.organization_deleted(&payload).await)
            }
            names::MEMBERSHIP_ACCEPTED => {
                let Some(payload) = decode(&event) else { return Ok(()) };
                complete_sync(self.identity.membership_accepted(&payload).await)
            }
            names::TASK_ASSIGNED => {
                let Some(payload) = decode::<crate::events::TaskAssignedPayload>(&event) else {
                    return Ok(());
                };
                let run_id = event.run_id();
                self.complete_run(run_id, self.notifier.on_task_assigned(run_id, &payload).await)
                    .await
            }
            names::TASK_DELETED => {
                let Some(payload) = decode::<crate::events::TaskRef>(&event) else {
                    return Ok(());
                };
                self.runs
                    .cancel_pending_for_task(payload.task_id)
                    .await
                    .map(|_| ())
                    .map_err(Into::into)
            }
            names::RUN_RESUME => {
                let Some(payload) = decode::<crate::events::RunResumePayload>(&event) else {
                    return Ok(());
                };
                self.complete_run(
                    payload.run_id,
                    self.notifier.on_run_resume(payload.run_id).await,
                )
                .await
            }
            other => {
                warn!(event_name = %other, "No handler registered, ignoring event");
                Ok(())
            }
        }
    }

    /// Map a flow outcome to the ack/redeliver decision. Scheduling errors
    /// are alerted and acknowledged (the run was parked as failed; no
    /// redelivery can repair a corrupt memo); everything else retryable
    /// propagates for redelivery.
    async fn complete_run(
        &self,
        run_id: uuid::Uuid,
        result: Result<(), crate::errors::RunError>,
    ) -> Result<(), anyhow::Error> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_scheduling() => {
                if let Err(alert_err) = self.alerts.send_alert(&run_id, &e.to_string()).await {
                    error!(error = %alert_err, "Failed to send alert");
                }
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Decode a typed payload; an undecodable payload is dropped with an error
/// log rather than redelivered forever
fn decode<T: DeserializeOwned>(event: &Event) -> Option<T> {
    match event.payload() {
        Ok(payload) => Some(payload),
        Err(e) => {
            error!(
                event_id = %event.id,
                event_name = %event.name,
                error = %e,
                "Undecodable event payload, dropping"
            );
            None
        }
    }
}

/// Sync handlers treat a missing target as a legitimate end state: the
/// provider's view already moved on
fn complete_sync(result: Result<(), DatabaseError>) -> Result<(), anyhow::Error> {
    match result {
        Ok(()) => Ok(()),
        Err(DatabaseError::NotFound(msg)) => {
            warn!(reason = %msg, "Sync target missing, dropping event");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{names, Event, UserPayload};

    #[test]
    fn test_decode_well_formed_payload() {
        let event = Event::new(
            names::USER_CREATED,
            &UserPayload {
                id: "user_1".to_string(),
                email: "a@x.com".to_string(),
                name: "Ana".to_string(),
                image_url: None,
            },
        )
        .unwrap();

        let decoded: Option<UserPayload> = decode(&event);
        assert_eq!(decoded.unwrap().id, "user_1");
    }

    #[test]
    fn test_decode_mismatched_payload_returns_none() {
        let event = Event::new(
            names::USER_CREATED,
            &serde_json::json!({ "unexpected": true }),
        )
        .unwrap();

        let decoded: Option<UserPayload> = decode(&event);
        assert!(decoded.is_none());
    }

    #[test]
    fn test_not_found_sync_result_is_acknowledged() {
        let result = complete_sync(Err(DatabaseError::NotFound("User not found".to_string())));
        assert!(result.is_ok());
    }

    #[test]
    fn test_query_failure_sync_result_is_redelivered() {
        let result = complete_sync(Err(DatabaseError::QueryFailed(
            "connection reset".to_string(),
        )));
        assert!(result.is_err());
    }
}
