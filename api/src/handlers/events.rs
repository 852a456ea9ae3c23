// Application event ingest: the task-management side of the product posts
// here after an assignment or deletion, and the handler publishes the
// matching event for the worker

use axum::{extract::State, http::StatusCode, Json};
use common::events::{names, Event, TaskAssignedPayload, TaskRef};
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::{ErrorResponse, EventAccepted};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TaskAssignedRequest {
    pub task_id: Uuid,
    pub origin: String,
}

#[derive(Debug, Deserialize)]
pub struct TaskDeletedRequest {
    pub task_id: Uuid,
}

/// Publish `app/task.assigned` for a freshly assigned task
#[tracing::instrument(skip(state, request), fields(task_id = %request.task_id))]
pub async fn task_assigned(
    State(state): State<AppState>,
    Json(request): Json<TaskAssignedRequest>,
) -> Result<(StatusCode, Json<EventAccepted>), ErrorResponse> {
    if request.origin.is_empty() {
        return Err(ErrorResponse::new("validation_error", "origin is required"));
    }

    let event = Event::new(
        names::TASK_ASSIGNED,
        &TaskAssignedPayload {
            task_id: request.task_id,
            origin: request.origin,
        },
    )
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to build event");
        ErrorResponse::new("internal_error", "Failed to build event")
    })?;

    state.publisher.publish(&event).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to publish event");
        ErrorResponse::new("internal_error", "Failed to publish event")
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EventAccepted { event_id: event.id }),
    ))
}

/// Publish `app/task.deleted` so pending notification runs are cancelled
#[tracing::instrument(skip(state, request), fields(task_id = %request.task_id))]
pub async fn task_deleted(
    State(state): State<AppState>,
    Json(request): Json<TaskDeletedRequest>,
) -> Result<(StatusCode, Json<EventAccepted>), ErrorResponse> {
    let event = Event::new(
        names::TASK_DELETED,
        &TaskRef {
            task_id: request.task_id,
        },
    )
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to build event");
        ErrorResponse::new("internal_error", "Failed to build event")
    })?;

    state.publisher.publish(&event).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to publish event");
        ErrorResponse::new("internal_error", "Failed to publish event")
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EventAccepted { event_id: event.id }),
    ))
}
