// Identity-provider webhook ingest: verify the signature, translate the
// provider envelope into a canonical event, and publish it

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use common::events::{names, Event};
use common::webhook::{verify_signature, SIGNATURE_HEADER};
use serde::Deserialize;

use crate::handlers::{ErrorResponse, EventAccepted};
use crate::state::AppState;

/// Provider envelope: `{ "type": "user.created", "data": { ... } }`
#[derive(Debug, Deserialize)]
struct IdentityWebhook {
    #[serde(rename = "type")]
    kind: String,
    data: serde_json::Value,
}

/// Map a provider event type to the canonical event name. Unknown types are
/// accepted and ignored so provider-side additions never break the endpoint.
fn canonical_event_name(kind: &str) -> Option<&'static str> {
    match kind {
        "user.created" => Some(names::USER_CREATED),
        "user.updated" => Some(names::USER_UPDATED),
        "user.deleted" => Some(names::USER_DELETED),
        "organization.created" => Some(names::ORGANIZATION_CREATED),
        "organization.updated" => Some(names::ORGANIZATION_UPDATED),
        "organization.deleted" => Some(names::ORGANIZATION_DELETED),
        "organizationInvitation.accepted" | "organizationMembership.created" => {
            Some(names::MEMBERSHIP_ACCEPTED)
        }
        _ => None,
    }
}

/// Handle identity-provider webhook POSTs
#[tracing::instrument(skip(state, headers, body))]
pub async fn handle_identity_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<EventAccepted>), ErrorResponse> {
    // 1. Verify the HMAC signature over the raw body
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Webhook request without signature header");
            ErrorResponse::new("unauthorized", "Missing signature header")
        })?;

    let valid = verify_signature(&body, signature, &state.config.webhooks.identity_secret)
        .map_err(|e| {
            tracing::warn!(error = %e, "Unprocessable webhook signature");
            ErrorResponse::new("unauthorized", "Invalid signature")
        })?;

    if !valid {
        tracing::warn!("Webhook signature mismatch");
        return Err(ErrorResponse::new("unauthorized", "Invalid signature"));
    }

    // 2. Parse the provider envelope
    let webhook: IdentityWebhook = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "Malformed webhook payload");
        ErrorResponse::new("validation_error", "Malformed webhook payload")
    })?;

    // 3. Translate and publish; unrecognized types are acked without an event
    let Some(event_name) = canonical_event_name(&webhook.kind) else {
        tracing::info!(kind = %webhook.kind, "Ignoring unhandled webhook type");
        return Ok((
            StatusCode::ACCEPTED,
            Json(EventAccepted {
                event_id: uuid::Uuid::nil(),
            }),
        ));
    };

    let event = Event::new(event_name, &webhook.data).map_err(|e| {
        tracing::error!(error = %e, "Failed to build event from webhook");
        ErrorResponse::new("internal_error", "Failed to build event")
    })?;

    state.publisher.publish(&event).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to publish event");
        ErrorResponse::new("internal_error", "Failed to publish event")
    })?;

    tracing::info!(
        event_id = %event.id,
        event_name = %event.name,
        "Webhook translated and published"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(EventAccepted { event_id: event.id }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_webhook_types_map_to_events() {
        assert_eq!(canonical_event_name("user.created"), Some(names::USER_CREATED));
        assert_eq!(
            canonical_event_name("organization.deleted"),
            Some(names::ORGANIZATION_DELETED)
        );
        assert_eq!(
            canonical_event_name("organizationInvitation.accepted"),
            Some(names::MEMBERSHIP_ACCEPTED)
        );
    }

    #[test]
    fn test_unknown_webhook_type_is_ignored() {
        assert_eq!(canonical_event_name("session.created"), None);
    }
}
