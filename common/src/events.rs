// Canonical event envelope and catalogue for the bus

use crate::errors::ValidationError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deriving stable run ids from event ids (UUIDv5)
const RUN_ID_NAMESPACE: Uuid = Uuid::from_u128(0x8f6e_1b2a_4d3c_5e4f_9a8b_7c6d_5e4f_3a2b);

/// Event names as delivered on the bus. The `identity/` family is produced
/// by translating identity-provider webhooks; the `app/` family comes from
/// the product itself; `notify/` is internal to the scheduler.
pub mod names {
    pub const USER_CREATED: &str = "identity/user.created";
    pub const USER_UPDATED: &str = "identity/user.updated";
    pub const USER_DELETED: &str = "identity/user.deleted";
    pub const ORGANIZATION_CREATED: &str = "identity/organization.created";
    pub const ORGANIZATION_UPDATED: &str = "identity/organization.updated";
    pub const ORGANIZATION_DELETED: &str = "identity/organization.deleted";
    pub const MEMBERSHIP_ACCEPTED: &str = "identity/membership.accepted";
    pub const TASK_ASSIGNED: &str = "app/task.assigned";
    pub const TASK_DELETED: &str = "app/task.deleted";
    pub const RUN_RESUME: &str = "notify/run.resume";
}

/// Event is the envelope every producer publishes and every handler receives.
/// The id doubles as the broker-side deduplication key, so a redelivered
/// event always carries the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub data: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    /// Build an event from a typed payload
    pub fn new<T: Serialize>(name: &str, payload: &T) -> Result<Self, ValidationError> {
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            data: serde_json::to_value(payload)?,
            occurred_at: Utc::now(),
        })
    }

    /// NATS subject this event is published on: `events.` plus the event
    /// name with `/` flattened to `.`
    pub fn subject(&self) -> String {
        format!("events.{}", self.name.replace('/', "."))
    }

    /// Decode the payload into its typed form
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ValidationError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Stable run id for this event. Derived (UUIDv5) from the event id, so
    /// redeliveries of the same event map to the same notification run.
    pub fn run_id(&self) -> Uuid {
        Uuid::new_v5(&RUN_ID_NAMESPACE, self.id.as_bytes())
    }
}

// ============================================================================
// Typed payloads
// ============================================================================

/// Payload of `identity/user.created` and `identity/user.updated`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPayload {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Payload of `identity/user.deleted`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
}

/// Payload of `identity/organization.created` and `.updated`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationPayload {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Payload of `identity/organization.deleted`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationRef {
    pub id: String,
}

/// Payload of `identity/membership.accepted`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipPayload {
    pub user_id: String,
    pub organization_id: String,
    pub role: String,
}

/// Payload of `app/task.assigned`. `origin` is the base URL used to build
/// the "view task" link in notification emails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignedPayload {
    pub task_id: Uuid,
    pub origin: String,
}

/// Payload of `app/task.deleted`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRef {
    pub task_id: Uuid,
}

/// Payload of `notify/run.resume`, published by the scheduler when a durable
/// wait elapses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResumePayload {
    pub run_id: Uuid,
}
