// Identity sync handlers: one database write per identity-provider event

use crate::db::repositories::{UserRepository, WorkspaceRepository};
use crate::errors::DatabaseError;
use crate::events::{MembershipPayload, OrganizationPayload, OrganizationRef, UserPayload, UserRef};
use crate::models::{MemberRole, User, Workspace};
use chrono::Utc;
use std::str::FromStr;
use tracing::{instrument, warn};

/// Handlers that mirror identity-provider state into the local store.
/// Each one is a single create/update/delete translation; idempotency under
/// redelivery comes from the conflict-tolerant queries underneath.
pub struct IdentitySync {
    users: UserRepository,
    workspaces: WorkspaceRepository,
}

impl IdentitySync {
    pub fn new(users: UserRepository, workspaces: WorkspaceRepository) -> Self {
        Self { users, workspaces }
    }

    #[instrument(skip(self, payload), fields(user_id = %payload.id))]
    pub async fn user_created(&self, payload: &UserPayload) -> Result<(), DatabaseError> {
        let now = Utc::now();
        let user = User {
            id: payload.id.clone(),
            email: payload.email.clone(),
            name: payload.name.clone(),
            image_url: payload.image_url.clone(),
            created_at: now,
            updated_at: now,
        };
        self.users.create(&user).await
    }

    #[instrument(skip(self, payload), fields(user_id = %payload.id))]
    pub async fn user_updated(&self, payload: &UserPayload) -> Result<(), DatabaseError> {
        self.users
            .update(
                &payload.id,
                &payload.email,
                &payload.name,
                payload.image_url.as_deref(),
            )
            .await
    }

    #[instrument(skip(self, payload), fields(user_id = %payload.id))]
    pub async fn user_deleted(&self, payload: &UserRef) -> Result<(), DatabaseError> {
        self.users.delete(&payload.id).await
    }

    /// Create the workspace and enroll its creator as an ADMIN member
    #[instrument(skip(self, payload), fields(workspace_id = %payload.id))]
    pub async fn organization_created(
        &self,
        payload: &OrganizationPayload,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now();
        let workspace = Workspace {
            id: payload.id.clone(),
            name: payload.name.clone(),
            slug: payload.slug.clone(),
            owner_id: payload.created_by.clone(),
            image_url: payload.image_url.clone(),
            created_at: now,
            updated_at: now,
        };
        self.workspaces.create(&workspace).await?;

        if let Some(creator) = &payload.created_by {
            self.workspaces
                .add_member(creator, &payload.id, MemberRole::Admin)
                .await?;
        }

        Ok(())
    }

    #[instrument(skip(self, payload), fields(workspace_id = %payload.id))]
    pub async fn organization_updated(
        &self,
        payload: &OrganizationPayload,
    ) -> Result<(), DatabaseError> {
        self.workspaces
            .update(
                &payload.id,
                &payload.name,
                &payload.slug,
                payload.image_url.as_deref(),
            )
            .await
    }

    #[instrument(skip(self, payload), fields(workspace_id = %payload.id))]
    pub async fn organization_deleted(
        &self,
        payload: &OrganizationRef,
    ) -> Result<(), DatabaseError> {
        self.workspaces.delete(&payload.id).await
    }

    /// Enroll an invited user once they accept
    #[instrument(skip(self, payload), fields(workspace_id = %payload.organization_id))]
    pub async fn membership_accepted(
        &self,
        payload: &MembershipPayload,
    ) -> Result<(), DatabaseError> {
        let role = parse_role(&payload.role);
        self.workspaces
            .add_member(&payload.user_id, &payload.organization_id, role)
            .await
    }
}

/// The provider sends role names in assorted casings; unknown roles fall
/// back to plain membership rather than rejecting the event
fn parse_role(role: &str) -> MemberRole {
    MemberRole::from_str(role).unwrap_or_else(|_| {
        warn!(role = role, "Unknown member role, defaulting to MEMBER");
        MemberRole::Member
    })
}
