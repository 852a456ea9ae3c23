// Workspace repository: mirrors identity-provider organizations and
// memberships into the local store

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{MemberRole, Workspace, WorkspaceMember};
use chrono::Utc;
use tracing::instrument;

/// Repository for workspace and membership rows synced from the identity
/// provider
pub struct WorkspaceRepository {
    pool: DbPool,
}

impl WorkspaceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a workspace; redelivered `organization.created` events are
    /// no-ops
    #[instrument(skip(self, workspace), fields(workspace_id = %workspace.id))]
    pub async fn create(&self, workspace: &Workspace) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO workspaces (id, name, slug, owner_id, image_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&workspace.id)
        .bind(&workspace.name)
        .bind(&workspace.slug)
        .bind(&workspace.owner_id)
        .bind(&workspace.image_url)
        .bind(workspace.created_at)
        .bind(workspace.updated_at)
        .execute(self.pool.pool())
        .await?;

        tracing::info!(workspace_id = %workspace.id, "Workspace synced");
        Ok(())
    }

    /// Update a workspace's profile fields
    #[instrument(skip(self), fields(workspace_id = %id))]
    pub async fn update(
        &self,
        id: &str,
        name: &str,
        slug: &str,
        image_url: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE workspaces
            SET name = $2,
                slug = $3,
                image_url = $4,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(slug)
        .bind(image_url)
        .bind(Utc::now())
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!(
                "Workspace not found: {}",
                id
            )));
        }

        Ok(())
    }

    /// Delete a workspace. Member rows go with it via the FK cascade.
    #[instrument(skip(self), fields(workspace_id = %id))]
    pub async fn delete(&self, id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM workspaces WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        tracing::info!(
            workspace_id = %id,
            deleted = result.rows_affected(),
            "Workspace delete processed"
        );
        Ok(())
    }

    /// Add a member to a workspace; duplicate memberships are no-ops
    #[instrument(skip(self), fields(workspace_id = %workspace_id, user_id = %user_id))]
    pub async fn add_member(
        &self,
        user_id: &str,
        workspace_id: &str,
        role: MemberRole,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO workspace_members (user_id, workspace_id, role, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, workspace_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(workspace_id)
        .bind(role.to_string())
        .bind(Utc::now())
        .execute(self.pool.pool())
        .await?;

        tracing::info!(
            workspace_id = %workspace_id,
            user_id = %user_id,
            role = %role,
            "Workspace member synced"
        );
        Ok(())
    }

    /// Find all members of a workspace
    #[instrument(skip(self))]
    pub async fn find_members(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<WorkspaceMember>, DatabaseError> {
        let members = sqlx::query_as::<_, WorkspaceMember>(
            r#"
            SELECT user_id, workspace_id, role, created_at
            FROM workspace_members
            WHERE workspace_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(workspace_id)
        .fetch_all(self.pool.pool())
        .await?;

        Ok(members)
    }
}
