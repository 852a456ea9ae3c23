// User repository: mirrors identity-provider accounts into the local store

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::User;
use chrono::Utc;
use tracing::instrument;

/// Repository for user rows synced from the identity provider
pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a user. Redelivered `user.created` events hit the conflict arm
    /// and become no-ops.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn create(&self, user: &User) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, image_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.image_url)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(self.pool.pool())
        .await?;

        tracing::info!(user_id = %user.id, "User synced");
        Ok(())
    }

    /// Update a synced user's profile fields
    #[instrument(skip(self), fields(user_id = %id))]
    pub async fn update(
        &self,
        id: &str,
        email: &str,
        name: &str,
        image_url: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET email = $2,
                name = $3,
                image_url = $4,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(name)
        .bind(image_url)
        .bind(Utc::now())
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("User not found: {}", id)));
        }

        Ok(())
    }

    /// Delete a user. Deleting an absent row is a no-op, so redeliveries
    /// are harmless.
    #[instrument(skip(self), fields(user_id = %id))]
    pub async fn delete(&self, id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        tracing::info!(
            user_id = %id,
            deleted = result.rows_affected(),
            "User delete processed"
        );
        Ok(())
    }

    /// Find a user by id
    #[instrument(skip(self))]
    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>, DatabaseError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, image_url, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(user)
    }
}
