// Task repository: read-only view of tasks for the notification flow

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::TaskDetail;
use tracing::instrument;
use uuid::Uuid;

/// Repository for reading tasks. The notification core never mutates tasks;
/// it only needs the task joined with its assignee and project.
pub struct TaskRepository {
    pool: DbPool,
}

impl TaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Fetch a task with its assignee and project eagerly included.
    /// Returns None when the task has been deleted.
    #[instrument(skip(self))]
    pub async fn find_detail(&self, task_id: Uuid) -> Result<Option<TaskDetail>, DatabaseError> {
        let detail = sqlx::query_as::<_, TaskDetail>(
            r#"
            SELECT
                t.id, t.title, t.description, t.due_date, t.status,
                u.id AS assignee_id,
                u.name AS assignee_name,
                u.email AS assignee_email,
                p.id AS project_id,
                p.name AS project_name
            FROM tasks t
            JOIN users u ON u.id = t.assignee_id
            JOIN projects p ON p.id = t.project_id
            WHERE t.id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(detail)
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_task_repository_module_compiles() {
        // The join itself is exercised by the integration tests
    }
}
