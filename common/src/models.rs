use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identity Models
// ============================================================================

/// User mirrors an account owned by the external identity provider.
/// The id is the provider-issued identifier, not one we generate.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Workspace mirrors an organization at the identity provider
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub owner_id: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// WorkspaceMember links a user to a workspace with a role
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkspaceMember {
    pub user_id: String,
    pub workspace_id: String,
    #[sqlx(try_from = "String")]
    pub role: MemberRole,
    pub created_at: DateTime<Utc>,
}

/// MemberRole within a workspace
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemberRole {
    Admin,
    Member,
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberRole::Admin => write!(f, "ADMIN"),
            MemberRole::Member => write!(f, "MEMBER"),
        }
    }
}

impl FromStr for MemberRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Ok(MemberRole::Admin),
            "MEMBER" => Ok(MemberRole::Member),
            _ => Err(format!("Invalid member role: {}", s)),
        }
    }
}

impl TryFrom<String> for MemberRole {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

// ============================================================================
// Task Models
// ============================================================================

/// Task as stored by the task-management side of the product.
/// This core only ever reads tasks; mutation happens elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub assignee_id: String,
    pub title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// TaskStatus lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "TODO"),
            TaskStatus::InProgress => write!(f, "IN_PROGRESS"),
            TaskStatus::Done => write!(f, "DONE"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TODO" => Ok(TaskStatus::Todo),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "DONE" => Ok(TaskStatus::Done),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

/// TaskDetail is the scheduler-facing read of a task: the task joined with
/// its current assignee and project. This is what email templates render from.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskDetail {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    pub assignee_id: String,
    pub assignee_name: String,
    pub assignee_email: String,
    pub project_id: Uuid,
    pub project_name: String,
}

// ============================================================================
// Notification Run Models
// ============================================================================

/// NotificationRun is one durable execution of the assignment-notification
/// flow for a single triggering event. Its id is stable across redeliveries
/// of that event, which is what makes the flow idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationRun {
    pub id: Uuid,
    pub task_id: Uuid,
    pub origin: String,
    #[sqlx(try_from = "String")]
    pub state: RunState,
    pub wake_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationRun {
    /// Create a fresh run record for a task-assigned event
    pub fn new(id: Uuid, task_id: Uuid, origin: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            task_id,
            origin,
            state: RunState::Running,
            wake_at: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the run has reached a terminal state and must not execute again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }
}

/// RunState of a notification run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Waiting,
    Resuming,
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Running => write!(f, "running"),
            RunState::Waiting => write!(f, "waiting"),
            RunState::Resuming => write!(f, "resuming"),
            RunState::Completed => write!(f, "completed"),
            RunState::Cancelled => write!(f, "cancelled"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunState::Running),
            "waiting" => Ok(RunState::Waiting),
            "resuming" => Ok(RunState::Resuming),
            "completed" => Ok(RunState::Completed),
            "cancelled" => Ok(RunState::Cancelled),
            "failed" => Ok(RunState::Failed),
            _ => Err(format!("Invalid run state: {}", s)),
        }
    }
}

impl TryFrom<String> for RunState {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

/// RunStep is the memoized result of one named durable step of a run.
/// Presence of a row means the step completed and must not re-execute.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunStep {
    pub run_id: Uuid,
    pub step_name: String,
    #[sqlx(json)]
    pub output: serde_json::Value,
    pub completed_at: DateTime<Utc>,
}
