// Error handling framework

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Event bus errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to event bus: {0}")]
    Connection(String),

    #[error("Failed to create stream: {0}")]
    StreamCreation(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Failed to create consumer: {0}")]
    ConsumerCreation(String),

    #[error("Failed to publish event: {0}")]
    PublishFailed(String),

    #[error("Failed to consume event: {0}")]
    ConsumeFailed(String),

    #[error("Failed to acknowledge event: {0}")]
    AckFailed(String),

    #[error("Event serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Event deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Queue operation timeout: {0}")]
    Timeout(String),
}

/// Mail delivery errors
#[derive(Error, Debug)]
pub enum MailError {
    #[error("Invalid email address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build email message: {0}")]
    BuildFailed(String),

    #[error("SMTP transport setup failed: {0}")]
    TransportSetup(String),

    #[error("Email delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Notification run errors
///
/// `Suspended` is control flow, not a failure: the run has durably parked
/// itself and will be re-invoked by the scheduler at the recorded wake time.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Run suspended until {wake_at}")]
    Suspended { wake_at: DateTime<Utc> },

    #[error("Failed to persist step '{step}': {reason}")]
    Scheduling { step: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl RunError {
    /// Whether this error means the step runner itself failed to persist
    /// or resume state (operator-visible, alert-worthy)
    pub fn is_scheduling(&self) -> bool {
        matches!(self, RunError::Scheduling { .. })
    }
}

/// Webhook ingest errors
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Missing signature header")]
    MissingSignature,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
}

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

/// API response error type for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        let code = match err {
            WebhookError::InvalidSignature | WebhookError::MissingSignature => "UNAUTHORIZED",
            WebhookError::InvalidPayload(_) => "INVALID_PAYLOAD",
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::new("VALIDATION_ERROR", err.to_string())
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::new("QUEUE_ERROR", err.to_string())
    }
}

// Implement From for common external errors
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => DatabaseError::DuplicateKey(db_err.message().to_string()),
                        "23503" => DatabaseError::ForeignKeyViolation(db_err.message().to_string()),
                        _ => DatabaseError::QueryFailed(db_err.message().to_string()),
                    }
                } else {
                    DatabaseError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        ValidationError::InvalidJson(err.to_string())
    }
}
