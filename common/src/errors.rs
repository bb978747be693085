// Error handling framework
// Store, broker, publisher and job manager error taxonomy

use thiserror::Error;

/// Validation errors, rejected before anything reaches the store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },
}

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

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Schema setup failed: {0}")]
    SchemaFailed(String),
}

/// Queue-related errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to queue: {0}")]
    Connection(String),

    #[error("Failed to create stream: {0}")]
    StreamCreation(String),

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Queue operation timeout: {0}")]
    Timeout(String),
}

/// Errors raised while publishing a single due job
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to advance job schedule: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to emit job message: {0}")]
    Queue(#[from] QueueError),
}

/// Errors surfaced by the job manager to its callers
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Job not found: routing_key={routing_key}")]
    NotFound { routing_key: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl JobError {
    pub fn not_found(routing_key: impl Into<String>) -> Self {
        JobError::NotFound {
            routing_key: routing_key.into(),
        }
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => DatabaseError::QueryFailed(db_err.message().to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::ConnectionFailed(err.to_string())
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::Database(err.into())
    }
}
