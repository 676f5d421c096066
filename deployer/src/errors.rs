//! Error types for the deployer

use std::time::Duration;

use thiserror::Error;

/// Main error type for the deployer process
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Queue error: {0}")]
    QueueError(#[from] QueueError),

    #[error("Status error: {0}")]
    StatusError(#[from] StatusError),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

/// Job queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// The queue backend could not be reached; transient, retried by the worker.
    #[error("Queue transport failure: {0}")]
    TransportFailure(String),

    /// A dequeued message could not be turned into a job. The message is
    /// already removed from the queue.
    #[error("Malformed deployment job: {reason}")]
    MalformedJob { id: Option<String>, reason: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::TransportFailure(err.to_string())
    }
}

/// Status store contract violations and durable-store failures
#[derive(Error, Debug)]
pub enum StatusError {
    #[error("Deployment not found: {0}")]
    NotFound(String),

    #[error("Deployment already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid state for deployment {id}: {reason}")]
    InvalidState { id: String, reason: String },

    #[error("Durable store error: {0}")]
    Durable(String),
}

impl From<sqlx::Error> for StatusError {
    fn from(err: sqlx::Error) -> Self {
        StatusError::Durable(err.to_string())
    }
}

/// Pipeline stage failures. The `Display` text becomes the deployment's
/// `errorMessage`, so stage errors print the underlying error text only.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    FetchFailure(String),

    #[error("{0}")]
    BuildFailure(String),

    #[error("Build output directory not found")]
    BuildOutputMissing,

    #[error("{0}")]
    PublishFailure(String),

    #[error("{stage} timed out after {after:?}")]
    TimedOut { stage: &'static str, after: Duration },

    /// The status record went terminal underneath the worker.
    #[error("Deployment cancelled by user")]
    Cancelled,

    #[error("{0}")]
    Status(#[from] StatusError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}
