//! Error types for the scheduler.

use std::time::Duration;

use crate::jobs::model::JobKey;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Cron expression errors. Returned synchronously to whoever tried to add the job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("cron expression is empty")]
    Empty,

    #[error("invalid cron expression '{expr}': {reason}")]
    Invalid { expr: String, reason: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failures talking to the external execution service.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("executor unavailable: {0}")]
    Unavailable(String),

    #[error("executor rejected submission with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("executor call timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid executor response: {0}")]
    InvalidResponse(String),

    #[error("job {0} has no submission config")]
    MissingConfig(JobKey),
}

/// Notification delivery errors. Logged by callers, never retried.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to send alert on channel {channel}: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Notifier misconfigured: {0}")]
    Config(String),
}

/// Job lookup errors for API-level operations.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {key} not found")]
    NotFound { key: JobKey },

    #[error("Job {key} is not a {expected} job")]
    WrongKind { key: JobKey, expected: &'static str },
}

/// Result type alias for the scheduler.
pub type Result<T> = std::result::Result<T, Error>;
