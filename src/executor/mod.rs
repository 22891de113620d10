//! External execution service.
//!
//! Batch jobs are handed to an executor that runs them out of process and
//! reports their status by an executor-assigned job id.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ExecutorError;
use crate::jobs::model::{ExternalJobStatus, JobDefinition};

pub use http::HttpExecutor;

/// Metadata returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Executor-assigned job id, when the service returned one.
    pub job_id: Option<String>,
    pub job_name: Option<String>,
    /// Raw response body, kept for the task log.
    pub raw: String,
}

/// Status observed for an external job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub state: ExternalJobStatus,
    pub finish_time: Option<DateTime<Utc>>,
}

impl StatusReport {
    pub fn unknown() -> Self {
        Self {
            state: ExternalJobStatus::Unknown,
            finish_time: None,
        }
    }
}

/// Submits batch jobs and queries their status.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Submit a batch job for execution.
    async fn submit(&self, job: &JobDefinition) -> Result<Submission, ExecutorError>;

    /// Current status of a previously submitted job.
    ///
    /// Implementations degrade to `UNKNOWN` on transport or parse failures
    /// instead of returning an error.
    async fn query_status(&self, external_id: &str) -> StatusReport;
}
