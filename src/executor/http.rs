//! HTTP client for the data-integration engine's REST API.
//!
//! Submit: `POST {base}/submit-job?format=..&jobName=..` with the job config as
//! a `text/plain` body. Status: `GET {base}/job-info/{id}`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::error::ExecutorError;
use crate::executor::{Executor, StatusReport, Submission};
use crate::jobs::model::{ExternalJobStatus, JobDefinition, JobPayload};

/// REST executor backed by reqwest.
pub struct HttpExecutor {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpExecutor {
    /// Build a client whose every call is bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutorError::Unavailable(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_transport(&self, e: reqwest::Error) -> ExecutorError {
        if e.is_timeout() {
            ExecutorError::Timeout(self.timeout)
        } else {
            ExecutorError::Unavailable(e.to_string())
        }
    }

    async fn fetch_status(&self, external_id: &str) -> Result<StatusReport, ExecutorError> {
        let resp = self
            .client
            .get(job_info_url(&self.base_url, external_id)?)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.map_transport(e))?;
        if !status.is_success() {
            return Err(ExecutorError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        parse_status(&body)
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn submit(&self, job: &JobDefinition) -> Result<Submission, ExecutorError> {
        let JobPayload::Batch {
            config,
            config_format,
        } = &job.payload
        else {
            return Err(ExecutorError::MissingConfig(job.key()));
        };
        if config.trim().is_empty() {
            return Err(ExecutorError::MissingConfig(job.key()));
        }

        let resp = self
            .client
            .post(format!("{}/submit-job", self.base_url))
            .query(&[("format", config_format.as_str()), ("jobName", job.name.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(config.clone())
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.map_transport(e))?;
        if !status.is_success() {
            return Err(ExecutorError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let submission = parse_submission(&body)?;
        tracing::debug!(
            job = %job.key(),
            external_id = ?submission.job_id,
            "Executor accepted submission"
        );
        Ok(submission)
    }

    async fn query_status(&self, external_id: &str) -> StatusReport {
        match self.fetch_status(external_id).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(external_id, "Status query failed, treating as UNKNOWN: {e}");
                StatusReport::unknown()
            }
        }
    }
}

/// Status URL for an executor-assigned id. The id is percent-encoded as a
/// single path segment.
pub fn job_info_url(base_url: &str, external_id: &str) -> Result<reqwest::Url, ExecutorError> {
    let mut url = reqwest::Url::parse(base_url)
        .map_err(|e| ExecutorError::Unavailable(format!("Invalid executor base URL: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| {
            ExecutorError::Unavailable(format!("Executor base URL cannot be a base: {base_url}"))
        })?
        .pop_if_empty()
        .push("job-info")
        .push(external_id);
    Ok(url)
}

// ── Response parsing ────────────────────────────────────────────────

/// Parse a submit-job response. `jobId` may be a string or a number.
pub fn parse_submission(body: &str) -> Result<Submission, ExecutorError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ExecutorError::InvalidResponse(format!("submit-job: {e}")))?;
    if !value.is_object() {
        return Err(ExecutorError::InvalidResponse(
            "submit-job: expected a JSON object".to_string(),
        ));
    }

    let job_id = match value.get("jobId") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let job_name = value
        .get("jobName")
        .and_then(|v| v.as_str())
        .map(String::from);

    Ok(Submission {
        job_id,
        job_name,
        raw: body.to_string(),
    })
}

/// Parse a job-info response into a status report.
pub fn parse_status(body: &str) -> Result<StatusReport, ExecutorError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ExecutorError::InvalidResponse(format!("job-info: {e}")))?;

    let state = value
        .get("jobStatus")
        .and_then(|v| v.as_str())
        .map(ExternalJobStatus::from)
        .unwrap_or(ExternalJobStatus::Unknown);
    let finish_time = value
        .get("finishTime")
        .and_then(|v| v.as_str())
        .and_then(parse_finish_time);

    Ok(StatusReport { state, finish_time })
}

fn parse_finish_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|ndt| ndt.and_utc())
}
