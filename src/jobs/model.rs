//! Core types for scheduled jobs.
//!
//! A job definition is the persisted description of a recurring unit of work.
//! Batch jobs are submitted to the external executor; custom jobs run an
//! in-process maintenance function picked by their type tag.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which manager owns a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Batch,
    Custom,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::Batch, JobKind::Custom];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Batch => "batch",
            JobKind::Custom => "custom",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch" => Ok(JobKind::Batch),
            "custom" => Ok(JobKind::Custom),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

/// Registry identity of a job. Batch and custom jobs have separate id spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub kind: JobKind,
    pub id: i64,
}

impl JobKey {
    pub fn batch(id: i64) -> Self {
        Self {
            kind: JobKind::Batch,
            id,
        }
    }

    pub fn custom(id: i64) -> Self {
        Self {
            kind: JobKind::Custom,
            id,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Kind-specific part of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Submission config handed to the executor verbatim.
    Batch {
        config: String,
        #[serde(default = "default_config_format")]
        config_format: String,
    },
    /// Maintenance job resolved through the custom type table.
    Custom { custom_type: String },
}

fn default_config_format() -> String {
    "json".to_string()
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Batch { .. } => JobKind::Batch,
            JobPayload::Custom { .. } => JobKind::Custom,
        }
    }

    /// Serialize payload config to JSON for DB storage.
    pub fn to_config_json(&self) -> serde_json::Value {
        match self {
            JobPayload::Batch {
                config,
                config_format,
            } => serde_json::json!({
                "config": config,
                "config_format": config_format,
            }),
            JobPayload::Custom { custom_type } => serde_json::json!({
                "custom_type": custom_type,
            }),
        }
    }

    /// Parse a payload from its DB representation.
    pub fn from_db(kind: JobKind, config: serde_json::Value) -> Result<Self, String> {
        match kind {
            JobKind::Batch => {
                let body = config
                    .get("config")
                    .and_then(|v| v.as_str())
                    .ok_or("batch payload missing 'config'")?
                    .to_string();
                let config_format = config
                    .get("config_format")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .unwrap_or_else(default_config_format);
                Ok(JobPayload::Batch {
                    config: body,
                    config_format,
                })
            }
            JobKind::Custom => {
                let custom_type = config
                    .get("custom_type")
                    .and_then(|v| v.as_str())
                    .ok_or("custom payload missing 'custom_type'")?
                    .to_string();
                Ok(JobPayload::Custom { custom_type })
            }
        }
    }
}

/// Most recent status reported by the executor for a submitted job.
///
/// States other than the four named ones are carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExternalJobStatus {
    Unknown,
    Running,
    Succeeded,
    Failed,
    Other(String),
}

impl ExternalJobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ExternalJobStatus::Unknown => "UNKNOWN",
            ExternalJobStatus::Running => "RUNNING",
            ExternalJobStatus::Succeeded => "SUCCEEDED",
            ExternalJobStatus::Failed => "FAILED",
            ExternalJobStatus::Other(s) => s,
        }
    }

    /// Terminal states that produce an alert when first observed.
    pub fn is_alerting(&self) -> bool {
        matches!(
            self,
            ExternalJobStatus::Succeeded | ExternalJobStatus::Failed
        )
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ExternalJobStatus::Unknown)
    }
}

impl fmt::Display for ExternalJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ExternalJobStatus {
    fn from(s: &str) -> Self {
        let s = s.trim();
        match s.to_ascii_uppercase().as_str() {
            "" | "UNKNOWN" => ExternalJobStatus::Unknown,
            "RUNNING" => ExternalJobStatus::Running,
            "SUCCEEDED" => ExternalJobStatus::Succeeded,
            "FAILED" => ExternalJobStatus::Failed,
            _ => ExternalJobStatus::Other(s.to_string()),
        }
    }
}

impl From<String> for ExternalJobStatus {
    fn from(s: String) -> Self {
        ExternalJobStatus::from(s.as_str())
    }
}

impl From<ExternalJobStatus> for String {
    fn from(status: ExternalJobStatus) -> Self {
        status.as_str().to_string()
    }
}

/// A persisted recurring job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Six-field (seconds-first) cron expression; five fields are accepted too.
    pub cron_expr: String,
    pub enabled: bool,
    pub payload: JobPayload,
    /// Alert groups/targets handed to the notifier on status transitions.
    pub alert_targets: Vec<String>,

    // Runtime state
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result: Option<String>,
    pub external_job_id: Option<String>,
    pub job_status: Option<ExternalJobStatus>,
    pub finish_time: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobDefinition {
    fn with_payload(name: &str, cron_expr: &str, payload: JobPayload) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.to_string(),
            description: String::new(),
            cron_expr: cron_expr.to_string(),
            enabled: true,
            payload,
            alert_targets: Vec::new(),
            last_run_at: None,
            last_result: None,
            external_job_id: None,
            job_status: None,
            finish_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// New enabled batch job. The id is assigned on insert.
    pub fn batch(name: &str, cron_expr: &str, config: &str) -> Self {
        Self::with_payload(
            name,
            cron_expr,
            JobPayload::Batch {
                config: config.to_string(),
                config_format: default_config_format(),
            },
        )
    }

    /// New enabled custom job. The id is assigned on insert.
    pub fn custom(name: &str, cron_expr: &str, custom_type: &str) -> Self {
        Self::with_payload(
            name,
            cron_expr,
            JobPayload::Custom {
                custom_type: custom_type.to_string(),
            },
        )
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_alert_targets(mut self, targets: Vec<String>) -> Self {
        self.alert_targets = targets;
        self
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    pub fn key(&self) -> JobKey {
        JobKey {
            kind: self.kind(),
            id: self.id,
        }
    }

    /// Enabled and carrying a non-empty cron expression.
    pub fn is_schedulable(&self) -> bool {
        self.enabled && !self.cron_expr.trim().is_empty()
    }

    /// Type tag used for logs: the custom type, or "batch".
    pub fn type_tag(&self) -> &str {
        match &self.payload {
            JobPayload::Batch { .. } => "batch",
            JobPayload::Custom { custom_type } => custom_type,
        }
    }

    /// External identity worth polling, if any.
    pub fn tracked_external_id(&self) -> Option<&str> {
        self.external_job_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// A single column update on a definition.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Name(String),
    Description(String),
    CronExpr(String),
    Enabled(bool),
    Payload(JobPayload),
    AlertTargets(Vec<String>),
    LastRun(DateTime<Utc>),
    LastResult(String),
    ExternalJobId(Option<String>),
    JobStatus(ExternalJobStatus),
    FinishTime(DateTime<Utc>),
}

/// Immutable audit record appended on every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLog {
    pub id: Uuid,
    pub job: JobKey,
    pub external_job_id: Option<String>,
    pub job_name: String,
    pub task_type: String,
    pub result: String,
    pub created_at: DateTime<Utc>,
}

impl TaskLog {
    pub fn new(job: &JobDefinition, result: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job: job.key(),
            external_job_id: None,
            job_name: job.name.clone(),
            task_type: job.type_tag().to_string(),
            result: result.into(),
            created_at: Utc::now(),
        }
    }
}

/// Result of one firing or run-now invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub started_at: DateTime<Utc>,
    pub result: String,
    pub succeeded: bool,
}
