//! Status reconciler. Polls the executor and alerts on status edges.
//!
//! Each pass walks every batch job with an external job id, asks the executor
//! for its status and compares it to the persisted one. A changed status is
//! written back; a change into FAILED or SUCCEEDED also produces exactly one
//! alert. UNKNOWN means "no information this cycle" and never overwrites
//! anything. Passes are serialized so two overlapping triggers cannot race on
//! the same job. The write is guarded on the external id that was queried, so
//! a resubmission landing mid-pass never inherits the previous execution's
//! status.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::DatabaseError;
use crate::executor::{Executor, StatusReport};
use crate::jobs::model::{FieldUpdate, JobDefinition, JobKind};
use crate::notify::{AlertTransitionEvent, Notifier};
use crate::store::Repository;

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Jobs with an external id that were queried.
    pub checked: usize,
    /// Jobs whose persisted status was written.
    pub updated: usize,
    /// Alerts handed to the notifier.
    pub alerted: usize,
    /// Queries that returned no usable status.
    pub unknown: usize,
    /// Jobs whose new status could not be persisted.
    pub failed: usize,
    /// Jobs resubmitted while their old execution was being queried.
    pub superseded: usize,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked {}, updated {}, alerted {}, unknown {}, failed {}, superseded {}",
            self.checked, self.updated, self.alerted, self.unknown, self.failed, self.superseded
        )
    }
}

enum JobSync {
    Unknown,
    Unchanged,
    Superseded,
    Updated { alerted: bool },
}

pub struct StatusReconciler {
    repo: Arc<dyn Repository>,
    executor: Arc<dyn Executor>,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    pass_lock: Mutex<()>,
}

impl StatusReconciler {
    pub fn new(
        repo: Arc<dyn Repository>,
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn Notifier>,
        timeout: Duration,
    ) -> Self {
        Self {
            repo,
            executor,
            notifier,
            timeout,
            pass_lock: Mutex::new(()),
        }
    }

    /// Run one full pass. Waits for any pass already in flight.
    pub async fn sync_all(&self) -> Result<SyncReport, DatabaseError> {
        let _pass = self.pass_lock.lock().await;
        let jobs = self.repo.list_tracked_definitions(JobKind::Batch).await?;
        let mut report = SyncReport::default();

        for job in &jobs {
            report.checked += 1;
            match self.sync_job(job).await {
                Ok(JobSync::Unknown) => report.unknown += 1,
                Ok(JobSync::Unchanged) => {}
                Ok(JobSync::Superseded) => report.superseded += 1,
                Ok(JobSync::Updated { alerted }) => {
                    report.updated += 1;
                    if alerted {
                        report.alerted += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    error!(job = %job.key(), "Failed to persist job status: {e}");
                }
            }
        }

        if report.updated > 0 || report.failed > 0 {
            info!(%report, "Status sync pass complete");
        } else {
            debug!(%report, "Status sync pass complete");
        }
        Ok(report)
    }

    async fn query(&self, external_id: &str) -> StatusReport {
        match tokio::time::timeout(self.timeout, self.executor.query_status(external_id)).await {
            Ok(report) => report,
            Err(_) => {
                warn!(external_id, timeout = ?self.timeout, "Status query timed out");
                StatusReport::unknown()
            }
        }
    }

    async fn sync_job(&self, job: &JobDefinition) -> Result<JobSync, DatabaseError> {
        let Some(external_id) = job.tracked_external_id() else {
            return Ok(JobSync::Unchanged);
        };

        let observed = self.query(external_id).await;
        if observed.state.is_unknown() {
            debug!(job = %job.key(), external_id, "No status this cycle");
            return Ok(JobSync::Unknown);
        }

        let old = job.job_status.clone();
        let status_changed = old.as_ref() != Some(&observed.state);
        let finish_changed = observed.finish_time.is_some() && observed.finish_time != job.finish_time;
        if !status_changed && !finish_changed {
            return Ok(JobSync::Unchanged);
        }

        let mut fields = vec![FieldUpdate::JobStatus(observed.state.clone())];
        if let Some(finish) = observed.finish_time {
            fields.push(FieldUpdate::FinishTime(finish));
        }
        let written = self
            .repo
            .update_tracked_fields(JobKind::Batch, job.id, external_id, &fields)
            .await?;
        if !written {
            debug!(
                job = %job.key(),
                external_id,
                "Job no longer tracks this execution, dropping observed status"
            );
            return Ok(JobSync::Superseded);
        }
        info!(
            job = %job.key(),
            old = ?old.as_ref().map(|s| s.as_str()),
            new = %observed.state,
            "External job status changed"
        );

        let alerted = status_changed && observed.state.is_alerting();
        if alerted {
            let reason = match observed.finish_time {
                Some(t) => format!("finished at {}", t.format("%Y-%m-%d %H:%M:%S")),
                None => String::new(),
            };
            let event = AlertTransitionEvent {
                job: job.key(),
                job_name: job.name.clone(),
                external_job_id: Some(external_id.to_string()),
                old_status: old,
                new_status: observed.state,
                observed_at: Utc::now(),
                reason,
                alert_targets: job.alert_targets.clone(),
            };
            if let Err(e) = self.notifier.notify(&event).await {
                warn!(job = %job.key(), channel = self.notifier.name(), "Alert delivery failed: {e}");
            }
        }

        Ok(JobSync::Updated { alerted })
    }
}

/// Spawn a background task that runs a sync pass every `interval`.
pub fn spawn_sync_ticker(
    reconciler: Arc<StatusReconciler>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = reconciler.sync_all().await {
                error!("Status sync pass failed: {e}");
            }
        }
    })
}
