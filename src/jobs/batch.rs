//! Batch job manager: data-integration jobs submitted to the executor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::cron::parse_schedule;
use crate::error::{Error, ExecutorError, JobError};
use crate::executor::Executor;
use crate::jobs::model::{
    ExternalJobStatus, FieldUpdate, JobDefinition, JobKey, JobKind, JobPayload, RunOutcome,
    TaskLog,
};
use crate::jobs::registry::{JobHandler, JobRegistry};
use crate::store::Repository;

/// Runs one batch firing: persist last-run, submit, record the outcome.
pub struct BatchRunner {
    repo: Arc<dyn Repository>,
    executor: Arc<dyn Executor>,
    timeout: Duration,
}

impl BatchRunner {
    pub fn new(repo: Arc<dyn Repository>, executor: Arc<dyn Executor>, timeout: Duration) -> Self {
        Self {
            repo,
            executor,
            timeout,
        }
    }

    async fn persist(&self, job: &JobDefinition, fields: &[FieldUpdate]) {
        if let Err(e) = self.repo.update_fields(JobKind::Batch, job.id, fields).await {
            error!(job = %job.key(), "Failed to persist batch job state: {e}");
        }
    }

    async fn append_log(&self, log: TaskLog) {
        if let Err(e) = self.repo.create_log(&log).await {
            error!(job = %log.job, "Failed to write task log: {e}");
        }
    }
}

#[async_trait]
impl JobHandler for BatchRunner {
    async fn run(&self, job: &JobDefinition) -> RunOutcome {
        let started_at = Utc::now();

        // Submit what is persisted now, not what was captured at schedule time.
        let job = match self.repo.get_definition(JobKind::Batch, job.id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                warn!(job = %job.key(), "Batch job no longer exists, skipping");
                return RunOutcome {
                    started_at,
                    result: "job definition no longer exists".to_string(),
                    succeeded: false,
                };
            }
            Err(e) => {
                warn!(job = %job.key(), "Could not reload batch job, using cached copy: {e}");
                job.clone()
            }
        };

        // Last-run is recorded before the submission so an interrupted attempt stays visible.
        self.persist(&job, &[FieldUpdate::LastRun(started_at)]).await;

        let submitted = match tokio::time::timeout(self.timeout, self.executor.submit(&job)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Timeout(self.timeout)),
        };

        match submitted {
            Ok(submission) => {
                let result = match &submission.job_id {
                    Some(id) => format!("submitted as external job {id}"),
                    None => "submitted".to_string(),
                };
                let mut fields = vec![FieldUpdate::LastResult(result.clone())];
                if let Some(id) = &submission.job_id {
                    // A new execution starts from no known status.
                    fields.push(FieldUpdate::ExternalJobId(Some(id.clone())));
                    fields.push(FieldUpdate::JobStatus(ExternalJobStatus::Unknown));
                }
                self.persist(&job, &fields).await;

                let mut log = TaskLog::new(&job, submission.raw);
                log.external_job_id = submission.job_id.clone();
                if let Some(name) = submission.job_name {
                    log.job_name = name;
                }
                self.append_log(log).await;

                info!(job = %job.key(), external_id = ?submission.job_id, "Batch job submitted");
                RunOutcome {
                    started_at,
                    result,
                    succeeded: true,
                }
            }
            Err(e) => {
                let result = format!("submit failed: {e}");
                error!(job = %job.key(), "Batch job submission failed: {e}");
                self.persist(&job, &[FieldUpdate::LastResult(result.clone())])
                    .await;
                self.append_log(TaskLog::new(&job, result.clone())).await;
                RunOutcome {
                    started_at,
                    result,
                    succeeded: false,
                }
            }
        }
    }
}

/// Partial update of a batch job. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct BatchJobUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub cron_expr: Option<String>,
    pub enabled: Option<bool>,
    pub config: Option<String>,
    pub config_format: Option<String>,
    pub alert_targets: Option<Vec<String>>,
}

/// API-level operations on batch jobs, keeping persistence and the registry in step.
pub struct BatchJobManager {
    repo: Arc<dyn Repository>,
    registry: Arc<JobRegistry>,
}

impl BatchJobManager {
    pub fn new(repo: Arc<dyn Repository>, registry: Arc<JobRegistry>) -> Self {
        Self { repo, registry }
    }

    async fn load(&self, id: i64) -> Result<JobDefinition, Error> {
        self.repo
            .get_definition(JobKind::Batch, id)
            .await?
            .ok_or_else(|| {
                JobError::NotFound {
                    key: JobKey::batch(id),
                }
                .into()
            })
    }

    /// Persist a new batch job and schedule it if active with a cron expression.
    pub async fn create(&self, def: JobDefinition) -> Result<JobDefinition, Error> {
        if def.kind() != JobKind::Batch {
            return Err(JobError::WrongKind {
                key: def.key(),
                expected: "batch",
            }
            .into());
        }
        if def.is_schedulable() {
            parse_schedule(&def.cron_expr)?;
        }

        let id = self.repo.create_definition(&def).await?;
        let def = def.with_id(id);
        if def.is_schedulable() {
            self.registry.add(def.clone()).await?;
        }
        info!(job = %def.key(), name = %def.name, "Batch job created");
        Ok(def)
    }

    /// Apply an update. An active job is re-registered; an inactive one is removed.
    pub async fn update(&self, id: i64, update: BatchJobUpdate) -> Result<JobDefinition, Error> {
        let mut def = self.load(id).await?;
        let mut fields = Vec::new();

        if let Some(name) = update.name {
            def.name = name.clone();
            fields.push(FieldUpdate::Name(name));
        }
        if let Some(description) = update.description {
            def.description = description.clone();
            fields.push(FieldUpdate::Description(description));
        }
        if let Some(cron_expr) = update.cron_expr {
            def.cron_expr = cron_expr.clone();
            fields.push(FieldUpdate::CronExpr(cron_expr));
        }
        if let Some(enabled) = update.enabled {
            def.enabled = enabled;
            fields.push(FieldUpdate::Enabled(enabled));
        }
        if update.config.is_some() || update.config_format.is_some() {
            if let JobPayload::Batch {
                config,
                config_format,
            } = &mut def.payload
            {
                if let Some(c) = update.config {
                    *config = c;
                }
                if let Some(f) = update.config_format {
                    *config_format = f;
                }
            }
            fields.push(FieldUpdate::Payload(def.payload.clone()));
        }
        if let Some(targets) = update.alert_targets {
            def.alert_targets = targets.clone();
            fields.push(FieldUpdate::AlertTargets(targets));
        }

        if def.is_schedulable() {
            parse_schedule(&def.cron_expr)?;
        }
        if !fields.is_empty() {
            self.repo.update_fields(JobKind::Batch, id, &fields).await?;
        }

        self.registry.remove(def.key()).await;
        if def.is_schedulable() {
            self.registry.add(def.clone()).await?;
        }
        info!(job = %def.key(), scheduled = def.is_schedulable(), "Batch job updated");
        Ok(def)
    }

    /// Unschedule then delete. Returns false if the job did not exist.
    pub async fn delete(&self, id: i64) -> Result<bool, Error> {
        let key = JobKey::batch(id);
        self.registry.remove(key).await;
        let deleted = self.repo.delete_definition(JobKind::Batch, id).await?;
        if deleted {
            info!(job = %key, "Batch job deleted");
        }
        Ok(deleted)
    }

    /// Submit a batch job immediately, regardless of its schedule.
    pub async fn run_now(&self, id: i64) -> Result<RunOutcome, Error> {
        let def = self.load(id).await?;
        Ok(self.registry.run_now(&def).await)
    }

    pub async fn get(&self, id: i64) -> Result<JobDefinition, Error> {
        self.load(id).await
    }

    pub async fn list(&self) -> Result<Vec<JobDefinition>, Error> {
        Ok(self.repo.list_definitions(JobKind::Batch).await?)
    }

    pub async fn logs(&self, id: i64, limit: i64) -> Result<Vec<TaskLog>, Error> {
        Ok(self.repo.list_logs(JobKey::batch(id), limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::ScheduleError;
    use crate::executor::{StatusReport, Submission};
    use crate::store::LibSqlBackend;

    /// Executor stub that records submissions and replays a fixed answer.
    struct StubExecutor {
        submitted: Mutex<Vec<String>>,
        fail: bool,
        delay: Duration,
    }

    impl StubExecutor {
        fn ok() -> Self {
            Self {
                submitted: Mutex::new(Vec::new()),
                fail: false,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Executor for StubExecutor {
        async fn submit(&self, job: &JobDefinition) -> Result<Submission, ExecutorError> {
            tokio::time::sleep(self.delay).await;
            self.submitted.lock().unwrap().push(job.name.clone());
            if self.fail {
                return Err(ExecutorError::Unavailable("connection refused".into()));
            }
            Ok(Submission {
                job_id: Some("861234".into()),
                job_name: Some(job.name.clone()),
                raw: r#"{"jobId":861234}"#.into(),
            })
        }

        async fn query_status(&self, _external_id: &str) -> StatusReport {
            StatusReport::unknown()
        }
    }

    async fn setup(executor: StubExecutor) -> (BatchJobManager, Arc<dyn Repository>, Arc<JobRegistry>, Arc<StubExecutor>) {
        let repo: Arc<dyn Repository> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let executor = Arc::new(executor);
        let runner = Arc::new(BatchRunner::new(
            Arc::clone(&repo),
            executor.clone(),
            Duration::from_millis(200),
        ));
        let registry = Arc::new(
            JobRegistry::new(Arc::clone(&repo)).with_handler(JobKind::Batch, runner),
        );
        let manager = BatchJobManager::new(Arc::clone(&repo), Arc::clone(&registry));
        (manager, repo, registry, executor)
    }

    #[tokio::test]
    async fn create_active_job_schedules_it() {
        let (manager, _, registry, _) = setup(StubExecutor::ok()).await;
        let def = manager
            .create(JobDefinition::batch("orders", "0 */5 * * * *", "{}"))
            .await
            .unwrap();
        assert!(registry.is_scheduled(def.key()).await);
    }

    #[tokio::test]
    async fn create_rejects_bad_cron_without_persisting() {
        let (manager, repo, _, _) = setup(StubExecutor::ok()).await;
        let err = manager
            .create(JobDefinition::batch("orders", "whenever", "{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Schedule(ScheduleError::Invalid { .. })));
        assert!(repo.list_definitions(JobKind::Batch).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_toggles_registration() {
        let (manager, _, registry, _) = setup(StubExecutor::ok()).await;
        let def = manager
            .create(JobDefinition::batch("orders", "0 0 * * * *", "{}"))
            .await
            .unwrap();
        let key = def.key();

        manager
            .update(def.id, BatchJobUpdate { enabled: Some(false), ..Default::default() })
            .await
            .unwrap();
        assert!(!registry.is_scheduled(key).await);

        let updated = manager
            .update(
                def.id,
                BatchJobUpdate {
                    enabled: Some(true),
                    cron_expr: Some("0 30 * * * *".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.enabled);
        assert_eq!(registry.engine_len().await, 1);
        assert_eq!(registry.snapshot().await[0].cron_expr, "0 30 * * * *");
    }

    #[tokio::test]
    async fn delete_unschedules_and_removes() {
        let (manager, repo, registry, _) = setup(StubExecutor::ok()).await;
        let def = manager
            .create(JobDefinition::batch("orders", "0 0 * * * *", "{}"))
            .await
            .unwrap();
        assert!(manager.delete(def.id).await.unwrap());
        assert!(!registry.is_scheduled(def.key()).await);
        assert!(repo.get_definition(JobKind::Batch, def.id).await.unwrap().is_none());
        assert!(!manager.delete(def.id).await.unwrap());
    }

    #[tokio::test]
    async fn run_now_records_external_id_and_log() {
        let (manager, repo, _, executor) = setup(StubExecutor::ok()).await;
        let def = manager
            .create(JobDefinition::batch("orders", "", "{\"source\":{}}"))
            .await
            .unwrap();

        let outcome = manager.run_now(def.id).await.unwrap();
        assert!(outcome.succeeded);
        assert_eq!(executor.submitted.lock().unwrap().len(), 1);

        let stored = manager.get(def.id).await.unwrap();
        assert!(stored.last_run_at.is_some());
        assert_eq!(stored.external_job_id.as_deref(), Some("861234"));
        assert_eq!(stored.job_status, Some(ExternalJobStatus::Unknown));

        let logs = repo.list_logs(def.key(), 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].external_job_id.as_deref(), Some("861234"));
    }

    #[tokio::test]
    async fn failed_submission_is_recorded_not_raised() {
        let mut stub = StubExecutor::ok();
        stub.fail = true;
        let (manager, repo, _, _) = setup(stub).await;
        let def = manager
            .create(JobDefinition::batch("orders", "", "{}"))
            .await
            .unwrap();

        let outcome = manager.run_now(def.id).await.unwrap();
        assert!(!outcome.succeeded);

        let stored = manager.get(def.id).await.unwrap();
        assert!(stored.last_run_at.is_some());
        assert!(stored.last_result.unwrap().contains("connection refused"));
        assert!(stored.external_job_id.is_none());
        assert_eq!(repo.list_logs(def.key(), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn slow_executor_times_out() {
        let mut stub = StubExecutor::ok();
        stub.delay = Duration::from_secs(5);
        let (manager, _, _, _) = setup(stub).await;
        let def = manager
            .create(JobDefinition::batch("orders", "", "{}"))
            .await
            .unwrap();

        let outcome = manager.run_now(def.id).await.unwrap();
        assert!(!outcome.succeeded);
        assert!(outcome.result.contains("timed out"));
    }

    #[tokio::test]
    async fn run_now_unknown_job() {
        let (manager, _, _, _) = setup(StubExecutor::ok()).await;
        assert!(matches!(
            manager.run_now(42).await,
            Err(Error::Job(JobError::NotFound { .. }))
        ));
    }
}
