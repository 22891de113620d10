//! Custom job manager for in-process maintenance jobs resolved by type tag.
//!
//! Job types are registered once in a `CustomJobTypes` table. Looking up an
//! unregistered type never fails: it yields `UnsupportedJob`, whose run
//! reports the problem as its result text.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{error, info};

use crate::cron::parse_schedule;
use crate::error::{Error, JobError};
use crate::jobs::model::{
    FieldUpdate, JobDefinition, JobKey, JobKind, JobPayload, RunOutcome, TaskLog,
};
use crate::jobs::registry::{JobHandler, JobRegistry};
use crate::store::Repository;

/// Type tag of the built-in job that forces a status sync pass.
pub const JOB_STATUS_SYNC: &str = "job_status_sync";

/// A parameterless maintenance function producing a human-readable result.
#[async_trait]
pub trait CustomJob: Send + Sync {
    async fn run(&self) -> String;
}

/// Adapts an async closure into a `CustomJob`.
pub struct FnJob {
    f: Box<dyn Fn() -> BoxFuture<'static, String> + Send + Sync>,
}

impl FnJob {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        Self {
            f: Box::new(move || f().boxed()),
        }
    }
}

#[async_trait]
impl CustomJob for FnJob {
    async fn run(&self) -> String {
        (self.f)().await
    }
}

/// Fallback for type tags nobody registered.
pub struct UnsupportedJob {
    custom_type: String,
}

#[async_trait]
impl CustomJob for UnsupportedJob {
    async fn run(&self) -> String {
        format!("unsupported custom job type: {}", self.custom_type)
    }
}

/// Lookup table from type tag to job implementation.
#[derive(Default)]
pub struct CustomJobTypes {
    jobs: RwLock<HashMap<String, Arc<dyn CustomJob>>>,
}

impl CustomJobTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the implementation for a type tag.
    pub fn register(&self, custom_type: &str, job: Arc<dyn CustomJob>) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(custom_type.to_string(), job);
        info!(custom_type, "Custom job type registered");
    }

    pub fn is_registered(&self, custom_type: &str) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(custom_type)
    }

    /// Resolve a type tag. Never fails.
    pub fn resolve(&self, custom_type: &str) -> Arc<dyn CustomJob> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(custom_type)
            .cloned()
            .unwrap_or_else(|| {
                Arc::new(UnsupportedJob {
                    custom_type: custom_type.to_string(),
                })
            })
    }

    /// Registered type tags, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }
}

/// Runs one custom firing and records last-run, last-result and a task log.
pub struct CustomRunner {
    repo: Arc<dyn Repository>,
    types: Arc<CustomJobTypes>,
}

impl CustomRunner {
    pub fn new(repo: Arc<dyn Repository>, types: Arc<CustomJobTypes>) -> Self {
        Self { repo, types }
    }

    async fn persist(&self, job: &JobDefinition, fields: &[FieldUpdate]) {
        if let Err(e) = self.repo.update_fields(JobKind::Custom, job.id, fields).await {
            error!(job = %job.key(), "Failed to persist custom job state: {e}");
        }
    }
}

#[async_trait]
impl JobHandler for CustomRunner {
    async fn run(&self, job: &JobDefinition) -> RunOutcome {
        let started_at = Utc::now();
        let custom_type = job.type_tag().to_string();

        self.persist(job, &[FieldUpdate::LastRun(started_at)]).await;

        let succeeded = self.types.is_registered(&custom_type);
        let result = self.types.resolve(&custom_type).run().await;

        self.persist(job, &[FieldUpdate::LastResult(result.clone())])
            .await;
        if let Err(e) = self.repo.create_log(&TaskLog::new(job, result.clone())).await {
            error!(job = %job.key(), "Failed to write task log: {e}");
        }

        info!(job = %job.key(), custom_type = %custom_type, succeeded, "Custom job finished");
        RunOutcome {
            started_at,
            result,
            succeeded,
        }
    }
}

/// Partial update of a custom job. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct CustomJobUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub cron_expr: Option<String>,
    pub custom_type: Option<String>,
    pub alert_targets: Option<Vec<String>>,
}

/// Listing row: persisted definition plus in-memory bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct CustomJobView {
    pub definition: JobDefinition,
    pub scheduled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_result: Option<String>,
    pub supported: bool,
}

/// API-level operations on custom jobs.
pub struct CustomJobManager {
    repo: Arc<dyn Repository>,
    registry: Arc<JobRegistry>,
    types: Arc<CustomJobTypes>,
}

impl CustomJobManager {
    pub fn new(
        repo: Arc<dyn Repository>,
        registry: Arc<JobRegistry>,
        types: Arc<CustomJobTypes>,
    ) -> Self {
        Self {
            repo,
            registry,
            types,
        }
    }

    pub fn types(&self) -> &Arc<CustomJobTypes> {
        &self.types
    }

    async fn load(&self, id: i64) -> Result<JobDefinition, Error> {
        self.repo
            .get_definition(JobKind::Custom, id)
            .await?
            .ok_or_else(|| {
                JobError::NotFound {
                    key: JobKey::custom(id),
                }
                .into()
            })
    }

    fn ensure_custom(def: &JobDefinition) -> Result<(), Error> {
        if def.kind() != JobKind::Custom {
            return Err(JobError::WrongKind {
                key: def.key(),
                expected: "custom",
            }
            .into());
        }
        Ok(())
    }

    /// Persist a new custom job and register it.
    pub async fn create(&self, def: JobDefinition) -> Result<JobDefinition, Error> {
        Self::ensure_custom(&def)?;
        if def.enabled {
            parse_schedule(&def.cron_expr)?;
        }
        let id = self.repo.create_definition(&def).await?;
        let def = def.with_id(id);
        self.register(def.clone()).await?;
        info!(job = %def.key(), custom_type = def.type_tag(), "Custom job created");
        Ok(def)
    }

    /// Register an already-persisted definition with the registry.
    ///
    /// Same replace semantics as the registry; a disabled definition is kept
    /// inert until enabled.
    pub async fn register(&self, def: JobDefinition) -> Result<(), Error> {
        Self::ensure_custom(&def)?;
        if !self.types.is_registered(def.type_tag()) {
            tracing::warn!(
                job = %def.key(),
                custom_type = def.type_tag(),
                "Custom job type is not registered; runs will report it as unsupported"
            );
        }
        self.registry.add(def).await?;
        Ok(())
    }

    /// Start scheduling a job. Returns false if it was already enabled and scheduled.
    pub async fn enable(&self, id: i64) -> Result<bool, Error> {
        let def = self.load(id).await?;
        let key = def.key();
        if def.enabled && self.registry.is_scheduled(key).await {
            return Ok(false);
        }

        self.registry.add(def.with_enabled(true)).await?;
        if let Err(e) = self
            .repo
            .update_fields(JobKind::Custom, id, &[FieldUpdate::Enabled(true)])
            .await
        {
            self.registry.disable(key).await;
            return Err(e.into());
        }
        info!(job = %key, "Custom job enabled");
        Ok(true)
    }

    /// Stop scheduling a job, keeping its definition. Returns false if already disabled.
    pub async fn disable(&self, id: i64) -> Result<bool, Error> {
        let def = self.load(id).await?;
        let key = def.key();
        let was_scheduled = self.registry.disable(key).await;
        if !def.enabled && !was_scheduled {
            return Ok(false);
        }
        self.repo
            .update_fields(JobKind::Custom, id, &[FieldUpdate::Enabled(false)])
            .await?;
        info!(job = %key, "Custom job disabled");
        Ok(true)
    }

    /// Run a job immediately. Works for disabled jobs too.
    pub async fn run_now(&self, id: i64) -> Result<RunOutcome, Error> {
        let def = self.load(id).await?;
        Ok(self.registry.run_now(&def).await)
    }

    /// Apply an update and re-register the job.
    pub async fn update(&self, id: i64, update: CustomJobUpdate) -> Result<JobDefinition, Error> {
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
        if let Some(custom_type) = update.custom_type {
            def.payload = JobPayload::Custom { custom_type };
            fields.push(FieldUpdate::Payload(def.payload.clone()));
        }
        if let Some(targets) = update.alert_targets {
            def.alert_targets = targets.clone();
            fields.push(FieldUpdate::AlertTargets(targets));
        }

        if def.enabled {
            parse_schedule(&def.cron_expr)?;
        }
        if !fields.is_empty() {
            self.repo.update_fields(JobKind::Custom, id, &fields).await?;
        }
        self.registry.add(def.clone()).await?;
        Ok(def)
    }

    /// Unschedule then delete. Returns false if the job did not exist.
    pub async fn delete(&self, id: i64) -> Result<bool, Error> {
        let key = JobKey::custom(id);
        self.registry.remove(key).await;
        let deleted = self.repo.delete_definition(JobKind::Custom, id).await?;
        if deleted {
            info!(job = %key, "Custom job deleted");
        }
        Ok(deleted)
    }

    /// All custom jobs with their scheduling state.
    pub async fn list(&self) -> Result<Vec<CustomJobView>, Error> {
        let defs = self.repo.list_definitions(JobKind::Custom).await?;
        let mut views = Vec::with_capacity(defs.len());
        for def in defs {
            let summary = self.registry.summary(def.key()).await;
            let supported = self.types.is_registered(def.type_tag());
            let (scheduled, next_run, last_run, last_result) = match summary {
                Some(s) => (s.scheduled, s.next_run, s.last_run, s.last_result),
                None => (false, None, def.last_run_at, def.last_result.clone()),
            };
            views.push(CustomJobView {
                definition: def,
                scheduled,
                next_run,
                last_run,
                last_result,
                supported,
            });
        }
        Ok(views)
    }

    pub async fn logs(&self, id: i64, limit: i64) -> Result<Vec<TaskLog>, Error> {
        Ok(self.repo.list_logs(JobKey::custom(id), limit).await?)
    }
}
