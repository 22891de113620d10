//! Scheduler façade, the operational surface for callers.
//!
//! Owns the registry, both job managers and the status reconciler, and wires
//! the built-in `job_status_sync` custom type to the reconciler.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::error::Error;
use crate::executor::Executor;
use crate::jobs::batch::{BatchJobManager, BatchRunner};
use crate::jobs::custom::{CustomJobManager, CustomJobTypes, CustomRunner, FnJob, JOB_STATUS_SYNC};
use crate::jobs::model::JobKind;
use crate::jobs::registry::{JobRegistry, ScheduledJob};
use crate::notify::Notifier;
use crate::reconciler::{StatusReconciler, spawn_sync_ticker};
use crate::store::Repository;

/// Aggregate view for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub active_count: usize,
    pub entries: Vec<ScheduledJob>,
}

pub struct Scheduler {
    registry: Arc<JobRegistry>,
    batch: BatchJobManager,
    custom: CustomJobManager,
    reconciler: Arc<StatusReconciler>,
}

impl Scheduler {
    /// Wire all components. `executor_timeout` bounds every submit and status query.
    pub fn new(
        repo: Arc<dyn Repository>,
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn Notifier>,
        executor_timeout: Duration,
    ) -> Self {
        let reconciler = Arc::new(StatusReconciler::new(
            Arc::clone(&repo),
            Arc::clone(&executor),
            notifier,
            executor_timeout,
        ));

        let types = Arc::new(CustomJobTypes::new());
        let sync = Arc::clone(&reconciler);
        types.register(
            JOB_STATUS_SYNC,
            Arc::new(FnJob::new(move || {
                let sync = Arc::clone(&sync);
                async move {
                    match sync.sync_all().await {
                        Ok(report) => format!("status sync: {report}"),
                        Err(e) => format!("status sync failed: {e}"),
                    }
                }
            })),
        );

        let batch_runner = Arc::new(BatchRunner::new(
            Arc::clone(&repo),
            executor,
            executor_timeout,
        ));
        let custom_runner = Arc::new(CustomRunner::new(Arc::clone(&repo), Arc::clone(&types)));
        let registry = Arc::new(
            JobRegistry::new(Arc::clone(&repo))
                .with_handler(JobKind::Batch, batch_runner)
                .with_handler(JobKind::Custom, custom_runner),
        );

        Self {
            batch: BatchJobManager::new(Arc::clone(&repo), Arc::clone(&registry)),
            custom: CustomJobManager::new(repo, Arc::clone(&registry), types),
            registry,
            reconciler,
        }
    }

    /// Resume firing. Registered jobs are kept while stopped.
    pub async fn start(&self) {
        self.registry.start().await;
    }

    /// Pause firing without forgetting any job.
    pub async fn stop(&self) {
        self.registry.stop().await;
    }

    /// Rebuild the registry from persistence. Returns the number of scheduled jobs.
    pub async fn reload(&self) -> Result<usize, Error> {
        Ok(self.registry.reload().await?)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let entries = self.registry.snapshot().await;
        SchedulerStatus {
            running: self.registry.is_running().await,
            active_count: entries.len(),
            entries,
        }
    }

    /// Start the periodic reconciler pass.
    pub fn spawn_status_sync(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        info!(interval = ?interval, "Status sync ticker started");
        spawn_sync_ticker(Arc::clone(&self.reconciler), interval)
    }

    pub fn batch(&self) -> &BatchJobManager {
        &self.batch
    }

    pub fn custom(&self) -> &CustomJobManager {
        &self.custom
    }

    pub fn custom_types(&self) -> &Arc<CustomJobTypes> {
        self.custom.types()
    }

    pub fn reconciler(&self) -> &Arc<StatusReconciler> {
        &self.reconciler
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }
}
