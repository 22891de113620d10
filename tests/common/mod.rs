//! Shared stubs for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use ops_scheduler::error::{ExecutorError, NotifyError};
use ops_scheduler::executor::{Executor, StatusReport, Submission};
use ops_scheduler::jobs::{ExternalJobStatus, JobDefinition};
use ops_scheduler::notify::{AlertTransitionEvent, Notifier};
use ops_scheduler::store::{LibSqlBackend, Repository};

/// Executor that replays scripted statuses and counts submissions.
#[derive(Default)]
pub struct ScriptedExecutor {
    pub statuses: Mutex<VecDeque<ExternalJobStatus>>,
    pub submit_delay: Duration,
    pub query_delay: Duration,
    pub started: AtomicUsize,
    pub finished: AtomicUsize,
    pub queries: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn with_statuses(statuses: &[ExternalJobStatus]) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().cloned().collect()),
            ..Default::default()
        }
    }

    pub fn push(&self, status: ExternalJobStatus) {
        self.statuses.lock().unwrap().push_back(status);
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn submit(&self, job: &JobDefinition) -> Result<Submission, ExecutorError> {
        let n = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.submit_delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(Submission {
            job_id: Some(format!("ext-{n}")),
            job_name: Some(job.name.clone()),
            raw: format!(r#"{{"jobId":"ext-{n}"}}"#),
        })
    }

    async fn query_status(&self, _external_id: &str) -> StatusReport {
        self.queries.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.query_delay).await;
        let state = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ExternalJobStatus::Unknown);
        StatusReport {
            state,
            finish_time: None,
        }
    }
}

/// Notifier that records every event it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<AlertTransitionEvent>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn statuses(&self) -> Vec<ExternalJobStatus> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.new_status.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, event: &AlertTransitionEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail {
            return Err(NotifyError::SendFailed {
                channel: "recording".into(),
                reason: "robot offline".into(),
            });
        }
        Ok(())
    }
}

pub async fn memory_repo() -> Arc<dyn Repository> {
    Arc::new(LibSqlBackend::new_memory().await.unwrap())
}

/// Poll `check` until it returns true or `within` elapses.
pub async fn eventually<F>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}
