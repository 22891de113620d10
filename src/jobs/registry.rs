//! In-memory mapping from job identity to its cron handle.
//!
//! All registry state (the engine instance and the entry map) lives behind a
//! single async mutex. Cron callbacks hold only a weak reference back to it,
//! which they use to record last-run bookkeeping after the handler returns.
//!
//! The registry is a rebuildable cache of persisted definitions. `reload()`
//! stops the engine, discards every entry and re-adds what the repository
//! reports as active. Occurrences due during the rebuild are skipped.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cron::{CronEngine, CronHandle, CronJob, parse_schedule};
use crate::error::{DatabaseError, ScheduleError};
use crate::jobs::model::{JobDefinition, JobKey, JobKind, RunOutcome};
use crate::store::Repository;

/// Kind-specific work bound into every cron callback.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute one firing. Failures are reported in the outcome, never raised.
    async fn run(&self, job: &JobDefinition) -> RunOutcome;
}

/// In-memory record for one job.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub definition: JobDefinition,
    /// Present while the job is scheduled.
    pub handle: Option<CronHandle>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_result: Option<String>,
}

/// Snapshot row for a scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledJob {
    pub key: JobKey,
    pub name: String,
    pub kind: JobKind,
    pub cron_expr: String,
    pub next_run: Option<DateTime<Utc>>,
}

/// Listing row for any known job, scheduled or inert.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub key: JobKey,
    pub name: String,
    pub enabled: bool,
    pub scheduled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_result: Option<String>,
}

struct RegistryState {
    engine: Arc<CronEngine>,
    entries: HashMap<JobKey, RegistryEntry>,
}

impl RegistryState {
    fn record(&mut self, key: JobKey, outcome: &RunOutcome) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_run = Some(outcome.started_at);
            entry.last_result = Some(outcome.result.clone());
        }
    }

    fn next_run(&self, entry: &RegistryEntry) -> Option<DateTime<Utc>> {
        entry
            .handle
            .and_then(|h| self.engine.entry(h))
            .and_then(|e| e.next)
    }
}

pub struct JobRegistry {
    state: Arc<Mutex<RegistryState>>,
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
    repo: Arc<dyn Repository>,
}

impl JobRegistry {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                engine: Arc::new(CronEngine::new()),
                entries: HashMap::new(),
            })),
            handlers: HashMap::new(),
            repo,
        }
    }

    /// Bind the handler that runs jobs of `kind`.
    pub fn with_handler(mut self, kind: JobKind, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    fn handler(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Build the callback registered with the engine for `def`.
    fn make_job(&self, def: &JobDefinition) -> CronJob {
        let state: Weak<Mutex<RegistryState>> = Arc::downgrade(&self.state);
        let handler = self.handler(def.kind());
        let key = def.key();
        let def = Arc::new(def.clone());

        Arc::new(move || {
            let state = state.clone();
            let handler = handler.clone();
            let def = Arc::clone(&def);
            async move {
                let Some(handler) = handler else {
                    warn!(job = %key, "No handler bound for job kind");
                    return;
                };
                debug!(job = %key, "Job fired");
                let outcome = handler.run(&def).await;
                if let Some(state) = state.upgrade() {
                    state.lock().await.record(key, &outcome);
                }
            }
            .boxed()
        })
    }

    /// Schedule `def` under an already-held lock. Replaces any existing entry.
    fn add_locked(&self, state: &mut RegistryState, def: JobDefinition) -> Result<(), ScheduleError> {
        let key = def.key();
        if def.enabled {
            parse_schedule(&def.cron_expr)?;
        }

        let (last_run, last_result) = match state.entries.remove(&key) {
            Some(old) => {
                if let Some(handle) = old.handle {
                    state.engine.remove(handle);
                }
                (old.last_run, old.last_result)
            }
            None => (def.last_run_at, def.last_result.clone()),
        };

        let handle = if def.enabled {
            Some(state.engine.add_job(&def.cron_expr, self.make_job(&def))?)
        } else {
            None
        };

        debug!(job = %key, scheduled = handle.is_some(), "Job added to registry");
        state.entries.insert(
            key,
            RegistryEntry {
                definition: def,
                handle,
                last_run,
                last_result,
            },
        );
        Ok(())
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Register a definition, replacing any previous entry for its key.
    ///
    /// Enabled definitions are scheduled and must carry a valid cron
    /// expression; on error nothing changes. Disabled ones are stored inert.
    pub async fn add(&self, def: JobDefinition) -> Result<(), ScheduleError> {
        let mut state = self.state.lock().await;
        self.add_locked(&mut state, def)
    }

    /// Cancel and forget a job. No-op if absent.
    pub async fn remove(&self, key: JobKey) -> bool {
        let mut state = self.state.lock().await;
        match state.entries.remove(&key) {
            Some(entry) => {
                if let Some(handle) = entry.handle {
                    state.engine.remove(handle);
                }
                debug!(job = %key, "Job removed from registry");
                true
            }
            None => false,
        }
    }

    /// Schedule an inert entry. Returns false if unknown or already scheduled.
    pub async fn enable(&self, key: JobKey) -> Result<bool, ScheduleError> {
        let mut state = self.state.lock().await;
        let def = match state.entries.get(&key) {
            Some(entry) if entry.handle.is_none() => entry.definition.clone(),
            _ => return Ok(false),
        };
        self.add_locked(&mut state, def.with_enabled(true))?;
        Ok(true)
    }

    /// Cancel scheduling but keep the entry. Returns false if not scheduled.
    ///
    /// The handle is removed before this returns, so no new firing starts;
    /// a firing already in flight runs to completion.
    pub async fn disable(&self, key: JobKey) -> bool {
        let mut state = self.state.lock().await;
        let engine = Arc::clone(&state.engine);
        let Some(entry) = state.entries.get_mut(&key) else {
            return false;
        };
        entry.definition.enabled = false;
        match entry.handle.take() {
            Some(handle) => {
                engine.remove(handle);
                debug!(job = %key, "Job disabled");
                true
            }
            None => false,
        }
    }

    /// Rebuild from persistence. Returns the number of scheduled jobs.
    ///
    /// The previous engine is stopped before its entries are dropped, so no
    /// late callback fires against the discarded map. The engine's
    /// running/paused state carries over.
    pub async fn reload(&self) -> Result<usize, DatabaseError> {
        let mut state = self.state.lock().await;
        let was_running = state.engine.is_running();
        state.engine.stop().await;
        state.entries.clear();
        state.engine = Arc::new(CronEngine::new());

        for kind in JobKind::ALL {
            for def in self.repo.get_active_scheduled_definitions(kind).await? {
                let key = def.key();
                if let Err(e) = self.add_locked(&mut state, def) {
                    warn!(job = %key, "Skipping job with bad schedule on reload: {e}");
                }
            }
        }

        if was_running {
            state.engine.start();
        }
        let count = state.engine.len();
        info!(scheduled = count, "Job registry reloaded");
        Ok(count)
    }

    /// Run a job immediately, outside its schedule.
    pub async fn run_now(&self, def: &JobDefinition) -> RunOutcome {
        let key = def.key();
        let outcome = match self.handler(def.kind()) {
            Some(handler) => handler.run(def).await,
            None => RunOutcome {
                started_at: Utc::now(),
                result: format!("no handler bound for {} jobs", def.kind()),
                succeeded: false,
            },
        };
        self.state.lock().await.record(key, &outcome);
        outcome
    }

    // ── Engine control ──────────────────────────────────────────────

    pub async fn start(&self) {
        self.state.lock().await.engine.start();
    }

    pub async fn stop(&self) {
        let engine = Arc::clone(&self.state.lock().await.engine);
        engine.stop().await;
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.engine.is_running()
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Next fire time, or None if the job is not currently scheduled.
    pub async fn next_run_time(&self, key: JobKey) -> Option<DateTime<Utc>> {
        let state = self.state.lock().await;
        state.entries.get(&key).and_then(|e| state.next_run(e))
    }

    pub async fn is_scheduled(&self, key: JobKey) -> bool {
        let state = self.state.lock().await;
        state
            .entries
            .get(&key)
            .is_some_and(|e| e.handle.is_some())
    }

    /// Scheduled jobs ordered by key.
    pub async fn snapshot(&self) -> Vec<ScheduledJob> {
        let state = self.state.lock().await;
        let mut jobs: Vec<ScheduledJob> = state
            .entries
            .values()
            .filter(|e| e.handle.is_some())
            .map(|e| ScheduledJob {
                key: e.definition.key(),
                name: e.definition.name.clone(),
                kind: e.definition.kind(),
                cron_expr: e.definition.cron_expr.clone(),
                next_run: state.next_run(e),
            })
            .collect();
        jobs.sort_by_key(|j| j.key);
        jobs
    }

    /// Bookkeeping for one job, if the registry knows it.
    pub async fn summary(&self, key: JobKey) -> Option<JobSummary> {
        let state = self.state.lock().await;
        state.entries.get(&key).map(|e| JobSummary {
            key,
            name: e.definition.name.clone(),
            enabled: e.definition.enabled,
            scheduled: e.handle.is_some(),
            next_run: state.next_run(e),
            last_run: e.last_run,
            last_result: e.last_result.clone(),
        })
    }

    /// Number of callbacks registered with the current engine.
    pub async fn engine_len(&self) -> usize {
        self.state.lock().await.engine.len()
    }
}
