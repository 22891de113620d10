//! Cron engine. Fires registered callbacks on their cron schedule.
//!
//! A single driver task sleeps until the earliest next fire time, spawns every
//! due callback onto its own tokio task, and recomputes. Adding or removing
//! an entry wakes the driver so it can re-plan. Callbacks never run on the
//! driver itself, so a slow or panicking job cannot stall the schedule.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ::cron::Schedule;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::cron::schedule::parse_schedule;
use crate::error::ScheduleError;

/// How long the driver sleeps when nothing is scheduled.
const IDLE_WAIT: Duration = Duration::from_secs(60);

/// Callback invoked on every firing.
pub type CronJob = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Opaque reference to a registered callback, needed to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CronHandle(u64);

impl std::fmt::Display for CronHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Read-only view of a registered callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEntry {
    pub handle: CronHandle,
    pub expr: String,
    pub next: Option<DateTime<Utc>>,
}

struct Slot {
    expr: String,
    schedule: Schedule,
    next: Option<DateTime<Utc>>,
    job: CronJob,
}

struct Shared {
    slots: Mutex<HashMap<CronHandle, Slot>>,
    wake: Notify,
    next_handle: AtomicU64,
}

impl Shared {
    fn slots(&self) -> MutexGuard<'_, HashMap<CronHandle, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Driver {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Time-driven callback trigger with second-level cron expressions.
pub struct CronEngine {
    shared: Arc<Shared>,
    driver: Mutex<Option<Driver>>,
}

impl CronEngine {
    /// Create a stopped engine with no entries.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(HashMap::new()),
                wake: Notify::new(),
                next_handle: AtomicU64::new(1),
            }),
            driver: Mutex::new(None),
        }
    }

    /// Register `f` to run at every occurrence of `expr`.
    ///
    /// Entries added while the engine is stopped start firing once it starts.
    pub fn add_func<F, Fut>(&self, expr: &str, f: F) -> Result<CronHandle, ScheduleError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job: CronJob = Arc::new(move || f().boxed());
        self.add_job(expr, job)
    }

    /// Register an already-boxed callback.
    pub fn add_job(&self, expr: &str, job: CronJob) -> Result<CronHandle, ScheduleError> {
        let schedule = parse_schedule(expr)?;
        let handle = CronHandle(self.shared.next_handle.fetch_add(1, Ordering::Relaxed));
        let next = schedule.upcoming(Utc).next();
        self.shared.slots().insert(
            handle,
            Slot {
                expr: expr.to_string(),
                schedule,
                next,
                job,
            },
        );
        self.shared.wake.notify_one();
        debug!(%handle, expr, next = ?next, "Cron entry added");
        Ok(handle)
    }

    /// Cancel a callback. Once this returns, no new firing of it is spawned;
    /// a firing spawned earlier runs to completion. Returns false if the
    /// handle was unknown.
    pub fn remove(&self, handle: CronHandle) -> bool {
        let removed = self.shared.slots().remove(&handle).is_some();
        if removed {
            self.shared.wake.notify_one();
            debug!(%handle, "Cron entry removed");
        }
        removed
    }

    /// All entries with their next fire time, ordered by handle.
    pub fn entries(&self) -> Vec<EngineEntry> {
        let slots = self.shared.slots();
        let mut entries: Vec<EngineEntry> = slots
            .iter()
            .map(|(handle, slot)| EngineEntry {
                handle: *handle,
                expr: slot.expr.clone(),
                next: slot.next,
            })
            .collect();
        entries.sort_by_key(|e| e.handle);
        entries
    }

    /// Look up a single entry.
    pub fn entry(&self, handle: CronHandle) -> Option<EngineEntry> {
        self.shared.slots().get(&handle).map(|slot| EngineEntry {
            handle,
            expr: slot.expr.clone(),
            next: slot.next,
        })
    }

    pub fn len(&self) -> usize {
        self.shared.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Start the driver task. No-op if already running.
    ///
    /// Next fire times are recomputed from now, so occurrences missed while
    /// stopped are skipped rather than fired in a burst.
    pub fn start(&self) {
        let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if driver.is_some() {
            return;
        }

        let now = Utc::now();
        for slot in self.shared.slots().values_mut() {
            slot.next = slot.schedule.after(&now).next();
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(drive(Arc::clone(&self.shared), shutdown_rx));
        *driver = Some(Driver { shutdown, task });
        info!(entries = self.len(), "Cron engine started");
    }

    /// Stop the driver task and wait for it to exit.
    ///
    /// Entries are kept. Callbacks already in flight run to completion, but no
    /// new firing starts after this returns.
    pub async fn stop(&self) {
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(driver) = driver else {
            return;
        };
        let _ = driver.shutdown.send(true);
        if let Err(e) = driver.task.await
            && e.is_panic()
        {
            tracing::error!("Cron driver panicked: {}", e);
        }
        info!("Cron engine stopped");
    }
}

impl Default for CronEngine {
    fn default() -> Self {
        Self::new()
    }
}

async fn drive(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let now = Utc::now();
        let mut wake_at: Option<DateTime<Utc>> = None;
        {
            // Spawn under the lock so a concurrent `remove` either sees the
            // firing already spawned or prevents it.
            let mut slots = shared.slots();
            for (handle, slot) in slots.iter_mut() {
                if let Some(next) = slot.next
                    && next <= now
                {
                    trace!(%handle, "Cron entry fired");
                    tokio::spawn((slot.job)());
                    slot.next = slot.schedule.after(&now).next();
                }
                if let Some(next) = slot.next {
                    wake_at = Some(wake_at.map_or(next, |w| w.min(next)));
                }
            }
        }

        let sleep_for = match wake_at {
            Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
            None => IDLE_WAIT,
        };

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = shared.wake.notified() => {}
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter_job(engine: &CronEngine, expr: &str) -> (CronHandle, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = engine
            .add_func(expr, move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();
        (handle, count)
    }

    async fn wait_for(count: &AtomicUsize, at_least: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if count.load(Ordering::SeqCst) >= at_least {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        false
    }

    #[tokio::test]
    async fn rejects_empty_and_invalid() {
        let engine = CronEngine::new();
        assert_eq!(
            engine.add_func("", || async {}).unwrap_err(),
            ScheduleError::Empty
        );
        assert!(matches!(
            engine.add_func("every tuesday", || async {}),
            Err(ScheduleError::Invalid { .. })
        ));
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn entries_report_next_fire() {
        let engine = CronEngine::new();
        let (handle, _) = counter_job(&engine, "0 0 * * * *");
        let entries = engine.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].handle, handle);
        assert!(entries[0].next.is_some());
        assert_eq!(engine.entry(handle).unwrap().expr, "0 0 * * * *");
    }

    #[tokio::test]
    async fn fires_when_running() {
        let engine = CronEngine::new();
        let (_, count) = counter_job(&engine, "* * * * * *");
        engine.start();
        assert!(wait_for(&count, 1, Duration::from_secs(3)).await);
        engine.stop().await;
    }

    #[tokio::test]
    async fn stopped_engine_does_not_fire() {
        let engine = CronEngine::new();
        let (_, count) = counter_job(&engine, "* * * * * *");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn stop_keeps_entries_and_start_resumes() {
        let engine = CronEngine::new();
        let (_, count) = counter_job(&engine, "* * * * * *");
        engine.start();
        engine.stop().await;
        assert_eq!(engine.len(), 1);

        let before = count.load(Ordering::SeqCst);
        engine.start();
        assert!(wait_for(&count, before + 1, Duration::from_secs(3)).await);
        engine.stop().await;
    }

    #[tokio::test]
    async fn removed_entry_never_fires_again() {
        let engine = CronEngine::new();
        let (handle, count) = counter_job(&engine, "* * * * * *");
        engine.start();
        assert!(wait_for(&count, 1, Duration::from_secs(3)).await);

        assert!(engine.remove(handle));
        assert!(!engine.remove(handle));
        // Let any callback spawned just before removal finish.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let after_remove = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_remove);
        engine.stop().await;
    }

    #[tokio::test]
    async fn no_firing_spawned_after_remove_returns() {
        let engine = CronEngine::new();
        let spawned = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&spawned);
        let job: CronJob = Arc::new(move || {
            s.fetch_add(1, Ordering::SeqCst);
            async {}.boxed()
        });
        let handle = engine.add_job("* * * * * *", job).unwrap();
        engine.start();
        assert!(wait_for(&spawned, 1, Duration::from_secs(3)).await);

        assert!(engine.remove(handle));
        let at_remove = spawned.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(spawned.load(Ordering::SeqCst), at_remove);
        engine.stop().await;
    }

    #[tokio::test]
    async fn entry_added_while_running_fires() {
        let engine = CronEngine::new();
        engine.start();
        let (_, count) = counter_job(&engine, "* * * * * *");
        assert!(wait_for(&count, 1, Duration::from_secs(3)).await);
        engine.stop().await;
    }
}
