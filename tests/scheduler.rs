//! End-to-end tests through the scheduler façade with stub collaborators.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{RecordingNotifier, ScriptedExecutor, eventually, memory_repo};
use ops_scheduler::error::{Error, ScheduleError};
use ops_scheduler::jobs::{
    BatchJobUpdate, ExternalJobStatus, JOB_STATUS_SYNC, JobDefinition, JobKey, JobKind,
};
use ops_scheduler::scheduler::Scheduler;
use ops_scheduler::store::Repository;

async fn scheduler_with(executor: ScriptedExecutor) -> (Scheduler, Arc<dyn Repository>, Arc<ScriptedExecutor>, Arc<RecordingNotifier>) {
    let repo = memory_repo().await;
    let executor = Arc::new(executor);
    let notifier = Arc::new(RecordingNotifier::default());
    let scheduler = Scheduler::new(
        Arc::clone(&repo),
        executor.clone(),
        notifier.clone(),
        Duration::from_secs(5),
    );
    (scheduler, repo, executor, notifier)
}

#[tokio::test]
async fn reload_reflects_persisted_enabled_set() {
    let (scheduler, repo, _, _) = scheduler_with(ScriptedExecutor::default()).await;
    let a = repo
        .create_definition(&JobDefinition::batch("a", "0 0 * * * *", "{}"))
        .await
        .unwrap();
    repo.create_definition(&JobDefinition::batch("off", "0 0 * * * *", "{}").with_enabled(false))
        .await
        .unwrap();
    repo.create_definition(&JobDefinition::batch("manual", "", "{}"))
        .await
        .unwrap();
    let c = repo
        .create_definition(&JobDefinition::custom("sync", "*/30 * * * * *", JOB_STATUS_SYNC))
        .await
        .unwrap();

    assert_eq!(scheduler.reload().await.unwrap(), 2);
    let status = scheduler.status().await;
    assert!(!status.running);
    assert_eq!(status.active_count, 2);
    let keys: Vec<JobKey> = status.entries.iter().map(|e| e.key).collect();
    assert_eq!(keys, vec![JobKey::batch(a), JobKey::custom(c)]);
    assert!(status.entries.iter().all(|e| e.next_run.is_some()));

    // Persistence wins over in-memory edits.
    scheduler.registry().remove(JobKey::batch(a)).await;
    assert_eq!(scheduler.status().await.active_count, 1);
    scheduler.reload().await.unwrap();
    assert_eq!(scheduler.status().await.active_count, 2);
}

#[tokio::test]
async fn create_with_empty_cron_is_not_scheduled() {
    let (scheduler, _, _, _) = scheduler_with(ScriptedExecutor::default()).await;
    let def = scheduler
        .batch()
        .create(JobDefinition::batch("manual", "", "{}"))
        .await
        .unwrap();
    assert!(scheduler.status().await.entries.is_empty());

    let err = scheduler
        .registry()
        .add(def)
        .await
        .unwrap_err();
    assert_eq!(err, ScheduleError::Empty);
    assert!(scheduler.status().await.entries.is_empty());
}

#[tokio::test]
async fn invalid_cron_surfaces_to_caller() {
    let (scheduler, _, _, _) = scheduler_with(ScriptedExecutor::default()).await;
    let err = scheduler
        .custom()
        .create(JobDefinition::custom("sg", "every minute", "ecs_sg_sync"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Schedule(ScheduleError::Invalid { .. })));
}

#[tokio::test]
async fn stop_pauses_and_start_resumes() {
    let (scheduler, _, executor, _) = scheduler_with(ScriptedExecutor::default()).await;
    scheduler
        .batch()
        .create(JobDefinition::batch("tick", "* * * * * *", "{}"))
        .await
        .unwrap();

    scheduler.start().await;
    assert!(scheduler.status().await.running);
    assert!(eventually(Duration::from_secs(3), || executor.started.load(Ordering::SeqCst) >= 1).await);

    scheduler.stop().await;
    assert!(!scheduler.status().await.running);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let paused_at = executor.started.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(executor.started.load(Ordering::SeqCst), paused_at);
    assert_eq!(scheduler.status().await.active_count, 1);

    scheduler.start().await;
    assert!(eventually(Duration::from_secs(3), || executor.started.load(Ordering::SeqCst) > paused_at).await);
    scheduler.stop().await;
}

#[tokio::test]
async fn disable_mid_flight_lets_callback_finish_without_refiring() {
    let executor = ScriptedExecutor {
        submit_delay: Duration::from_millis(700),
        ..Default::default()
    };
    let (scheduler, repo, executor, _) = scheduler_with(executor).await;
    let def = scheduler
        .batch()
        .create(JobDefinition::batch("slow", "* * * * * *", "{}"))
        .await
        .unwrap();
    scheduler.start().await;

    assert!(eventually(Duration::from_secs(3), || executor.started.load(Ordering::SeqCst) >= 1).await);
    scheduler
        .batch()
        .update(
            def.id,
            BatchJobUpdate {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!scheduler.registry().is_scheduled(def.key()).await);
    // A firing spawned just before removal still reaches the executor.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let started_at_disable = executor.started.load(Ordering::SeqCst);

    // In-flight submissions complete.
    assert!(
        eventually(Duration::from_secs(3), || {
            executor.finished.load(Ordering::SeqCst) == started_at_disable
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(executor.started.load(Ordering::SeqCst), started_at_disable);

    let stored = repo.get_definition(JobKind::Batch, def.id).await.unwrap().unwrap();
    assert!(!stored.enabled);
    assert!(stored.external_job_id.is_some());
    scheduler.stop().await;
}

#[tokio::test]
async fn submission_is_tracked_and_reconciled() {
    let (scheduler, repo, executor, notifier) = scheduler_with(ScriptedExecutor::default()).await;
    let def = scheduler
        .batch()
        .create(JobDefinition::batch("orders", "", "{}"))
        .await
        .unwrap();

    let outcome = scheduler.batch().run_now(def.id).await.unwrap();
    assert!(outcome.succeeded);

    executor.push(ExternalJobStatus::Running);
    executor.push(ExternalJobStatus::Failed);
    scheduler.reconciler().sync_all().await.unwrap();
    scheduler.reconciler().sync_all().await.unwrap();

    assert_eq!(notifier.statuses(), vec![ExternalJobStatus::Failed]);
    let stored = repo.get_definition(JobKind::Batch, def.id).await.unwrap().unwrap();
    assert_eq!(stored.job_status, Some(ExternalJobStatus::Failed));
    assert_eq!(stored.external_job_id.as_deref(), Some("ext-1"));
}

#[tokio::test]
async fn builtin_status_sync_job_reports_summary() {
    let (scheduler, repo, executor, notifier) = scheduler_with(ScriptedExecutor::default()).await;
    assert!(scheduler.custom_types().is_registered(JOB_STATUS_SYNC));

    let batch = scheduler
        .batch()
        .create(JobDefinition::batch("orders", "", "{}"))
        .await
        .unwrap();
    scheduler.batch().run_now(batch.id).await.unwrap();
    executor.push(ExternalJobStatus::Succeeded);

    let sync = scheduler
        .custom()
        .create(JobDefinition::custom("force sync", "", JOB_STATUS_SYNC).with_enabled(false))
        .await
        .unwrap();
    let outcome = scheduler.custom().run_now(sync.id).await.unwrap();
    assert!(outcome.succeeded);
    assert!(outcome.result.starts_with("status sync: checked 1"));
    assert_eq!(notifier.count(), 1);

    let logs = repo.list_logs(sync.key(), 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].task_type, JOB_STATUS_SYNC);
}

#[tokio::test]
async fn delete_while_active_unschedules_first() {
    let (scheduler, repo, _, _) = scheduler_with(ScriptedExecutor::default()).await;
    let def = scheduler
        .batch()
        .create(JobDefinition::batch("orders", "0 0 * * * *", "{}"))
        .await
        .unwrap();
    assert_eq!(scheduler.status().await.active_count, 1);

    assert!(scheduler.batch().delete(def.id).await.unwrap());
    assert_eq!(scheduler.status().await.active_count, 0);
    assert_eq!(scheduler.registry().engine_len().await, 0);
    assert!(repo.list_definitions(JobKind::Batch).await.unwrap().is_empty());
}
