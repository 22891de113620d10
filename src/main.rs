use std::path::Path;
use std::sync::Arc;

use ops_scheduler::config::SchedulerConfig;
use ops_scheduler::executor::{Executor, HttpExecutor};
use ops_scheduler::notify::{EmailNotifier, FanoutNotifier, LogNotifier, Notifier, WebhookNotifier};
use ops_scheduler::scheduler::Scheduler;
use ops_scheduler::store::{LibSqlBackend, Repository};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Console logging, plus daily-rolling files when a log directory is configured.
///
/// The returned guard must stay alive for file output to be flushed.
fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("ops-scheduler")
                .filename_suffix("log")
                .max_log_files(14)
                .build(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn build_notifier(config: &SchedulerConfig) -> Arc<dyn Notifier> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];

    if let Some(url) = &config.alerts.webhook_url {
        match WebhookNotifier::new(url) {
            Ok(n) => notifiers.push(Arc::new(n)),
            Err(e) => tracing::warn!("Webhook alerts disabled: {e}"),
        }
    }
    if let Some(smtp) = &config.alerts.smtp {
        match EmailNotifier::new(smtp.clone()) {
            Ok(n) => notifiers.push(Arc::new(n)),
            Err(e) => tracing::warn!("Email alerts disabled: {e}"),
        }
    }

    let names: Vec<&str> = notifiers.iter().map(|n| n.name()).collect();
    tracing::info!(channels = ?names, "Alert channels configured");
    Arc::new(FanoutNotifier::new(notifiers))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = SchedulerConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let _log_guard = init_tracing(config.log_dir.as_deref())?;

    // ── Database ─────────────────────────────────────────────────────────
    let repo: Arc<dyn Repository> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );

    // ── Collaborators ────────────────────────────────────────────────────
    let executor: Arc<dyn Executor> = Arc::new(HttpExecutor::new(
        &config.executor.base_url,
        config.executor.timeout,
    )?);
    let notifier = build_notifier(&config);

    // ── Scheduler ────────────────────────────────────────────────────────
    let scheduler = Scheduler::new(repo, executor, notifier, config.executor.timeout);
    let scheduled = scheduler.reload().await?;
    scheduler.start().await;

    let sync_task = config
        .status_sync_interval
        .map(|interval| scheduler.spawn_status_sync(interval));

    tracing::info!(
        scheduled,
        db = %config.db_path.display(),
        executor = %config.executor.base_url,
        "ops-scheduler running"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    if let Some(task) = sync_task {
        task.abort();
    }
    scheduler.stop().await;
    tracing::info!("ops-scheduler stopped");
    Ok(())
}
