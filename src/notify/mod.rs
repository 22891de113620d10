//! Alert delivery for external job status transitions.
//!
//! The reconciler builds one `AlertTransitionEvent` per edge into a terminal
//! state and hands it to a `Notifier`. Delivery is fire-and-forget from the
//! reconciler's side: failures are logged by the caller and never retried.

pub mod email;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::NotifyError;
use crate::jobs::model::{ExternalJobStatus, JobKey};

pub use email::{EmailNotifier, SmtpConfig};
pub use webhook::WebhookNotifier;

/// A single observed status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertTransitionEvent {
    pub job: JobKey,
    pub job_name: String,
    pub external_job_id: Option<String>,
    pub old_status: Option<ExternalJobStatus>,
    pub new_status: ExternalJobStatus,
    pub observed_at: DateTime<Utc>,
    /// Human-readable cause (finish time, executor message).
    pub reason: String,
    /// Alert groups configured on the job definition.
    pub alert_targets: Vec<String>,
}

impl AlertTransitionEvent {
    /// Short one-line summary, used as title and subject.
    pub fn title(&self) -> String {
        let verb = match self.new_status {
            ExternalJobStatus::Failed => "failed",
            ExternalJobStatus::Succeeded => "succeeded",
            _ => "changed status",
        };
        format!("Job '{}' {}", self.job_name, verb)
    }

    /// Multi-line markdown body.
    pub fn markdown(&self) -> String {
        let old = self
            .old_status
            .as_ref()
            .map(|s| s.as_str())
            .unwrap_or("(none)");
        let mut text = format!(
            "### {}\n\n- **Job:** {} ({})\n- **Status:** {} → {}\n- **Observed:** {}\n",
            self.title(),
            self.job_name,
            self.job,
            old,
            self.new_status,
            self.observed_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
        if let Some(id) = &self.external_job_id {
            text.push_str(&format!("- **External id:** {id}\n"));
        }
        if !self.reason.is_empty() {
            text.push_str(&format!("- **Detail:** {}\n", self.reason));
        }
        text
    }
}

/// Delivers transition alerts to some channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name for logs.
    fn name(&self) -> &str;

    async fn notify(&self, event: &AlertTransitionEvent) -> Result<(), NotifyError>;
}

/// Writes alerts to the tracing log only. Used when no channel is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &AlertTransitionEvent) -> Result<(), NotifyError> {
        tracing::warn!(
            job = %event.job,
            name = %event.job_name,
            old = ?event.old_status,
            new = %event.new_status,
            targets = ?event.alert_targets,
            "Job status alert: {}",
            event.reason
        );
        Ok(())
    }
}

/// Sends every alert to each inner notifier in turn.
///
/// A failing channel does not stop delivery to the rest; the first error is
/// returned after all channels were tried.
pub struct FanoutNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn notify(&self, event: &AlertTransitionEvent) -> Result<(), NotifyError> {
        let mut first_err = None;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(event).await {
                tracing::warn!(channel = notifier.name(), job = %event.job, "Alert delivery failed: {e}");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn event(new_status: ExternalJobStatus) -> AlertTransitionEvent {
        AlertTransitionEvent {
            job: JobKey::batch(12),
            job_name: "orders-etl".to_string(),
            external_job_id: Some("861234".to_string()),
            old_status: Some(ExternalJobStatus::Running),
            new_status,
            observed_at: Utc::now(),
            reason: "finished at 2024-06-12 15:30:01".to_string(),
            alert_targets: vec!["data-oncall".to_string()],
        }
    }

    struct Recording {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn notify(&self, event: &AlertTransitionEvent) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(event.job_name.clone());
            if self.fail {
                return Err(NotifyError::SendFailed {
                    channel: "recording".into(),
                    reason: "boom".into(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn markdown_mentions_transition() {
        let text = event(ExternalJobStatus::Failed).markdown();
        assert!(text.contains("Job 'orders-etl' failed"));
        assert!(text.contains("RUNNING → FAILED"));
        assert!(text.contains("861234"));
    }

    #[tokio::test]
    async fn fanout_delivers_to_all_despite_failure() {
        let failing = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            fail: true,
        });
        let ok = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let fanout = FanoutNotifier::new(vec![failing.clone(), ok.clone()]);

        let result = fanout.notify(&event(ExternalJobStatus::Succeeded)).await;
        assert!(result.is_err());
        assert_eq!(failing.seen.lock().unwrap().len(), 1);
        assert_eq!(ok.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        assert!(LogNotifier.notify(&event(ExternalJobStatus::Failed)).await.is_ok());
    }
}
