//! Chat-robot webhook notifier (markdown message POST).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::NotifyError;
use crate::notify::{AlertTransitionEvent, Notifier};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts `{"msgtype":"markdown","markdown":{"title","text"}}` to a robot URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, NotifyError> {
        if url.trim().is_empty() {
            return Err(NotifyError::Config("webhook URL is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.trim().to_string(),
        })
    }

    fn body(event: &AlertTransitionEvent) -> serde_json::Value {
        serde_json::json!({
            "msgtype": "markdown",
            "markdown": {
                "title": event.title(),
                "text": event.markdown(),
            }
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, event: &AlertTransitionEvent) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&Self::body(event))
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed {
                channel: "webhook".into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::SendFailed {
                channel: "webhook".into(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        tracing::debug!(job = %event.job, "Webhook alert sent");
        Ok(())
    }
}
