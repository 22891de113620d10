//! SMTP email notifier via lettre.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::error::NotifyError;
use crate::notify::{AlertTransitionEvent, Notifier};

/// SMTP settings for alert mail.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from: String,
    pub to: Vec<String>,
}

/// Sends a plain-text email per alert to the configured recipients.
pub struct EmailNotifier {
    config: Arc<SmtpConfig>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailNotifier {
    /// Validate addresses up front so a typo surfaces at startup, not on the first alert.
    pub fn new(config: SmtpConfig) -> Result<Self, NotifyError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| NotifyError::Config(format!("Invalid from address: {e}")))?;
        let to = config
            .to
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .map_err(|e| NotifyError::Config(format!("Invalid to address '{addr}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if to.is_empty() {
            return Err(NotifyError::Config("no alert recipients".to_string()));
        }
        Ok(Self {
            config: Arc::new(config),
            from,
            to,
        })
    }

    fn build_message(&self, event: &AlertTransitionEvent) -> Result<Message, NotifyError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(format!("[ops-scheduler] {}", event.title()));
        for mailbox in &self.to {
            builder = builder.to(mailbox.clone());
        }
        builder
            .body(event.markdown())
            .map_err(|e| NotifyError::SendFailed {
                channel: "email".into(),
                reason: format!("Failed to build email: {e}"),
            })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn notify(&self, event: &AlertTransitionEvent) -> Result<(), NotifyError> {
        let email = self.build_message(event)?;
        let config = Arc::clone(&self.config);

        // SmtpTransport is blocking; keep it off the runtime threads.
        tokio::task::spawn_blocking(move || {
            let creds = Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            );
            let transport = SmtpTransport::relay(&config.host)
                .map_err(|e| NotifyError::SendFailed {
                    channel: "email".into(),
                    reason: format!("SMTP relay error: {e}"),
                })?
                .port(config.port)
                .credentials(creds)
                .build();
            transport
                .send(&email)
                .map_err(|e| NotifyError::SendFailed {
                    channel: "email".into(),
                    reason: format!("SMTP send failed: {e}"),
                })?;
            Ok::<(), NotifyError>(())
        })
        .await
        .map_err(|e| NotifyError::SendFailed {
            channel: "email".into(),
            reason: format!("send task failed: {e}"),
        })??;

        tracing::info!(job = %event.job, recipients = self.to.len(), "Alert email sent");
        Ok(())
    }
}
