//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::notify::SmtpConfig;

/// Process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// libSQL database file.
    pub db_path: PathBuf,
    pub executor: ExecutorConfig,
    /// Reconciler interval. `None` disables the background pass.
    pub status_sync_interval: Option<Duration>,
    pub alerts: AlertConfig,
    /// Directory for daily-rolling log files. Stdout only when unset.
    pub log_dir: Option<PathBuf>,
}

/// External execution service settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub base_url: String,
    /// Bound for every submit and status query.
    pub timeout: Duration,
}

/// Alert channels. Both may be unset, in which case alerts only reach the log.
#[derive(Debug, Clone, Default)]
pub struct AlertConfig {
    pub webhook_url: Option<String>,
    pub smtp: Option<SmtpConfig>,
}

impl SchedulerConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = get("OPS_SCHEDULER_DB_PATH")
            .unwrap_or_else(|| "./data/ops-scheduler.db".to_string())
            .into();

        let base_url = get("EXECUTOR_BASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("EXECUTOR_BASE_URL".to_string()))?;
        let timeout_secs: u64 = parse_or(&get, "EXECUTOR_TIMEOUT_SECS", 10)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EXECUTOR_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let sync_secs: u64 = parse_or(&get, "STATUS_SYNC_INTERVAL_SECS", 60)?;
        let status_sync_interval = (sync_secs > 0).then(|| Duration::from_secs(sync_secs));

        let smtp = match get("ALERT_SMTP_HOST") {
            Some(host) => {
                let username = get("ALERT_SMTP_USERNAME").unwrap_or_default();
                let from = get("ALERT_EMAIL_FROM").unwrap_or_else(|| username.clone());
                let to: Vec<String> = get("ALERT_EMAIL_TO")
                    .unwrap_or_default()
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                Some(SmtpConfig {
                    host,
                    port: parse_or(&get, "ALERT_SMTP_PORT", 587)?,
                    username,
                    password: SecretString::from(get("ALERT_SMTP_PASSWORD").unwrap_or_default()),
                    from,
                    to,
                })
            }
            None => None,
        };

        Ok(Self {
            db_path,
            executor: ExecutorConfig {
                base_url,
                timeout: Duration::from_secs(timeout_secs),
            },
            status_sync_interval,
            alerts: AlertConfig {
                webhook_url: get("ALERT_WEBHOOK_URL"),
                smtp,
            },
            log_dir: get("OPS_SCHEDULER_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<SchedulerConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SchedulerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("EXECUTOR_BASE_URL", "http://engine:5801/hazelcast/rest/maps")]).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("./data/ops-scheduler.db"));
        assert_eq!(cfg.executor.timeout, Duration::from_secs(10));
        assert_eq!(cfg.status_sync_interval, Some(Duration::from_secs(60)));
        assert!(cfg.alerts.webhook_url.is_none());
        assert!(cfg.alerts.smtp.is_none());
        assert!(cfg.log_dir.is_none());
    }

    #[test]
    fn executor_url_is_required() {
        assert!(matches!(
            config(&[]),
            Err(ConfigError::MissingEnvVar(key)) if key == "EXECUTOR_BASE_URL"
        ));
    }

    #[test]
    fn zero_interval_disables_sync() {
        let cfg = config(&[
            ("EXECUTOR_BASE_URL", "http://engine"),
            ("STATUS_SYNC_INTERVAL_SECS", "0"),
        ])
        .unwrap();
        assert!(cfg.status_sync_interval.is_none());
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = config(&[
            ("EXECUTOR_BASE_URL", "http://engine"),
            ("EXECUTOR_TIMEOUT_SECS", "ten"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "EXECUTOR_TIMEOUT_SECS"));

        assert!(config(&[
            ("EXECUTOR_BASE_URL", "http://engine"),
            ("EXECUTOR_TIMEOUT_SECS", "0"),
        ])
        .is_err());
    }

    #[test]
    fn smtp_settings() {
        let cfg = config(&[
            ("EXECUTOR_BASE_URL", "http://engine"),
            ("ALERT_SMTP_HOST", "smtp.example.com"),
            ("ALERT_SMTP_USERNAME", "alerts@example.com"),
            ("ALERT_SMTP_PASSWORD", "s3cret"),
            ("ALERT_EMAIL_TO", "a@example.com, b@example.com,"),
        ])
        .unwrap();
        let smtp = cfg.alerts.smtp.unwrap();
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.from, "alerts@example.com");
        assert_eq!(smtp.to, vec!["a@example.com", "b@example.com"]);
        assert_eq!(smtp.password.expose_secret(), "s3cret");
    }
}
