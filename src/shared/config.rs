//! Application configuration. Platform credentials, pool size, retry policy.

use crate::domain::{Credentials, DomainError};
use crate::shared::retry::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_MAX_ATTEMPTS, RetryPolicy,
};
use serde::Deserialize;
use std::time::Duration;

/// Default number of concurrent platform sessions.
pub const DEFAULT_POOL_SIZE: usize = 1;

/// Default per-step timeout in seconds (the platform's slowest pages take tens of seconds).
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 40;

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    /// Base URL of the platform API. Read from COURSE_AUTOMATOR_PLATFORM_URL.
    #[serde(default)]
    pub platform_url: Option<String>,

    #[serde(default)]
    pub platform_user: Option<String>,

    #[serde(default)]
    pub platform_password: Option<String>,

    /// Run against the in-memory fake platform instead of the real one.
    #[serde(default)]
    pub sandbox: Option<bool>,

    /// Number of independent sessions (max parallel sequences).
    #[serde(default)]
    pub pool_size: Option<usize>,

    // ─────────────────────────────────────────────────────────────────────────
    // Retry / timeout
    // ─────────────────────────────────────────────────────────────────────────
    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub backoff_base_ms: Option<u64>,

    #[serde(default)]
    pub backoff_max_ms: Option<u64>,

    #[serde(default)]
    pub step_timeout_secs: Option<u64>,

    /// JSON file collecting needs-review operations. Disabled when unset.
    #[serde(default)]
    pub review_journal: Option<String>,
}

/// Engine tuning derived from `AppConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub pool_size: usize,
    pub retry: RetryPolicy,
    pub step_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            retry: RetryPolicy::default(),
            step_timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();
        let mut c = config::Config::builder();
        c = c.add_source(config::Environment::with_prefix("COURSE_AUTOMATOR").try_parsing(true));
        if let Ok(path) = std::env::var("COURSE_AUTOMATOR_CONFIG") {
            c = c.add_source(config::File::with_name(&path));
        }
        c.build()?.try_deserialize()
    }

    pub fn sandbox_or_default(&self) -> bool {
        self.sandbox.unwrap_or(false)
    }

    /// Returns pool size. Defaults to DEFAULT_POOL_SIZE; never below 1.
    pub fn pool_size_or_default(&self) -> usize {
        self.pool_size.unwrap_or(DEFAULT_POOL_SIZE).max(1)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs.unwrap_or(DEFAULT_STEP_TIMEOUT_SECS).max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            Duration::from_millis(self.backoff_base_ms.unwrap_or(DEFAULT_BACKOFF_BASE_MS)),
            Duration::from_millis(self.backoff_max_ms.unwrap_or(DEFAULT_BACKOFF_MAX_MS)),
        )
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            pool_size: self.pool_size_or_default(),
            retry: self.retry_policy(),
            step_timeout: self.step_timeout(),
        }
    }

    /// Platform login material. All three keys are required outside sandbox mode.
    pub fn credentials(&self) -> Result<Credentials, DomainError> {
        let missing: Vec<&str> = [
            ("COURSE_AUTOMATOR_PLATFORM_URL", &self.platform_url),
            ("COURSE_AUTOMATOR_PLATFORM_USER", &self.platform_user),
            ("COURSE_AUTOMATOR_PLATFORM_PASSWORD", &self.platform_password),
        ]
        .iter()
        .filter(|(_, v)| v.as_deref().is_none_or(|s| s.trim().is_empty()))
        .map(|(name, _)| *name)
        .collect();
        if !missing.is_empty() {
            return Err(DomainError::Config(format!("set {}", missing.join(", "))));
        }
        Ok(Credentials {
            url: self.platform_url.clone().unwrap_or_default(),
            username: self.platform_user.clone().unwrap_or_default(),
            password: self.platform_password.clone().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        let settings = cfg.engine_settings();
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.step_timeout, Duration::from_secs(40));
        assert!(!cfg.sandbox_or_default());
    }

    #[test]
    fn test_pool_size_never_zero() {
        let cfg = AppConfig {
            pool_size: Some(0),
            ..Default::default()
        };
        assert_eq!(cfg.pool_size_or_default(), 1);
    }

    #[test]
    fn test_credentials_report_every_missing_key() {
        let cfg = AppConfig {
            platform_url: Some("https://lms.example".into()),
            platform_user: Some("  ".into()),
            ..Default::default()
        };
        let err = cfg.credentials().unwrap_err().to_string();
        assert!(err.contains("COURSE_AUTOMATOR_PLATFORM_USER"));
        assert!(err.contains("COURSE_AUTOMATOR_PLATFORM_PASSWORD"));
        assert!(!err.contains("COURSE_AUTOMATOR_PLATFORM_URL"));
    }

    #[test]
    fn test_credentials_ok() {
        let cfg = AppConfig {
            platform_url: Some("https://lms.example".into()),
            platform_user: Some("ops".into()),
            platform_password: Some("secret".into()),
            ..Default::default()
        };
        let creds = cfg.credentials().unwrap();
        assert_eq!(creds.username, "ops");
    }
}
