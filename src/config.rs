#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::error::{QueueError, Result};
use crate::logging::{LogFormat, LogSettings};
use std::time::Duration;

pub const DEFAULT_STALE_THRESHOLD_MINUTES: u32 = 10;
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_WORKERS: u32 = 4;
const MIN_POOL_CONNECTIONS: u32 = 8;

/// Process settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
    pub stale_threshold_minutes: u32,
    pub reaper_interval_secs: u64,
    pub log: LogSettings,
}

impl Settings {
    /// Reads `.env` when present, then the process environment.
    ///
    /// # Errors
    /// Returns `QueueError::Config` if no database URL is configured.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// # Errors
    /// Returns `QueueError::Config` if no database URL is configured.
    pub fn from_lookup<F>(env_lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = non_empty(&env_lookup, "EDQ_DATABASE_URL")
            .or_else(|| non_empty(&env_lookup, "DATABASE_URL"))
            .ok_or_else(|| {
                QueueError::Config(
                    "database URL not configured: set EDQ_DATABASE_URL or DATABASE_URL"
                        .to_string(),
                )
            })?;

        Ok(Self {
            database_url,
            max_connections: resolve_pool_max_connections_from(&env_lookup),
            stale_threshold_minutes: positive(&env_lookup, "EDQ_STALE_THRESHOLD_MINUTES")
                .unwrap_or(DEFAULT_STALE_THRESHOLD_MINUTES),
            reaper_interval_secs: positive(&env_lookup, "EDQ_REAPER_INTERVAL_SECS")
                .unwrap_or(DEFAULT_REAPER_INTERVAL_SECS),
            log: log_settings_from(&env_lookup),
        })
    }

    #[must_use]
    pub const fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

/// Logging settings alone; usable before a database URL is known.
#[must_use]
pub fn log_settings_from_env() -> LogSettings {
    let _ = dotenv::dotenv();
    log_settings_from(&|key: &str| std::env::var(key).ok())
}

fn log_settings_from<F>(env_lookup: &F) -> LogSettings
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = LogSettings::default();
    LogSettings {
        level: non_empty(env_lookup, "RUST_LOG")
            .or_else(|| non_empty(env_lookup, "EDQ_LOG_LEVEL"))
            .unwrap_or(defaults.level),
        format: non_empty(env_lookup, "EDQ_LOG_FORMAT")
            .and_then(|raw| raw.parse::<LogFormat>().ok())
            .unwrap_or(defaults.format),
    }
}

/// Explicit pool size, else enough connections for every worker to claim,
/// heartbeat and report concurrently.
pub fn resolve_pool_max_connections_from<F>(env_lookup: &F) -> u32
where
    F: Fn(&str) -> Option<String>,
{
    positive(env_lookup, "EDQ_DB_MAX_CONNECTIONS").unwrap_or_else(|| {
        let workers =
            positive::<_, u32>(env_lookup, "EDQ_MAX_WORKERS").unwrap_or(DEFAULT_MAX_WORKERS);
        MIN_POOL_CONNECTIONS.max(workers.saturating_mul(3))
    })
}

/// Masks the password of a DSN for log and CLI output.
#[must_use]
pub fn redact_database_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("********"));
            }
            parsed.to_string()
        }
        Err(_) => "<invalid-database-url>".to_string(),
    }
}

fn non_empty<F>(env_lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env_lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn positive<F, T>(env_lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Default,
{
    non_empty(env_lookup, key)
        .and_then(|value| value.parse::<T>().ok())
        .filter(|value| *value > T::default())
}
