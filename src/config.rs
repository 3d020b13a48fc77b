//! Worker configuration, read from `EINGANG_`-prefixed environment
//! variables. Every knob has a default except the two DSNs and the blob
//! root, which the deployment must provide.

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::validate::schematron::KositEngine;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Parallel workers per process.
    pub worker_concurrency: usize,
    /// Hard deadline per transaction.
    pub task_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub kosit_timeout: Duration,
    pub monetary_tolerance: Decimal,
    pub queue_poll: Duration,
    pub metadata_dsn: String,
    /// Read-only credentials.
    pub erp_dsn: String,
    pub blob_root: PathBuf,
    pub kosit_jar: Option<PathBuf>,
    pub kosit_scenarios: Option<PathBuf>,
    pub kosit_repository: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            worker_concurrency: parse_or("EINGANG_WORKER_CONCURRENCY", 4)?,
            task_timeout: Duration::from_secs(parse_or("EINGANG_TASK_TIMEOUT_SECONDS", 600)?),
            retry_max_attempts: parse_or("EINGANG_RETRY_MAX_ATTEMPTS", 5)?,
            retry_base: Duration::from_secs(parse_or("EINGANG_RETRY_BASE_SECONDS", 60)?),
            retry_cap: Duration::from_secs(parse_or("EINGANG_RETRY_CAP_SECONDS", 600)?),
            kosit_timeout: Duration::from_secs(parse_or("EINGANG_KOSIT_TIMEOUT_SECONDS", 120)?),
            monetary_tolerance: parse_decimal_or("EINGANG_MONETARY_TOLERANCE", dec!(0.02))?,
            queue_poll: Duration::from_secs(parse_or("EINGANG_QUEUE_POLL_SECONDS", 5)?),
            metadata_dsn: require("EINGANG_METADATA_DSN")?,
            erp_dsn: require("EINGANG_ERP_DSN")?,
            blob_root: PathBuf::from(require("EINGANG_BLOB_ROOT")?),
            kosit_jar: optional_path("EINGANG_KOSIT_JAR"),
            kosit_scenarios: optional_path("EINGANG_KOSIT_SCENARIOS"),
            kosit_repository: optional_path("EINGANG_KOSIT_REPOSITORY"),
        })
    }

    /// The Schematron engine, when all three paths are configured.
    pub fn kosit_engine(&self) -> Option<KositEngine> {
        Some(KositEngine {
            jar: self.kosit_jar.clone()?,
            scenarios: self.kosit_scenarios.clone()?,
            repository: self.kosit_repository.clone()?,
            timeout: self.kosit_timeout,
        })
    }
}

fn require(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn optional_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_or<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(value) if value.is_empty() => Ok(default),
        Ok(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        }),
    }
}

fn parse_decimal_or(key: &'static str, default: Decimal) -> Result<Decimal, ConfigError> {
    parse_or::<Decimal>(key, default)
}
