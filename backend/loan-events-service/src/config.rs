//! Environment configuration
//!
//! Every setting is read once at startup into immutable structs that are
//! handed to constructors. Missing or unparsable values are [`ConfigError`]s.

use crate::error::ConfigError;
use crate::models::{MAX_AMOUNT, MIN_AMOUNT};
use crate::services::sink::WriteMode;
use db_pool::{ConnectTarget, DbConfig};
use resilience::RetryConfig;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Where a consumer starts when its group has no committed offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl FromStr for OffsetReset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            other => Err(format!("expected 'earliest' or 'latest', got '{}'", other)),
        }
    }
}

/// How consumed offsets relate to persisted rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryGuarantee {
    /// Offsets auto-commit on a timer. A crash can lose or repeat events.
    BestEffort,
    /// Offsets commit only after the row is written. Redelivery hits the
    /// primary key and is counted as a duplicate.
    AtLeastOnce,
    /// Commit after write, and writes are upserts keyed by `loan_id`.
    Idempotent,
}

impl DeliveryGuarantee {
    /// Whether the consumer commits offsets itself after handling a message
    pub fn commits_after_persist(&self) -> bool {
        !matches!(self, DeliveryGuarantee::BestEffort)
    }

    pub fn write_mode(&self) -> WriteMode {
        match self {
            DeliveryGuarantee::Idempotent => WriteMode::Upsert,
            DeliveryGuarantee::BestEffort | DeliveryGuarantee::AtLeastOnce => WriteMode::Insert,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryGuarantee::BestEffort => "best-effort",
            DeliveryGuarantee::AtLeastOnce => "at-least-once",
            DeliveryGuarantee::Idempotent => "idempotent",
        }
    }
}

impl FromStr for DeliveryGuarantee {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "best-effort" => Ok(DeliveryGuarantee::BestEffort),
            "at-least-once" => Ok(DeliveryGuarantee::AtLeastOnce),
            "idempotent" => Ok(DeliveryGuarantee::Idempotent),
            other => Err(format!(
                "expected 'best-effort', 'at-least-once' or 'idempotent', got '{}'",
                other
            )),
        }
    }
}

/// Message bus settings shared by producer and consumer
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub offset_reset: OffsetReset,
    pub poll_timeout: Duration,
    pub auto_commit_interval: Duration,
    /// Pause after a transport error before polling again
    pub error_backoff: Duration,
    pub dead_letter_topic: Option<String>,
}

impl KafkaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            brokers: required("KAFKA_BROKERS")?,
            topic: optional("KAFKA_TOPIC").unwrap_or_else(|| "loan-events".to_string()),
            group_id: optional("KAFKA_GROUP_ID")
                .unwrap_or_else(|| "loan-event-consumer".to_string()),
            offset_reset: parse_or("KAFKA_OFFSET_RESET", OffsetReset::Earliest)?,
            poll_timeout: Duration::from_millis(parse_or("KAFKA_POLL_TIMEOUT_MS", 1000u64)?),
            auto_commit_interval: Duration::from_millis(parse_or(
                "KAFKA_AUTO_COMMIT_INTERVAL_MS",
                5000u64,
            )?),
            error_backoff: Duration::from_millis(parse_or("KAFKA_ERROR_BACKOFF_MS", 1000u64)?),
            dead_letter_topic: optional("KAFKA_DLQ_TOPIC"),
        };

        if config.poll_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "KAFKA_POLL_TIMEOUT_MS",
                "must be greater than zero",
            ));
        }
        if config.dead_letter_topic.as_deref() == Some(config.topic.as_str()) {
            return Err(ConfigError::invalid(
                "KAFKA_DLQ_TOPIC",
                "must differ from KAFKA_TOPIC",
            ));
        }

        Ok(config)
    }
}

/// Relative status weights for generated events
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusWeights {
    pub approved: f64,
    pub pending: f64,
    pub rejected: f64,
}

impl Default for StatusWeights {
    fn default() -> Self {
        Self {
            approved: 0.5,
            pending: 0.5,
            rejected: 0.0,
        }
    }
}

/// Synthetic event generation settings
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub interval: Duration,
    pub amount_min: f64,
    pub amount_max: f64,
    pub status_weights: StatusWeights,
    /// Stop after this many events; run until interrupted when unset
    pub max_events: Option<u64>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            amount_min: 1000.0,
            amount_max: 20000.0,
            status_weights: StatusWeights::default(),
            max_events: None,
        }
    }
}

impl ProducerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            interval: Duration::from_millis(parse_or(
                "PRODUCER_INTERVAL_MS",
                defaults.interval.as_millis() as u64,
            )?),
            amount_min: parse_or("PRODUCER_AMOUNT_MIN", defaults.amount_min)?,
            amount_max: parse_or("PRODUCER_AMOUNT_MAX", defaults.amount_max)?,
            status_weights: StatusWeights {
                approved: parse_or(
                    "PRODUCER_WEIGHT_APPROVED",
                    defaults.status_weights.approved,
                )?,
                pending: parse_or("PRODUCER_WEIGHT_PENDING", defaults.status_weights.pending)?,
                rejected: parse_or(
                    "PRODUCER_WEIGHT_REJECTED",
                    defaults.status_weights.rejected,
                )?,
            },
            max_events: optional("PRODUCER_MAX_EVENTS")
                .map(|raw| parse_value("PRODUCER_MAX_EVENTS", &raw))
                .transpose()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.amount_min.is_finite() && self.amount_min >= MIN_AMOUNT) {
            return Err(ConfigError::invalid(
                "PRODUCER_AMOUNT_MIN",
                format!("must be a number of at least {}", MIN_AMOUNT),
            ));
        }
        if !(self.amount_max.is_finite() && self.amount_max >= self.amount_min) {
            return Err(ConfigError::invalid(
                "PRODUCER_AMOUNT_MAX",
                "must be at least PRODUCER_AMOUNT_MIN",
            ));
        }
        if self.amount_max > MAX_AMOUNT {
            return Err(ConfigError::invalid(
                "PRODUCER_AMOUNT_MAX",
                format!("must not exceed {}", MAX_AMOUNT),
            ));
        }
        if self.max_events == Some(0) {
            return Err(ConfigError::invalid(
                "PRODUCER_MAX_EVENTS",
                "must be greater than zero; leave unset to run until interrupted",
            ));
        }
        let weights = self.status_weights;
        let all = [weights.approved, weights.pending, weights.rejected];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::invalid(
                "PRODUCER_WEIGHT_*",
                "weights must be non-negative numbers",
            ));
        }
        if all.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::invalid(
                "PRODUCER_WEIGHT_*",
                "at least one status weight must be positive",
            ));
        }
        Ok(())
    }
}

/// Build the store pool configuration from `DATABASE_URL` or its parts
pub fn store_config_from_env(service_name: &str) -> Result<DbConfig, ConfigError> {
    let target = match optional("DATABASE_URL") {
        Some(url) => ConnectTarget::Url(url),
        None => ConnectTarget::Params {
            host: required("LOAN_DB_HOST")?,
            port: parse_or("LOAN_DB_PORT", 5432u16)?,
            database: required("LOAN_DB_NAME")?,
            user: required("LOAN_DB_USER")?,
            password: required("LOAN_DB_PASSWORD")?,
        },
    };

    let mut config = DbConfig::new(service_name, target);
    config.max_connections = parse_or("DB_MAX_CONNECTIONS", config.max_connections)?;
    config.min_connections = parse_or("DB_MIN_CONNECTIONS", config.min_connections)?;
    config.acquire_timeout_secs = parse_or("DB_ACQUIRE_TIMEOUT_SECS", config.acquire_timeout_secs)?;
    config.connect_timeout_secs = parse_or("DB_CONNECT_TIMEOUT_SECS", config.connect_timeout_secs)?;

    config
        .validate()
        .map_err(|reason| ConfigError::invalid("DB_*", reason))?;
    config
        .target
        .connect_options()
        .map_err(|e| ConfigError::invalid("DATABASE_URL", e.to_string()))?;

    Ok(config)
}

fn retry_from_env() -> Result<RetryConfig, ConfigError> {
    let defaults = RetryConfig::default();
    let retry = RetryConfig {
        max_retries: parse_or("PERSIST_MAX_RETRIES", defaults.max_retries)?,
        initial_backoff: Duration::from_millis(parse_or(
            "PERSIST_INITIAL_BACKOFF_MS",
            defaults.initial_backoff.as_millis() as u64,
        )?),
        max_backoff: Duration::from_millis(parse_or(
            "PERSIST_MAX_BACKOFF_MS",
            defaults.max_backoff.as_millis() as u64,
        )?),
        ..defaults
    };
    if retry.max_backoff < retry.initial_backoff {
        return Err(ConfigError::invalid(
            "PERSIST_MAX_BACKOFF_MS",
            "must be at least PERSIST_INITIAL_BACKOFF_MS",
        ));
    }
    Ok(retry)
}

/// Full consumer configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub store: DbConfig,
    pub delivery: DeliveryGuarantee,
    pub retry: RetryConfig,
    /// Upper bound on a single store write
    pub persist_timeout: Duration,
    pub run_migrations: bool,
    pub metrics_port: u16,
}

impl Config {
    pub fn from_env(service_name: &str) -> Result<Self, ConfigError> {
        let config = Self {
            kafka: KafkaConfig::from_env()?,
            store: store_config_from_env(service_name)?,
            delivery: parse_or("DELIVERY_GUARANTEE", DeliveryGuarantee::Idempotent)?,
            retry: retry_from_env()?,
            persist_timeout: Duration::from_millis(parse_or("PERSIST_TIMEOUT_MS", 10_000u64)?),
            run_migrations: parse_bool_or("RUN_MIGRATIONS", true)?,
            metrics_port: parse_or("METRICS_PORT", 9100u16)?,
        };

        if config.persist_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "PERSIST_TIMEOUT_MS",
                "must be greater than zero",
            ));
        }

        Ok(config)
    }
}

/// Non-empty value of `key`
fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(key: &str) -> Result<String, ConfigError> {
    optional(key).ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>()
        .map_err(|e| ConfigError::invalid(key, format!("'{}': {}", raw, e)))
}

fn parse_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match optional(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_bool_or(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional(key) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::invalid(key, format!("'{}' is not a boolean", raw))),
        },
    }
}
