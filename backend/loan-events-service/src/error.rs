use rdkafka::error::KafkaError;
use thiserror::Error;

/// Startup configuration problems. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(String),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Message bus failures while polling or committing
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Transport error: {0}")]
    Other(String),
}

/// Failures submitting an event to the bus
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Kafka rejected message: {0}")]
    Kafka(#[from] KafkaError),
}

/// A polled payload that is not a valid loan event
#[derive(Debug, Error)]
pub enum DeserializationError {
    #[error("Message has no payload")]
    EmptyPayload,

    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid loan event: {0}")]
    Invalid(String),
}

/// Store write failures, classified by whether retrying can help
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Loan event {0} already persisted")]
    Duplicate(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Store error: {0}")]
    Other(String),
}

/// Broad SQLSTATE classes relevant to a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlStateClass {
    UniqueViolation,
    DataRejected,
    Unavailable,
    Other,
}

/// Classify a Postgres SQLSTATE code
pub fn classify_sqlstate(code: &str) -> SqlStateClass {
    match code {
        "23505" => SqlStateClass::UniqueViolation,
        // 22: data exception, 23: integrity constraint violation
        c if c.starts_with("22") || c.starts_with("23") => SqlStateClass::DataRejected,
        // 08: connection exception, 53: insufficient resources, 57: operator intervention
        c if c.starts_with("08") || c.starts_with("53") || c.starts_with("57") => {
            SqlStateClass::Unavailable
        }
        _ => SqlStateClass::Other,
    }
}

impl PersistenceError {
    /// Convert a sqlx error raised while writing `loan_id`
    pub fn from_sqlx(err: sqlx::Error, loan_id: &str) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_) => PersistenceError::Unavailable(err.to_string()),
            sqlx::Error::Database(db_err) => {
                let class = db_err
                    .code()
                    .map(|code| classify_sqlstate(&code))
                    .unwrap_or(SqlStateClass::Other);
                match class {
                    SqlStateClass::UniqueViolation => {
                        PersistenceError::Duplicate(loan_id.to_string())
                    }
                    SqlStateClass::DataRejected => {
                        PersistenceError::Constraint(db_err.message().to_string())
                    }
                    SqlStateClass::Unavailable => PersistenceError::Unavailable(err.to_string()),
                    SqlStateClass::Other => PersistenceError::Other(err.to_string()),
                }
            }
            _ => PersistenceError::Other(err.to_string()),
        }
    }

    /// Whether a later attempt could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, PersistenceError::Unavailable(_))
    }
}
