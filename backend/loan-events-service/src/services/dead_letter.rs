use crate::error::TransportError;
use crate::models::LoanEvent;
use crate::services::source::SourceMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Payload could not be decoded or failed validation
    Malformed,
    /// Event was valid but could not be written
    PersistFailed,
}

/// Envelope published to the dead-letter topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub reason: DeadLetterReason,
    pub error: String,
    pub source_topic: String,
    pub partition: i32,
    pub offset: i64,
    pub loan_id: Option<String>,
    /// Original payload, lossily decoded as UTF-8
    pub payload: Option<String>,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn malformed(message: &SourceMessage, error: &dyn std::error::Error) -> Self {
        Self::new(message, DeadLetterReason::Malformed, error.to_string(), None, 1)
    }

    pub fn persist_failed(
        message: &SourceMessage,
        event: &LoanEvent,
        error: &dyn std::error::Error,
        attempts: u32,
    ) -> Self {
        Self::new(
            message,
            DeadLetterReason::PersistFailed,
            error.to_string(),
            Some(event.loan_id.clone()),
            attempts,
        )
    }

    fn new(
        message: &SourceMessage,
        reason: DeadLetterReason,
        error: String,
        loan_id: Option<String>,
        attempts: u32,
    ) -> Self {
        Self {
            reason,
            error,
            source_topic: message.position.topic.clone(),
            partition: message.position.partition,
            offset: message.position.offset,
            loan_id,
            payload: message
                .payload
                .as_deref()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
            attempts,
            failed_at: Utc::now(),
        }
    }

    /// Key used when publishing, so retries of one loan land on one partition
    pub fn key(&self) -> String {
        match &self.loan_id {
            Some(loan_id) => loan_id.clone(),
            None => format!("{}-{}-{}", self.source_topic, self.partition, self.offset),
        }
    }
}

/// Parking place for messages the consumer gave up on
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, record: &DeadLetterRecord) -> Result<(), TransportError>;
}

/// Publishes dead-letter records to a Kafka topic
pub struct KafkaDeadLetterProducer {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
}

impl KafkaDeadLetterProducer {
    pub fn new(brokers: &str, topic: &str) -> Result<Self, TransportError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "30000")
            .set("acks", "all")
            .create()
            .map_err(|e| {
                error!("Failed to create dead-letter producer: {}", e);
                TransportError::Kafka(e)
            })?;

        info!(topic = %topic, "Dead-letter producer ready");

        Ok(Self {
            producer,
            topic: topic.to_string(),
            send_timeout: Duration::from_secs(5),
        })
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterProducer {
    async fn send(&self, record: &DeadLetterRecord) -> Result<(), TransportError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| TransportError::Other(format!("dead-letter serialization: {}", e)))?;
        let key = record.key();

        self.producer
            .send(
                FutureRecord::to(&self.topic).key(&key).payload(&payload),
                self.send_timeout,
            )
            .await
            .map_err(|(e, _)| TransportError::Kafka(e))?;

        Ok(())
    }
}
