//! Synthetic loan event producer
//!
//! Generates random loan events on a fixed cadence and submits them to the
//! bus. Submission is fire-and-forget: the broker acknowledgement is only
//! logged, and a failed event is never resent.

use crate::config::{KafkaConfig, ProducerConfig};
use crate::error::{ConfigError, PublishError, TransportError};
use crate::models::{LoanEvent, LoanStatus};
use chrono::Utc;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Random event factory
pub struct LoanEventGenerator<R = StdRng> {
    amount_min: f64,
    amount_max: f64,
    statuses: [LoanStatus; 3],
    weights: WeightedIndex<f64>,
    rng: R,
}

impl LoanEventGenerator<StdRng> {
    pub fn new(config: &ProducerConfig) -> Result<Self, ConfigError> {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl<R: Rng> LoanEventGenerator<R> {
    pub fn with_rng(config: &ProducerConfig, rng: R) -> Result<Self, ConfigError> {
        config.validate()?;

        let statuses = LoanStatus::ALL;
        let w = config.status_weights;
        let weights = WeightedIndex::new([w.approved, w.pending, w.rejected])
            .map_err(|e| ConfigError::invalid("PRODUCER_WEIGHT_*", e.to_string()))?;

        Ok(Self {
            amount_min: config.amount_min,
            amount_max: config.amount_max,
            statuses,
            weights,
            rng,
        })
    }

    pub fn generate_event(&mut self) -> LoanEvent {
        self.generate_event_at(Utc::now().timestamp())
    }

    /// Fresh ids, amount rounded to cents within bounds, weighted status
    pub fn generate_event_at(&mut self, timestamp: i64) -> LoanEvent {
        let raw = self.rng.gen_range(self.amount_min..=self.amount_max);
        let amount = ((raw * 100.0).round() / 100.0).clamp(self.amount_min, self.amount_max);
        let status = self.statuses[self.weights.sample(&mut self.rng)];

        LoanEvent {
            loan_id: Uuid::new_v4().to_string(),
            user_id: Uuid::new_v4().to_string(),
            amount,
            status,
            timestamp,
        }
    }
}

/// Anything that accepts events for asynchronous delivery
pub trait EventPublisher: Send + Sync {
    /// Submit without waiting for the broker
    fn publish(&self, event: &LoanEvent) -> Result<(), PublishError>;

    /// Wait for in-flight deliveries
    fn flush(&self, _timeout: Duration) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Kafka publisher keyed by `loan_id`
pub struct KafkaLoanEventProducer {
    producer: FutureProducer,
    topic: String,
}

impl KafkaLoanEventProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, TransportError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "30000")
            .set("queue.buffering.max.ms", "5")
            .create()
            .map_err(|e| {
                error!("Failed to create Kafka producer: {}", e);
                TransportError::Kafka(e)
            })?;

        info!(brokers = %config.brokers, topic = %config.topic, "Kafka producer created");

        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }
}

impl EventPublisher for KafkaLoanEventProducer {
    fn publish(&self, event: &LoanEvent) -> Result<(), PublishError> {
        let payload = event.to_payload()?;
        let record = FutureRecord::to(&self.topic)
            .key(&event.loan_id)
            .payload(&payload);

        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| PublishError::Kafka(e))?;

        let topic = self.topic.clone();
        let loan_id = event.loan_id.clone();
        tokio::spawn(async move {
            let outcome = match delivery.await {
                Ok(Ok((partition, offset))) => Ok((partition, offset)),
                Ok(Err((e, _))) => Err(e.to_string()),
                Err(_) => Err("delivery cancelled before acknowledgement".to_string()),
            };
            log_delivery(&topic, &loan_id, &outcome);
        });

        Ok(())
    }

    fn flush(&self, timeout: Duration) -> Result<(), PublishError> {
        self.producer.flush(timeout).map_err(PublishError::Kafka)
    }
}

fn log_delivery(topic: &str, loan_id: &str, outcome: &Result<(i32, i64), String>) {
    match outcome {
        Ok((partition, offset)) => {
            info!(
                topic = %topic,
                partition = *partition,
                offset = *offset,
                loan_id = %loan_id,
                "Message delivered"
            );
        }
        Err(reason) => {
            error!(topic = %topic, loan_id = %loan_id, error = %reason, "Message delivery failed");
        }
    }
}

/// Totals for one producer run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProducerStats {
    pub published: u64,
    pub failed: u64,
}

impl ProducerStats {
    pub fn attempted(&self) -> u64 {
        self.published + self.failed
    }
}

/// Generate and submit events until shutdown or `max_events`
///
/// A failed submission is logged and counted; the loop keeps going.
pub async fn run_producer<P, R>(
    generator: &mut LoanEventGenerator<R>,
    publisher: &P,
    config: &ProducerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> ProducerStats
where
    P: EventPublisher,
    R: Rng,
{
    let mut stats = ProducerStats::default();
    info!(
        interval_ms = config.interval.as_millis() as u64,
        max_events = ?config.max_events,
        "Starting loan event producer"
    );

    let reached_cap = |stats: &ProducerStats| {
        config
            .max_events
            .is_some_and(|max| stats.attempted() >= max)
    };

    loop {
        if *shutdown.borrow() || reached_cap(&stats) {
            break;
        }

        let event = generator.generate_event();
        match publisher.publish(&event) {
            Ok(()) => {
                stats.published += 1;
                debug!(
                    loan_id = %event.loan_id,
                    status = %event.status,
                    amount = event.amount,
                    "Submitted loan event"
                );
            }
            Err(e) => {
                stats.failed += 1;
                error!(loan_id = %event.loan_id, error = %e, "Failed to submit loan event");
            }
        }

        if reached_cap(&stats) {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    if let Err(e) = publisher.flush(FLUSH_TIMEOUT) {
        warn!(error = %e, "Producer flush did not complete");
    }

    info!(
        published = stats.published,
        failed = stats.failed,
        "Loan event producer stopped"
    );
    stats
}
