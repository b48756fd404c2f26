//! Loan event consumer
//!
//! Polls the bus, decodes each message, writes it through the sink and
//! commits according to the configured [`DeliveryGuarantee`]. One message is
//! handled at a time; a failing message never stops the loop.

use crate::config::{Config, DeliveryGuarantee};
use crate::error::{DeserializationError, PersistenceError, TransportError};
use crate::metrics::ConsumerMetrics;
use crate::models::LoanEvent;
use crate::services::dead_letter::{DeadLetterRecord, DeadLetterSink};
use crate::services::sink::EventSink;
use crate::services::source::{EventSource, MessagePosition, SourceMessage};
use resilience::{with_retry_if, RetryConfig, RetryError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Runtime knobs for the poll loop
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub poll_timeout: Duration,
    /// Pause after a transport error
    pub error_backoff: Duration,
    /// Upper bound on a single sink write
    pub persist_timeout: Duration,
    pub delivery: DeliveryGuarantee,
    pub retry: RetryConfig,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
            persist_timeout: Duration::from_secs(10),
            delivery: DeliveryGuarantee::Idempotent,
            retry: RetryConfig::default(),
        }
    }
}

impl From<&Config> for ConsumerSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_timeout: config.kafka.poll_timeout,
            error_backoff: config.kafka.error_backoff,
            persist_timeout: config.persist_timeout,
            delivery: config.delivery,
            retry: config.retry.clone(),
        }
    }
}

/// What happened to a single message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Row written
    Persisted,
    /// A row with this loan_id already existed
    AlreadyPersisted,
    /// Payload rejected and logged
    Malformed,
    /// Handed to the dead-letter topic
    DeadLettered,
    /// Could not be written and no dead-letter copy exists. The offset is
    /// not committed, but the next committed message on the partition moves
    /// past it, so the event is lost for good.
    Dropped,
}

/// Result of one poll iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Poll timed out with no message
    Idle,
    /// The bus client reported an error; the loop backs off and continues
    TransportError,
    Handled(MessageOutcome),
}

pub struct LoanEventConsumer<S, K> {
    source: S,
    sink: K,
    settings: ConsumerSettings,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    metrics: ConsumerMetrics,
}

impl<S, K> LoanEventConsumer<S, K>
where
    S: EventSource,
    K: EventSink,
{
    pub fn new(source: S, sink: K, settings: ConsumerSettings) -> Self {
        Self {
            source,
            sink,
            settings,
            dead_letter: None,
            metrics: ConsumerMetrics::new(),
        }
    }

    /// Route messages the consumer gives up on to `dead_letter`
    pub fn with_dead_letter(mut self, dead_letter: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter = Some(dead_letter);
        self
    }

    pub fn metrics(&self) -> &ConsumerMetrics {
        &self.metrics
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped
    ///
    /// Shutdown only interrupts waiting on the bus or the transport error
    /// backoff. A message already taken off the bus is handled to completion
    /// first.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            delivery = self.settings.delivery.as_str(),
            poll_timeout_ms = self.settings.poll_timeout.as_millis() as u64,
            max_retries = self.settings.retry.max_retries,
            dead_letter = self.dead_letter.is_some(),
            "Starting loan event consumer"
        );
        self.metrics.consumer_running.set(1);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                polled = self.source.poll(self.settings.poll_timeout) => polled,
            };

            if self.handle_polled(polled).await == PollOutcome::TransportError {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.error_backoff) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.consumer_running.set(0);
        info!(
            received = self.metrics.messages_received_total.get(),
            persisted = self.metrics.events_persisted_total.get(),
            "Loan event consumer stopped"
        );
    }

    /// One poll iteration without shutdown handling, including the backoff
    /// after a transport error
    pub async fn poll_once(&mut self) -> PollOutcome {
        let polled = self.source.poll(self.settings.poll_timeout).await;
        let outcome = self.handle_polled(polled).await;
        if outcome == PollOutcome::TransportError {
            tokio::time::sleep(self.settings.error_backoff).await;
        }
        outcome
    }

    async fn handle_polled(
        &mut self,
        polled: Result<Option<SourceMessage>, TransportError>,
    ) -> PollOutcome {
        match polled {
            Ok(None) => PollOutcome::Idle,
            Ok(Some(message)) => PollOutcome::Handled(self.handle_message(message).await),
            Err(e) => {
                self.metrics.transport_errors_total.inc();
                error!(
                    error = %e,
                    backoff_ms = self.settings.error_backoff.as_millis() as u64,
                    "Kafka consumer error, continuing to poll"
                );
                PollOutcome::TransportError
            }
        }
    }

    async fn handle_message(&mut self, message: SourceMessage) -> MessageOutcome {
        self.metrics.messages_received_total.inc();
        let position = message.position.clone();
        debug!(position = %position, "Received loan event message");

        let decoded = message
            .payload
            .as_deref()
            .ok_or(DeserializationError::EmptyPayload)
            .and_then(LoanEvent::from_payload);

        let event = match decoded {
            Ok(event) => event,
            Err(e) => {
                self.metrics.messages_malformed_total.inc();
                warn!(position = %position, error = %e, "Skipping malformed loan event");

                let record = DeadLetterRecord::malformed(&message, &e);
                let outcome = if self.send_to_dead_letter(&record).await {
                    MessageOutcome::DeadLettered
                } else {
                    MessageOutcome::Malformed
                };
                // Redelivery cannot fix a bad payload
                self.commit(&position);
                return outcome;
            }
        };

        match self.persist_with_retry(&event).await {
            Ok(()) => {
                self.metrics.events_persisted_total.inc();
                info!(
                    loan_id = %event.loan_id,
                    status = %event.status,
                    amount = event.amount,
                    position = %position,
                    "Persisted loan event"
                );
                self.commit(&position);
                MessageOutcome::Persisted
            }
            Err(RetryError::Permanent {
                error: PersistenceError::Duplicate(_),
                ..
            }) => {
                self.metrics.events_duplicate_total.inc();
                info!(
                    loan_id = %event.loan_id,
                    position = %position,
                    "Loan event already persisted, skipping"
                );
                self.commit(&position);
                MessageOutcome::AlreadyPersisted
            }
            Err(err) => {
                self.metrics.persist_failures_total.inc();
                let attempts = err.attempts();
                let exhausted = err.is_exhausted();
                let error = err.into_inner();
                error!(
                    loan_id = %event.loan_id,
                    position = %position,
                    attempts,
                    exhausted,
                    error = %error,
                    "Failed to persist loan event"
                );

                let record = DeadLetterRecord::persist_failed(&message, &event, &error, attempts);
                if self.send_to_dead_letter(&record).await {
                    self.commit(&position);
                    MessageOutcome::DeadLettered
                } else {
                    self.metrics.events_dropped_total.inc();
                    warn!(
                        loan_id = %event.loan_id,
                        position = %position,
                        "Permanently dropping loan event"
                    );
                    MessageOutcome::Dropped
                }
            }
        }
    }

    async fn persist_with_retry(&self, event: &LoanEvent) -> Result<(), RetryError<PersistenceError>> {
        let sink = &self.sink;
        let timeout = self.settings.persist_timeout;

        with_retry_if(&self.settings.retry, PersistenceError::is_transient, || async move {
            match tokio::time::timeout(timeout, sink.persist(event)).await {
                Ok(result) => result,
                Err(_) => Err(PersistenceError::Unavailable(format!(
                    "write timed out after {}ms",
                    timeout.as_millis()
                ))),
            }
        })
        .await
    }

    async fn send_to_dead_letter(&self, record: &DeadLetterRecord) -> bool {
        let Some(dead_letter) = &self.dead_letter else {
            return false;
        };

        match dead_letter.send(record).await {
            Ok(()) => {
                self.metrics.messages_dead_lettered_total.inc();
                warn!(
                    reason = ?record.reason,
                    source_topic = %record.source_topic,
                    offset = record.offset,
                    "Message sent to dead-letter topic"
                );
                true
            }
            Err(e) => {
                error!(
                    reason = ?record.reason,
                    offset = record.offset,
                    error = %e,
                    "Failed to publish dead-letter record"
                );
                false
            }
        }
    }

    fn commit(&mut self, position: &MessagePosition) {
        if !self.settings.delivery.commits_after_persist() {
            return;
        }

        if let Err(e) = self.source.commit(position) {
            self.metrics.commit_failures_total.inc();
            warn!(position = %position, error = %e, "Offset commit failed");
        }
    }
}
