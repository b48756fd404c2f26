//! Prometheus metrics for the loan event consumer

use prometheus::{Encoder, IntCounter, IntGauge, TextEncoder};

/// Counters for consumer monitoring
#[derive(Clone)]
pub struct ConsumerMetrics {
    /// Messages taken off the bus
    pub messages_received_total: IntCounter,
    /// Events written to the store
    pub events_persisted_total: IntCounter,
    /// Events whose loan_id was already stored
    pub events_duplicate_total: IntCounter,
    /// Payloads that failed decoding or validation
    pub messages_malformed_total: IntCounter,
    /// Events that could not be written after retries
    pub persist_failures_total: IntCounter,
    /// Messages parked on the dead-letter topic
    pub messages_dead_lettered_total: IntCounter,
    /// Events given up on without a dead-letter copy
    pub events_dropped_total: IntCounter,
    /// Poll errors reported by the bus client
    pub transport_errors_total: IntCounter,
    /// Offset commits that failed
    pub commit_failures_total: IntCounter,
    /// 1 while the poll loop is running
    pub consumer_running: IntGauge,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        let registry = prometheus::default_registry();

        let messages_received_total = IntCounter::new(
            "loan_consumer_messages_received_total",
            "Total number of messages received from the loan topic",
        )
        .expect("valid metric for loan_consumer_messages_received_total");

        let events_persisted_total = IntCounter::new(
            "loan_consumer_events_persisted_total",
            "Total number of loan events written to the store",
        )
        .expect("valid metric for loan_consumer_events_persisted_total");

        let events_duplicate_total = IntCounter::new(
            "loan_consumer_events_duplicate_total",
            "Total number of loan events already present in the store",
        )
        .expect("valid metric for loan_consumer_events_duplicate_total");

        let messages_malformed_total = IntCounter::new(
            "loan_consumer_messages_malformed_total",
            "Total number of messages that were not valid loan events",
        )
        .expect("valid metric for loan_consumer_messages_malformed_total");

        let persist_failures_total = IntCounter::new(
            "loan_consumer_persist_failures_total",
            "Total number of loan events that could not be persisted",
        )
        .expect("valid metric for loan_consumer_persist_failures_total");

        let messages_dead_lettered_total = IntCounter::new(
            "loan_consumer_messages_dead_lettered_total",
            "Total number of messages published to the dead-letter topic",
        )
        .expect("valid metric for loan_consumer_messages_dead_lettered_total");

        let events_dropped_total = IntCounter::new(
            "loan_consumer_events_dropped_total",
            "Total number of loan events permanently dropped",
        )
        .expect("valid metric for loan_consumer_events_dropped_total");

        let transport_errors_total = IntCounter::new(
            "loan_consumer_transport_errors_total",
            "Total number of Kafka consumer errors encountered",
        )
        .expect("valid metric for loan_consumer_transport_errors_total");

        let commit_failures_total = IntCounter::new(
            "loan_consumer_commit_failures_total",
            "Total number of failed offset commits",
        )
        .expect("valid metric for loan_consumer_commit_failures_total");

        let consumer_running = IntGauge::new(
            "loan_consumer_running",
            "Loan consumer poll loop status (1 = running, 0 = stopped)",
        )
        .expect("valid metric for loan_consumer_running");

        // Only the first instance per process lands in the default registry
        for metric in [
            Box::new(messages_received_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(events_persisted_total.clone()),
            Box::new(events_duplicate_total.clone()),
            Box::new(messages_malformed_total.clone()),
            Box::new(persist_failures_total.clone()),
            Box::new(messages_dead_lettered_total.clone()),
            Box::new(events_dropped_total.clone()),
            Box::new(transport_errors_total.clone()),
            Box::new(commit_failures_total.clone()),
            Box::new(consumer_running.clone()),
        ] {
            let _ = registry.register(metric);
        }

        Self {
            messages_received_total,
            events_persisted_total,
            events_duplicate_total,
            messages_malformed_total,
            persist_failures_total,
            messages_dead_lettered_total,
            events_dropped_total,
            transport_errors_total,
            commit_failures_total,
            consumer_running,
        }
    }
}

impl Default for ConsumerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Render the default registry in the Prometheus text format
pub fn render() -> Result<(String, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;

    let body = String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("metrics are not UTF-8: {}", e)))?;
    Ok((encoder.format_type().to_string(), body))
}
