//! Publishes synthetic loan events to Kafka until interrupted
//!
//! ```bash
//! KAFKA_BROKERS=localhost:9092 cargo run --bin loan-producer
//! ```

use anyhow::{Context, Result};
use loan_events_service::config::{KafkaConfig, ProducerConfig};
use loan_events_service::services::{run_producer, KafkaLoanEventProducer, LoanEventGenerator};
use loan_events_service::telemetry::{init_tracing, shutdown_channel};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("info,loan_events_service=debug,loan_producer=debug");

    let kafka = KafkaConfig::from_env().context("Invalid Kafka configuration")?;
    let config = ProducerConfig::from_env().context("Invalid producer configuration")?;

    info!(
        topic = %kafka.topic,
        amount_min = config.amount_min,
        amount_max = config.amount_max,
        "Starting loan-producer"
    );

    let publisher = KafkaLoanEventProducer::new(&kafka).context("Failed to create Kafka producer")?;
    let mut generator = LoanEventGenerator::new(&config)?;

    let stats = run_producer(&mut generator, &publisher, &config, shutdown_channel()).await;

    info!(
        published = stats.published,
        failed = stats.failed,
        "loan-producer exiting"
    );
    Ok(())
}
