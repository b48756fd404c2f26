//! Loan event ingestion pipeline
//!
//! A synthetic producer publishes JSON loan events to Kafka, a consumer
//! decodes and validates them and persists one row per event into Postgres.
//!
//! - [`services::producer`]: event generation and publishing
//! - [`services::consumer`]: poll loop, retry, commit policy, dead-lettering
//! - [`services::sink`]: Postgres writes over a bounded pool
//! - [`services::read_model`]: summary and recent-event queries

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;
pub mod telemetry;

pub use config::{Config, DeliveryGuarantee, KafkaConfig, ProducerConfig};
pub use models::{LoanEvent, LoanStatus};
