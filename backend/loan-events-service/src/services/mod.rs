pub mod consumer;
pub mod dead_letter;
pub mod producer;
pub mod read_model;
pub mod sink;
pub mod source;

pub use consumer::{ConsumerSettings, LoanEventConsumer, MessageOutcome, PollOutcome};
pub use dead_letter::{DeadLetterReason, DeadLetterRecord, DeadLetterSink, KafkaDeadLetterProducer};
pub use producer::{
    run_producer, EventPublisher, KafkaLoanEventProducer, LoanEventGenerator, ProducerStats,
};
pub use read_model::{LoanReadModel, LoanSummary, StatusTotals};
pub use sink::{EventSink, PgLoanEventSink, WriteMode};
pub use source::{EventSource, KafkaEventSource, MessagePosition, SourceMessage};
