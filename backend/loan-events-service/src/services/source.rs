use crate::config::{DeliveryGuarantee, KafkaConfig};
use crate::error::TransportError;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info};

/// Location of a message on the bus
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessagePosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for MessagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// A polled message, detached from the client that produced it
#[derive(Debug, Clone)]
pub struct SourceMessage {
    pub position: MessagePosition,
    pub payload: Option<Vec<u8>>,
}

/// Where the consumer pulls raw events from
#[async_trait]
pub trait EventSource: Send {
    /// Wait up to `timeout` for the next message. `Ok(None)` means nothing
    /// arrived in time.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<SourceMessage>, TransportError>;

    /// Mark everything up to and including `position` as consumed
    fn commit(&mut self, position: &MessagePosition) -> Result<(), TransportError>;
}

/// Kafka-backed event source subscribed to the loan topic
pub struct KafkaEventSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaEventSource {
    /// Create the consumer and subscribe. Auto-commit is only enabled for
    /// [`DeliveryGuarantee::BestEffort`].
    pub fn new(config: &KafkaConfig, delivery: DeliveryGuarantee) -> Result<Self, TransportError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", &config.brokers)
            .set("auto.offset.reset", config.offset_reset.as_str())
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false");

        if delivery.commits_after_persist() {
            client_config.set("enable.auto.commit", "false");
        } else {
            client_config
                .set("enable.auto.commit", "true")
                .set(
                    "auto.commit.interval.ms",
                    config.auto_commit_interval.as_millis().to_string(),
                );
        }

        let consumer: StreamConsumer = client_config.create().map_err(|e| {
            error!("Failed to create Kafka consumer: {}", e);
            TransportError::Kafka(e)
        })?;

        consumer.subscribe(&[config.topic.as_str()]).map_err(|e| {
            error!(topic = %config.topic, "Failed to subscribe to topic: {}", e);
            TransportError::Kafka(e)
        })?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            delivery = delivery.as_str(),
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<SourceMessage>, TransportError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(TransportError::Kafka(e)),
            Ok(Ok(msg)) => Ok(Some(SourceMessage {
                position: MessagePosition {
                    topic: msg.topic().to_string(),
                    partition: msg.partition(),
                    offset: msg.offset(),
                },
                payload: msg.payload().map(<[u8]>::to_vec),
            })),
        }
    }

    fn commit(&mut self, position: &MessagePosition) -> Result<(), TransportError> {
        let mut tpl = TopicPartitionList::new();
        // Committed offset is the next one to read
        tpl.add_partition_offset(
            &position.topic,
            position.partition,
            Offset::Offset(position.offset + 1),
        )?;
        self.consumer.commit(&tpl, CommitMode::Async)?;

        debug!(topic = %self.topic, position = %position, "Committed offset");
        Ok(())
    }
}
