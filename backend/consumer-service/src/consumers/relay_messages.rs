//! Relay messages consumer
//!
//! Reads the relay topic with auto-commit disabled and hands every
//! delivery to the partition dispatcher. Offsets are committed by the
//! partition workers once a record of the outcome is durable.

use super::dispatcher::{Delivery, PartitionControl, PartitionDispatcher};
use crate::config::ConsumerConfig;
use crate::error::SeekError;
use chrono::Utc;
use idempotent_consumer::{AckError, DeduplicatingProcessor, DeliveryContext, InboundPayload};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

const SEEK_TIMEOUT: Duration = Duration::from_secs(1);

/// Decode a broker message and capture where and when it was received
pub fn decode_delivery<M: Message>(message: &M, consumer_group: &str) -> Delivery {
    let context = DeliveryContext {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        consumer_group: consumer_group.to_string(),
        received_at: Utc::now(),
        key: message
            .key()
            .and_then(|key| std::str::from_utf8(key).ok())
            .map(str::to_string),
    };

    Delivery {
        payload: InboundPayload::decode(message.payload()),
        context,
    }
}

/// [`PartitionControl`] backed by the consumer's own group membership
pub struct KafkaPartitionControl {
    consumer: Arc<StreamConsumer>,
}

impl KafkaPartitionControl {
    pub fn new(consumer: Arc<StreamConsumer>) -> Self {
        Self { consumer }
    }
}

impl PartitionControl for KafkaPartitionControl {
    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), AckError> {
        // the committed offset is the next one to read
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| AckError(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| AckError(e.to_string()))
    }

    fn rewind(&self, topic: &str, partition: i32, offset: i64) -> Result<(), SeekError> {
        self.consumer
            .seek(topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
            .map_err(|e| SeekError(e.to_string()))
    }
}

pub struct RelayMessageConsumer {
    consumer: Arc<StreamConsumer>,
    dispatcher: PartitionDispatcher,
    group_id: String,
    topic: String,
}

impl RelayMessageConsumer {
    pub fn new(
        config: &ConsumerConfig,
        processor: Arc<DeduplicatingProcessor>,
    ) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = config.consumer_client_config().create()?;
        consumer.subscribe(&[config.kafka.topic.as_str()])?;

        let consumer = Arc::new(consumer);
        let control = Arc::new(KafkaPartitionControl::new(Arc::clone(&consumer)));
        let dispatcher = PartitionDispatcher::new(processor, control, config.concurrency);

        Ok(Self {
            consumer,
            dispatcher,
            group_id: config.group_id.clone(),
            topic: config.kafka.topic.clone(),
        })
    }

    /// Run the receive loop until `shutdown` flips to true, then drain the
    /// partition workers
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            topic = %self.topic,
            group = %self.group_id,
            "Starting relay messages consumer"
        );

        let consumer = Arc::clone(&self.consumer);
        let group_id = self.group_id.clone();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = async {
                    consumer
                        .recv()
                        .await
                        .map(|message| decode_delivery(&message, &group_id))
                } => match received {
                    Ok(delivery) => self.dispatcher.dispatch(delivery).await,
                    Err(e) => {
                        error!(error = %e, "Kafka receive error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        info!(
            partitions = self.dispatcher.active_partitions(),
            "Stopping relay messages consumer, draining partition workers"
        );
        self.dispatcher.shutdown().await;
        info!("Relay messages consumer stopped");
    }
}
