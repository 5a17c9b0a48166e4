//! Asynchronous single-message submission
//!
//! [`Publisher::send`] hands a message to the broker client and returns as
//! soon as the client has accepted it. The terminal delivery result is
//! resolved on a spawned task and delivered through a [`PendingOutcome`];
//! callers may drop that handle without affecting delivery or metrics.

use crate::error::{DeliveryError, SubmissionError};
use delivery_metrics::MetricsAggregator;
use futures::future::BoxFuture;
use futures::FutureExt;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use relay_schema::{RelayMessage, SendOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub partition: i32,
    pub offset: i64,
}

pub type DeliveryFuture = BoxFuture<'static, Result<DeliveryReceipt, DeliveryError>>;

/// Broker client seam: `send` must not wait for broker acknowledgment
pub trait BrokerSender: Send + Sync {
    fn send(&self, topic: &str, key: &str, payload: &[u8])
        -> Result<DeliveryFuture, SubmissionError>;

    /// May block on a metadata round-trip
    fn is_connected(&self) -> bool;

    fn flush(&self, timeout: Duration) -> Result<(), DeliveryError>;
}

pub struct KafkaBrokerSender {
    producer: FutureProducer,
    topic: String,
}

impl KafkaBrokerSender {
    pub fn new(client_config: &ClientConfig, topic: impl Into<String>) -> Result<Self, KafkaError> {
        let producer: FutureProducer = client_config.create()?;
        let topic = topic.into();
        info!(topic = %topic, "Kafka producer initialized");
        Ok(Self { producer, topic })
    }
}

impl BrokerSender for KafkaBrokerSender {
    fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<DeliveryFuture, SubmissionError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(err, _)| match err {
                KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull) => {
                    SubmissionError::QueueFull
                }
                other => SubmissionError::Rejected(other.to_string()),
            })?;

        Ok(async move {
            match delivery.await {
                Ok(Ok((partition, offset))) => Ok(DeliveryReceipt { partition, offset }),
                Ok(Err((err, _))) => Err(DeliveryError::Broker(err.to_string())),
                Err(_) => Err(DeliveryError::Canceled),
            }
        }
        .boxed())
    }

    fn is_connected(&self) -> bool {
        self.producer
            .client()
            .fetch_metadata(Some(self.topic.as_str()), Duration::from_millis(500))
            .is_ok()
    }

    fn flush(&self, timeout: Duration) -> Result<(), DeliveryError> {
        self.producer
            .flush(timeout)
            .map_err(|e| DeliveryError::Broker(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Eventual result of one accepted submission
#[derive(Debug)]
pub struct PendingOutcome {
    message_id: String,
    rx: oneshot::Receiver<SendOutcome>,
}

impl PendingOutcome {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub async fn wait(self) -> SendOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::failed(self.message_id, "delivery task dropped"),
        }
    }
}

#[derive(Clone)]
pub struct Publisher {
    sender: Arc<dyn BrokerSender>,
    metrics: Arc<MetricsAggregator>,
}

impl Publisher {
    pub fn new(sender: Arc<dyn BrokerSender>, metrics: Arc<MetricsAggregator>) -> Self {
        Self { sender, metrics }
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// Submit `message` under `key`. Must be called within a Tokio runtime.
    ///
    /// `Err` is a synchronous rejection: counted as a failure, nothing was
    /// sent. `Ok` means the client accepted the message; it is counted as an
    /// attempt and its delivery result later counts as a success or failure.
    pub fn send(
        &self,
        topic: &str,
        key: &str,
        message: &RelayMessage,
    ) -> Result<PendingOutcome, SubmissionError> {
        let submitted = message
            .to_bytes()
            .map_err(|e| SubmissionError::Serialization(e.to_string()))
            .and_then(|payload| self.sender.send(topic, key, &payload));

        let delivery = match submitted {
            Ok(delivery) => delivery,
            Err(e) => {
                self.metrics.record_failure();
                return Err(e);
            }
        };
        self.metrics.record_attempt();

        let (tx, rx) = oneshot::channel();
        let metrics = Arc::clone(&self.metrics);
        let message_id = message.message_id.clone();
        let task_message_id = message_id.clone();

        tokio::spawn(async move {
            let outcome = match delivery.await {
                Ok(receipt) => {
                    metrics.record_success();
                    debug!(
                        message_id = %task_message_id,
                        partition = receipt.partition,
                        offset = receipt.offset,
                        "Message delivered"
                    );
                    SendOutcome::delivered(task_message_id, receipt.partition, receipt.offset)
                }
                Err(e) => {
                    metrics.record_failure();
                    error!(message_id = %task_message_id, error = %e, "Message delivery failed");
                    SendOutcome::failed(task_message_id, e.to_string())
                }
            };
            // nobody waiting is fine
            let _ = tx.send(outcome);
        });

        Ok(PendingOutcome { message_id, rx })
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        let sender = Arc::clone(&self.sender);
        match tokio::task::spawn_blocking(move || sender.is_connected()).await {
            Ok(true) => ConnectionStatus::Connected,
            Ok(false) => ConnectionStatus::Disconnected,
            Err(e) => {
                warn!(error = %e, "Connection check task failed");
                ConnectionStatus::Disconnected
            }
        }
    }

    pub fn flush(&self, timeout: Duration) -> Result<(), DeliveryError> {
        self.sender.flush(timeout)
    }
}
