use delivery_metrics::MetricsAggregator;
use futures::FutureExt;
use producer_service::error::{DeliveryError, SubmissionError};
use producer_service::services::{
    BatchCoordinator, BrokerSender, DeliveryFuture, DeliveryReceipt, Publisher, RateLimiter,
};
use relay_schema::RelayMessage;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TOPIC: &str = "cross-account-messages";

/// In-process broker: records every submission, optionally rejecting some
/// synchronously or failing them on delivery
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<(String, String, RelayMessage)>>,
    /// 1-based sequence numbers rejected at submission
    pub reject_sequences: Vec<u32>,
    /// 1-based sequence numbers that fail on delivery
    pub fail_delivery_sequences: Vec<u32>,
    next_offset: AtomicI64,
}

impl RecordingSender {
    pub fn rejecting(sequences: Vec<u32>) -> Self {
        Self {
            reject_sequences: sequences,
            ..Default::default()
        }
    }

    pub fn failing_delivery(sequences: Vec<u32>) -> Self {
        Self {
            fail_delivery_sequences: sequences,
            ..Default::default()
        }
    }

    pub fn sent_messages(&self) -> Vec<(String, String, RelayMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

impl BrokerSender for RecordingSender {
    fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<DeliveryFuture, SubmissionError> {
        let message = RelayMessage::from_slice(payload)
            .map_err(|e| SubmissionError::Serialization(e.to_string()))?;

        if self.reject_sequences.contains(&message.sequence_number) {
            return Err(SubmissionError::Rejected("simulated rejection".to_string()));
        }

        let fail = self
            .fail_delivery_sequences
            .contains(&message.sequence_number);
        self.sent
            .lock()
            .unwrap()
            .push((topic.to_string(), key.to_string(), message));
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);

        Ok(async move {
            if fail {
                Err(DeliveryError::Broker("simulated delivery failure".to_string()))
            } else {
                Ok(DeliveryReceipt {
                    partition: 0,
                    offset,
                })
            }
        }
        .boxed())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn flush(&self, _timeout: Duration) -> Result<(), DeliveryError> {
        Ok(())
    }
}

pub fn coordinator(sender: Arc<RecordingSender>, rate_limit: i64) -> BatchCoordinator {
    let publisher = Publisher::new(sender, Arc::new(MetricsAggregator::new("producer")));
    BatchCoordinator::new(publisher, RateLimiter::new(rate_limit).unwrap(), TOPIC)
}
