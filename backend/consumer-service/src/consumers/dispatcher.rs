//! Per-partition sequential processing
//!
//! Every assigned partition gets its own worker task fed through a bounded
//! channel, so deliveries of one partition are processed and acknowledged
//! strictly in offset order. Different partitions run independently; a
//! shared semaphore caps how many of them are inside the processor at once.
//!
//! Offset commits are cumulative. When a delivery ends up unrecorded the
//! worker seeks the partition back to it and drops the deliveries already
//! queued behind it until the broker hands it out again, so a later
//! acknowledgment never commits past it. Consecutive rewinds back off
//! exponentially; the worker keeps its permit while it waits.

use crate::error::SeekError;
use idempotent_consumer::{
    AckError, AckHandle, DeduplicatingProcessor, DeliveryContext, InboundPayload,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

const PARTITION_QUEUE_DEPTH: usize = 256;

/// Released after this long even if the rewound offset never came back,
/// e.g. because the partition moved to another consumer in between
pub const REWIND_HOLD_LIMIT: Duration = Duration::from_secs(60);

pub const REWIND_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
pub const REWIND_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// One decoded delivery waiting for its partition worker
#[derive(Debug, Clone)]
pub struct Delivery {
    pub payload: InboundPayload,
    pub context: DeliveryContext,
}

/// Offset control for the partitions this consumer owns
pub trait PartitionControl: Send + Sync {
    /// Commit everything up to and including `offset`
    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), AckError>;

    /// Move the fetch position so `offset` is delivered again
    fn rewind(&self, topic: &str, partition: i32, offset: i64) -> Result<(), SeekError>;
}

struct OffsetAck<'a> {
    control: &'a dyn PartitionControl,
    context: &'a DeliveryContext,
}

impl AckHandle for OffsetAck<'_> {
    fn acknowledge(&self) -> Result<(), AckError> {
        self.control.commit(
            &self.context.topic,
            self.context.partition,
            self.context.offset,
        )
    }
}

/// Filters a partition's queue after a rewind
#[derive(Debug, Default)]
pub(crate) struct RedeliveryGate {
    held: Option<(i64, Instant)>,
}

impl RedeliveryGate {
    /// Deliveries past the rewound offset are dropped until it shows up again
    pub(crate) fn admit(&mut self, offset: i64, now: Instant) -> bool {
        let Some((target, since)) = self.held else {
            return true;
        };

        if offset == target {
            self.held = None;
            return true;
        }
        if offset < target {
            return true;
        }
        if now.duration_since(since) >= REWIND_HOLD_LIMIT {
            warn!(
                rewound_offset = target,
                offset, "Rewound offset never redelivered, releasing partition"
            );
            self.held = None;
            return true;
        }
        false
    }

    pub(crate) fn hold_from(&mut self, offset: i64, now: Instant) {
        self.held = Some((offset, now));
    }
}

/// Delay before each rewind, doubling until an outcome is acknowledged
#[derive(Debug)]
pub(crate) struct RewindBackoff {
    next: Duration,
}

impl Default for RewindBackoff {
    fn default() -> Self {
        Self {
            next: REWIND_BACKOFF_INITIAL,
        }
    }
}

impl RewindBackoff {
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(REWIND_BACKOFF_MAX);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.next = REWIND_BACKOFF_INITIAL;
    }
}

pub struct PartitionDispatcher {
    processor: Arc<DeduplicatingProcessor>,
    control: Arc<dyn PartitionControl>,
    permits: Arc<Semaphore>,
    workers: HashMap<(String, i32), mpsc::Sender<Delivery>>,
    tasks: JoinSet<()>,
}

impl PartitionDispatcher {
    /// `concurrency` is the number of partitions processed at the same time
    pub fn new(
        processor: Arc<DeduplicatingProcessor>,
        control: Arc<dyn PartitionControl>,
        concurrency: usize,
    ) -> Self {
        Self {
            processor,
            control,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            workers: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn active_partitions(&self) -> usize {
        self.workers.len()
    }

    /// Queue a delivery behind earlier ones of the same partition. Waits
    /// when that partition's queue is full.
    pub async fn dispatch(&mut self, delivery: Delivery) {
        let key = (delivery.context.topic.clone(), delivery.context.partition);
        let sender = match self.workers.get(&key) {
            Some(sender) => sender.clone(),
            None => {
                let sender = self.spawn_worker(&key.0, key.1);
                self.workers.insert(key.clone(), sender.clone());
                sender
            }
        };

        if let Err(mpsc::error::SendError(delivery)) = sender.send(delivery).await {
            error!(
                topic = %delivery.context.topic,
                partition = delivery.context.partition,
                offset = delivery.context.offset,
                "Partition worker gone, delivery left unacknowledged"
            );
            self.workers.remove(&key);
        }
    }

    /// Close every queue and wait for the workers to drain them
    pub async fn shutdown(mut self) {
        self.workers.clear();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Partition worker terminated abnormally");
            }
        }
    }

    fn spawn_worker(&mut self, topic: &str, partition: i32) -> mpsc::Sender<Delivery> {
        let (tx, rx) = mpsc::channel(PARTITION_QUEUE_DEPTH);
        debug!(topic, partition, "Starting partition worker");
        self.tasks.spawn(run_partition_worker(
            rx,
            Arc::clone(&self.processor),
            Arc::clone(&self.control),
            Arc::clone(&self.permits),
        ));
        tx
    }
}

async fn run_partition_worker(
    mut rx: mpsc::Receiver<Delivery>,
    processor: Arc<DeduplicatingProcessor>,
    control: Arc<dyn PartitionControl>,
    permits: Arc<Semaphore>,
) {
    let mut gate = RedeliveryGate::default();
    let mut backoff = RewindBackoff::default();

    while let Some(Delivery { payload, context }) = rx.recv().await {
        if !gate.admit(context.offset, Instant::now()) {
            debug!(
                topic = %context.topic,
                partition = context.partition,
                offset = context.offset,
                "Dropping delivery queued behind a rewind"
            );
            continue;
        }

        let Ok(_permit) = permits.acquire().await else {
            break;
        };

        let ack = OffsetAck {
            control: control.as_ref(),
            context: &context,
        };
        let outcome = processor.process(payload, &context, &ack).await;
        if outcome.is_acknowledged() {
            backoff.reset();
            continue;
        }

        let delay = backoff.next_delay();
        debug!(
            topic = %context.topic,
            partition = context.partition,
            offset = context.offset,
            delay_ms = delay.as_millis() as u64,
            "Backing off before rewind"
        );
        tokio::time::sleep(delay).await;

        match control.rewind(&context.topic, context.partition, context.offset) {
            Ok(()) => {
                warn!(
                    topic = %context.topic,
                    partition = context.partition,
                    offset = context.offset,
                    "Delivery unrecorded, partition rewound for redelivery"
                );
                gate.hold_from(context.offset, Instant::now());
            }
            Err(e) => {
                error!(
                    topic = %context.topic,
                    partition = context.partition,
                    offset = context.offset,
                    error = %e,
                    "Failed to rewind partition, delivery waits for the next rebalance"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_open_by_default() {
        let mut gate = RedeliveryGate::default();
        assert!(gate.admit(0, Instant::now()));
        assert!(gate.admit(42, Instant::now()));
    }

    #[test]
    fn test_gate_drops_offsets_past_rewind_until_redelivered() {
        let now = Instant::now();
        let mut gate = RedeliveryGate::default();
        gate.hold_from(5, now);

        assert!(!gate.admit(6, now));
        assert!(!gate.admit(7, now));
        assert!(gate.admit(4, now));
        assert!(gate.admit(5, now));
        assert!(gate.admit(6, now));
    }

    #[test]
    fn test_backoff_doubles_to_cap_and_resets() {
        let mut backoff = RewindBackoff::default();
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), REWIND_BACKOFF_INITIAL);
    }

    #[test]
    fn test_gate_releases_after_hold_limit() {
        let start = Instant::now();
        let mut gate = RedeliveryGate::default();
        gate.hold_from(5, start);

        assert!(!gate.admit(9, start + Duration::from_secs(1)));
        assert!(gate.admit(9, start + REWIND_HOLD_LIMIT));
        assert!(gate.admit(10, start + REWIND_HOLD_LIMIT));
    }
}
