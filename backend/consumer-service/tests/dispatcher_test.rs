mod common;

use common::{context, delivery, FlakyRepository, RecordingControl};
use consumer_service::consumers::{Delivery, PartitionDispatcher};
use delivery_metrics::MetricsAggregator;
use idempotent_consumer::{
    ConsumedMessageRepository, DeduplicatingProcessor, InboundPayload, ProcessingStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn dispatcher(
    repository: Arc<FlakyRepository>,
    control: Arc<RecordingControl>,
    concurrency: usize,
) -> (PartitionDispatcher, Arc<MetricsAggregator>) {
    let metrics = Arc::new(MetricsAggregator::new("consumer"));
    let processor = Arc::new(DeduplicatingProcessor::new(repository, Arc::clone(&metrics)));
    (
        PartitionDispatcher::new(processor, control, concurrency),
        metrics,
    )
}

#[tokio::test]
async fn test_offsets_committed_in_order_per_partition() {
    let repository = Arc::new(FlakyRepository::default());
    let control = Arc::new(RecordingControl::default());
    let (mut dispatcher, metrics) = dispatcher(repository.clone(), control.clone(), 1);

    for offset in 0..5 {
        dispatcher
            .dispatch(delivery(0, offset, &format!("p0-{}", offset)))
            .await;
        dispatcher
            .dispatch(delivery(1, offset, &format!("p1-{}", offset)))
            .await;
    }
    assert_eq!(dispatcher.active_partitions(), 2);
    dispatcher.shutdown().await;

    assert_eq!(control.commits_for(0), vec![0, 1, 2, 3, 4]);
    assert_eq!(control.commits_for(1), vec![0, 1, 2, 3, 4]);
    assert!(control.rewinds().is_empty());
    assert_eq!(repository.len().await, 10);
    assert_eq!(metrics.snapshot().succeeded, 10);
}

#[tokio::test]
async fn test_redelivered_id_acknowledged_without_second_record() {
    let repository = Arc::new(FlakyRepository::default());
    let control = Arc::new(RecordingControl::default());
    let (mut dispatcher, metrics) = dispatcher(repository.clone(), control.clone(), 3);

    dispatcher.dispatch(delivery(0, 0, "same-id")).await;
    dispatcher.dispatch(delivery(0, 1, "same-id")).await;
    dispatcher.shutdown().await;

    assert_eq!(control.commits_for(0), vec![0, 1]);
    assert_eq!(repository.len().await, 1);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.attempted, 1);
    assert_eq!(snapshot.succeeded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unrecorded_delivery_is_never_committed_past() {
    let repository = Arc::new(FlakyRepository::default());
    // primary and failure-record writes both fail on first delivery
    repository.fail_saves("m1", 2);
    let control = Arc::new(RecordingControl::default());
    let (mut dispatcher, _metrics) = dispatcher(repository.clone(), control.clone(), 3);

    dispatcher.dispatch(delivery(0, 0, "m0")).await;
    dispatcher.dispatch(delivery(0, 1, "m1")).await;
    // already fetched before the rewind took effect
    dispatcher.dispatch(delivery(0, 2, "m2")).await;
    // redelivered after the rewind
    dispatcher.dispatch(delivery(0, 1, "m1")).await;
    dispatcher.dispatch(delivery(0, 2, "m2")).await;
    dispatcher.shutdown().await;

    assert_eq!(control.rewinds(), vec![(0, 1)]);
    assert_eq!(control.commits_for(0), vec![0, 1, 2]);
    assert_eq!(repository.len().await, 3);

    let m1 = repository.find_by_message_id("m1").await.unwrap().unwrap();
    assert_eq!(m1.status, ProcessingStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_rewinds_back_off() {
    let repository = Arc::new(FlakyRepository::default());
    // two deliveries in a row end up unrecorded
    repository.fail_saves("m0", 4);
    let control = Arc::new(RecordingControl::default());
    let (mut dispatcher, _metrics) = dispatcher(repository.clone(), control.clone(), 1);

    let start = Instant::now();
    for _ in 0..3 {
        dispatcher.dispatch(delivery(0, 0, "m0")).await;
    }
    dispatcher.shutdown().await;

    assert_eq!(control.rewinds(), vec![(0, 0), (0, 0)]);
    assert_eq!(control.commits_for(0), vec![0]);

    let rewound_at = control.rewound_at();
    assert!(rewound_at[0] - start >= Duration::from_secs(1));
    assert!(rewound_at[1] - rewound_at[0] >= Duration::from_secs(2));
}

#[tokio::test]
async fn test_failure_record_is_acknowledged() {
    let repository = Arc::new(FlakyRepository::default());
    repository.fail_saves("m0", 1);
    let control = Arc::new(RecordingControl::default());
    let (mut dispatcher, metrics) = dispatcher(repository.clone(), control.clone(), 1);

    dispatcher.dispatch(delivery(0, 0, "m0")).await;
    dispatcher.shutdown().await;

    assert_eq!(control.commits_for(0), vec![0]);
    assert!(control.rewinds().is_empty());

    let record = repository.find_by_message_id("m0").await.unwrap().unwrap();
    assert_eq!(record.status, ProcessingStatus::Failed);
    assert!(record.error_message.is_some());
    assert_eq!(metrics.snapshot().failed, 1);
}

#[tokio::test]
async fn test_poison_message_dead_lettered_and_committed() {
    let repository = Arc::new(FlakyRepository::default());
    let control = Arc::new(RecordingControl::default());
    let (mut dispatcher, _metrics) = dispatcher(repository.clone(), control.clone(), 1);

    dispatcher
        .dispatch(Delivery {
            payload: InboundPayload::decode(Some(&b"{not json"[..])),
            context: context(4, 9),
        })
        .await;
    dispatcher.dispatch(delivery(4, 10, "after-poison")).await;
    dispatcher.shutdown().await;

    assert_eq!(control.commits_for(4), vec![9, 10]);

    let dlq = repository
        .find_by_message_id("cross-account-messages-4-9")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dlq.status, ProcessingStatus::Dlq);
}
