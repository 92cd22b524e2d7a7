//! Integration tests for the Kafka-backed engine against a mock broker.
//!
//! Tests that directory snapshots come from Metadata and ListOffsets and that
//! batches are delivered with Produce.

use std::time::Duration;

use topic_repository_core::broker::protocol::error_codes;
use topic_repository_core::publish::TIMED_OUT_DETAIL;
use topic_repository_core::testing::mock_broker::api_keys;
use topic_repository_core::testing::{KafkaTestHarness, TestHarnessBuilder};
use topic_repository_core::{
    BatchItem, Cursor, EngineReadPosition, PublishingStatus, RepositoryError,
};

#[tokio::test]
async fn test_list_topics_skips_internal_topics() {
    let mut harness = KafkaTestHarness::new().await;
    harness
        .broker()
        .add_internal_topic("__consumer_offsets", &[(0, 0, 10)]);

    let topics = harness.repository.list_topics().await.unwrap();

    assert_eq!(
        topics.into_iter().collect::<Vec<_>>(),
        vec!["another-topic".to_string(), "my-topic".to_string()]
    );
    harness.shutdown().await;
}

#[tokio::test]
async fn test_list_partitions_from_list_offsets() {
    let mut harness = KafkaTestHarness::new().await;
    harness.clear_broker_calls().await;

    let partitions = harness.repository.list_partitions("my-topic").await.unwrap();

    let summary: Vec<_> = partitions
        .iter()
        .map(|p| {
            (
                p.partition_id.as_str(),
                p.oldest_available_offset.as_str(),
                p.newest_available_offset.as_str(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![("0", "40", "41"), ("1", "100", "199"), ("2", "0", "BEGIN")]
    );

    // One request for earliest and one for latest on the single leader
    let list_offsets = harness.get_broker_calls_for_api(api_keys::LIST_OFFSETS).await;
    assert_eq!(list_offsets.len(), 2);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_unknown_topic() {
    let mut harness = KafkaTestHarness::new().await;

    assert!(matches!(
        harness.repository.list_partitions("no-such-topic").await,
        Err(RepositoryError::TopicNotFound { .. })
    ));
    assert!(!harness
        .repository
        .partition_exists("no-such-topic", "0")
        .await
        .unwrap());
    harness.shutdown().await;
}

#[tokio::test]
async fn test_create_consumer_against_broker() {
    let mut harness = KafkaTestHarness::new().await;

    let consumer = harness
        .repository
        .create_event_consumer(
            "another-topic",
            &[Cursor::new("5", "12"), Cursor::before_oldest("9")],
        )
        .await
        .unwrap();

    assert_eq!(
        consumer.positions(),
        &[EngineReadPosition::new(5, 13), EngineReadPosition::new(9, 99)]
    );
    harness.shutdown().await;
}

#[tokio::test]
async fn test_publish_appends_to_partition() {
    let mut harness = KafkaTestHarness::new().await;
    let mut items = vec![
        BatchItem::for_partition("0", "first"),
        BatchItem::for_partition("2", "second"),
    ];

    harness
        .repository
        .sync_post_batch("my-topic", &mut items)
        .await
        .unwrap();

    assert!(items
        .iter()
        .all(|item| item.status() == PublishingStatus::Succeeded));
    assert_eq!(harness.broker().watermarks("my-topic", 0).unwrap().latest, 43);
    assert_eq!(harness.broker().watermarks("my-topic", 2).unwrap().latest, 1);

    let produces = harness.get_broker_calls_for_api(api_keys::PRODUCE).await;
    assert_eq!(produces.len(), 2);

    let newest = harness.repository.get_partition("my-topic", "2").await.unwrap();
    assert_eq!(newest.newest_available_offset, "0");
    harness.shutdown().await;
}

#[tokio::test]
async fn test_publish_without_partition() {
    let mut harness = TestHarnessBuilder::new()
        .empty()
        .topic("single", &[(3, 0, 7)])
        .build_with_mock_broker()
        .await;
    let mut items = vec![BatchItem::new("payload")];

    harness
        .repository
        .sync_post_batch("single", &mut items)
        .await
        .unwrap();

    assert_eq!(items[0].partition.as_deref(), Some("3"));
    assert_eq!(harness.broker().watermarks("single", 3).unwrap().latest, 8);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_broker_error_fails_item() {
    let mut harness = KafkaTestHarness::new().await;
    harness
        .broker()
        .set_produce_error("my-topic", 1, error_codes::NOT_LEADER_OR_FOLLOWER);
    let mut items = vec![
        BatchItem::for_partition("0", "ok"),
        BatchItem::for_partition("1", "rejected"),
    ];

    let result = harness.repository.sync_post_batch("my-topic", &mut items).await;

    assert!(matches!(result, Err(RepositoryError::EventPublishing(_))));
    assert_eq!(items[0].status(), PublishingStatus::Succeeded);
    assert_eq!(items[1].status(), PublishingStatus::Failed);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_non_numeric_partition_fails_item() {
    let mut harness = KafkaTestHarness::new().await;
    harness.clear_broker_calls().await;
    let mut items = vec![BatchItem::for_partition("abc", "payload")];

    let result = harness.repository.sync_post_batch("my-topic", &mut items).await;

    assert!(matches!(result, Err(RepositoryError::EventPublishing(_))));
    assert_eq!(items[0].status(), PublishingStatus::Failed);
    assert!(harness
        .get_broker_calls_for_api(api_keys::PRODUCE)
        .await
        .is_empty());
    harness.shutdown().await;
}

#[tokio::test]
async fn test_stalled_produce_does_not_block_later_batches() {
    let mut harness = TestHarnessBuilder::new()
        .send_timeout(Duration::from_millis(300))
        .build_with_mock_broker()
        .await;
    harness
        .broker()
        .set_produce_delay("my-topic", 1, Duration::from_secs(3));

    let mut stalled = vec![BatchItem::for_partition("1", "slow")];
    let result = harness.repository.sync_post_batch("my-topic", &mut stalled).await;
    assert!(matches!(result, Err(RepositoryError::EventPublishing(_))));
    assert_eq!(stalled[0].detail(), Some(TIMED_OUT_DETAIL));

    // Same leader, while the first produce is still waiting on its response
    let mut items = vec![
        BatchItem::for_partition("0", "first"),
        BatchItem::for_partition("2", "second"),
    ];
    harness
        .repository
        .sync_post_batch("my-topic", &mut items)
        .await
        .unwrap();
    assert!(items
        .iter()
        .all(|item| item.status() == PublishingStatus::Succeeded));
    harness.shutdown().await;
}
