//! Integration tests for topic and partition queries and partition sizing.

use topic_repository_core::testing::{RepositoryTestHarness, TestHarnessBuilder};
use topic_repository_core::{Cursor, RepositoryError, ThroughputProfile, TopicPartition};

fn partition(topic: &str, id: &str, oldest: &str, newest: &str) -> TopicPartition {
    TopicPartition {
        topic: topic.to_string(),
        partition_id: id.to_string(),
        oldest_available_offset: oldest.to_string(),
        newest_available_offset: newest.to_string(),
    }
}

#[tokio::test]
async fn test_list_topics() {
    let harness = RepositoryTestHarness::new();

    let topics = harness.repository.list_topics().await.unwrap();
    assert_eq!(
        topics.into_iter().collect::<Vec<_>>(),
        vec!["another-topic".to_string(), "my-topic".to_string()]
    );
}

#[tokio::test]
async fn test_topic_exists() {
    let harness = RepositoryTestHarness::new();

    assert!(harness.repository.topic_exists("my-topic").await.unwrap());
    assert!(!harness.repository.topic_exists("no-such-topic").await.unwrap());
}

#[tokio::test]
async fn test_list_partitions() {
    let harness = RepositoryTestHarness::new();

    let partitions = harness.repository.list_partitions("my-topic").await.unwrap();
    assert_eq!(
        partitions,
        vec![
            partition("my-topic", "0", "40", "41"),
            partition("my-topic", "1", "100", "199"),
            partition("my-topic", "2", "0", "BEGIN"),
        ]
    );
}

#[tokio::test]
async fn test_list_partitions_unknown_topic() {
    let harness = RepositoryTestHarness::new();

    let result = harness.repository.list_partitions("no-such-topic").await;
    assert!(matches!(
        result,
        Err(RepositoryError::TopicNotFound { topic }) if topic == "no-such-topic"
    ));
}

#[tokio::test]
async fn test_get_partition() {
    let harness = RepositoryTestHarness::new();

    let found = harness
        .repository
        .get_partition("another-topic", "5")
        .await
        .unwrap();
    assert_eq!(found, partition("another-topic", "5", "12", "59"));

    let missing = harness.repository.get_partition("another-topic", "0").await;
    assert!(matches!(
        missing,
        Err(RepositoryError::PartitionNotFound { partition, .. }) if partition == "0"
    ));
}

#[tokio::test]
async fn test_partition_exists() {
    let harness = RepositoryTestHarness::new();

    for id in ["0", "1", "2"] {
        assert!(
            harness.repository.partition_exists("my-topic", id).await.unwrap(),
            "partition {id} should exist"
        );
    }
    for id in ["3", "-1", "abc", "00", ""] {
        assert!(
            !harness.repository.partition_exists("my-topic", id).await.unwrap(),
            "partition {id:?} should not exist"
        );
    }
    assert!(!harness
        .repository
        .partition_exists("no-such-topic", "0")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_directory_unavailable() {
    let harness = RepositoryTestHarness::new();
    harness.engine.set_unavailable(true);

    assert!(matches!(
        harness.repository.list_topics().await,
        Err(RepositoryError::Unavailable(_))
    ));
    assert!(matches!(
        harness.repository.topic_exists("my-topic").await,
        Err(RepositoryError::Unavailable(_))
    ));
    assert!(matches!(
        harness.repository.list_partitions("my-topic").await,
        Err(RepositoryError::Unavailable(_))
    ));
    assert!(matches!(
        harness.repository.get_partition("my-topic", "0").await,
        Err(RepositoryError::Unavailable(_))
    ));
    assert!(matches!(
        harness.repository.partition_exists("my-topic", "0").await,
        Err(RepositoryError::Unavailable(_))
    ));
    assert!(matches!(
        harness
            .repository
            .create_event_consumer("my-topic", &[Cursor::before_oldest("0")])
            .await,
        Err(RepositoryError::Unavailable(_))
    ));

    let output = harness.metrics.encode().unwrap();
    assert!(output.contains("topic_repository_directory_errors_total 6"));

    harness.engine.set_unavailable(false);
    assert!(harness.repository.topic_exists("my-topic").await.unwrap());
}

#[tokio::test]
async fn test_every_call_takes_a_snapshot() {
    let harness = RepositoryTestHarness::new();

    harness.repository.list_partitions("my-topic").await.unwrap();
    harness.engine.remove_topic("my-topic");
    let result = harness.repository.list_partitions("my-topic").await;

    assert!(matches!(result, Err(RepositoryError::TopicNotFound { .. })));
    assert_eq!(harness.engine.directory_calls(), 2);
}

#[test]
fn test_partition_count_from_parallelism() {
    let harness = RepositoryTestHarness::new();
    let profile = ThroughputProfile {
        read_parallelism: 3,
        write_parallelism: 5,
        messages_per_minute: 60,
        message_size: 100,
    };

    assert_eq!(harness.repository.calculate_partition_count(&profile), 5);
}

#[test]
fn test_partition_count_from_throughput() {
    let harness = RepositoryTestHarness::new();
    // 10 MiB/s falls in the 16 MiB/s tier
    let profile = ThroughputProfile {
        read_parallelism: 1,
        write_parallelism: 1,
        messages_per_minute: 60 * 10 * 1024,
        message_size: 1024,
    };

    assert_eq!(harness.repository.calculate_partition_count(&profile), 4);
}

#[test]
fn test_partition_count_for_idle_topic() {
    let harness = RepositoryTestHarness::new();

    assert_eq!(
        harness
            .repository
            .calculate_partition_count(&ThroughputProfile::default()),
        1
    );
}

#[test]
fn test_partition_count_capped() {
    let harness = TestHarnessBuilder::new().max_partitions(3).build();
    let profile = ThroughputProfile {
        read_parallelism: 1,
        write_parallelism: 1,
        messages_per_minute: 1_000_000_000,
        message_size: 1_000_000_000,
    };

    assert_eq!(harness.repository.calculate_partition_count(&profile), 3);

    let wide = ThroughputProfile {
        read_parallelism: 50,
        ..ThroughputProfile::default()
    };
    assert_eq!(harness.repository.calculate_partition_count(&wide), 3);
}

#[test]
fn test_partition_count_saturates_at_last_tier() {
    let harness = RepositoryTestHarness::new();
    let profile = ThroughputProfile {
        read_parallelism: 1,
        write_parallelism: 1,
        messages_per_minute: 1_000_000_000,
        message_size: 1_000_000_000,
    };

    assert_eq!(harness.repository.calculate_partition_count(&profile), 6);
}

#[test]
fn test_partition_count_monotonic_in_byte_rate() {
    let harness = RepositoryTestHarness::new();
    let mut previous = 0;

    for messages_per_minute in (0..=200_000u32).step_by(5_000) {
        let profile = ThroughputProfile {
            read_parallelism: 1,
            write_parallelism: 1,
            messages_per_minute,
            message_size: 1024,
        };
        let partitions = harness.repository.calculate_partition_count(&profile);
        assert!((1..=1000).contains(&partitions));
        assert!(partitions >= previous, "count dropped at {messages_per_minute}/min");
        previous = partitions;
    }
}
