//! Test harnesses for integration testing of the topic repository.
//!
//! Provides ready-made environments with:
//! - The `my-topic` / `another-topic` fixture cluster
//! - A [`TopicRepository`] wired to an in-memory engine or a mock broker
//! - Access to recorded sends and broker calls for verification

use std::sync::Arc;
use std::time::Duration;

use crate::broker::KafkaLogEngine;
use crate::config::KafkaConfig;
use crate::metrics::RepositoryMetrics;
use crate::partitioning::{CalibrationTable, CalibrationTier};
use crate::repository::{RepositorySettings, TopicRepository};

use super::in_memory::InMemoryEngine;
use super::mock_broker::{BrokerCall, MockBroker};

/// `(partition, earliest, latest)` watermarks of one fixture partition.
pub type FixturePartition = (i32, i64, i64);

/// Topics every harness starts with unless the builder says otherwise.
#[must_use]
pub fn fixture_topics() -> Vec<(String, Vec<FixturePartition>)> {
    vec![
        (
            "my-topic".to_string(),
            vec![(0, 40, 42), (1, 100, 200), (2, 0, 0)],
        ),
        (
            "another-topic".to_string(),
            vec![(1, 0, 100), (5, 12, 60), (9, 99, 222)],
        ),
    ]
}

/// Calibration used by the fixtures: 1 MiB/s per partition up to 64 MiB/s.
#[must_use]
pub fn fixture_calibration() -> CalibrationTable {
    const MIB: u64 = 1024 * 1024;
    CalibrationTable::new(vec![
        CalibrationTier::new(MIB, 1),
        CalibrationTier::new(4 * MIB, 2),
        CalibrationTier::new(16 * MIB, 4),
        CalibrationTier::new(64 * MIB, 6),
    ])
    .expect("fixture calibration is valid")
}

/// Repository over an [`InMemoryEngine`].
pub struct RepositoryTestHarness {
    /// The fake cluster, shared with the repository.
    pub engine: Arc<InMemoryEngine>,
    /// The repository under test.
    pub repository: TopicRepository,
    /// Metrics the repository records into.
    pub metrics: Arc<RepositoryMetrics>,
}

impl RepositoryTestHarness {
    /// Create a harness with the fixture topics and default settings.
    #[must_use]
    pub fn new() -> Self {
        TestHarnessBuilder::new().build()
    }
}

impl Default for RepositoryTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Repository over a [`KafkaLogEngine`] connected to a [`MockBroker`].
pub struct KafkaTestHarness {
    /// The mock broker
    mock_broker: MockBroker,
    /// The mock broker address
    mock_broker_addr: String,
    /// Engine connected to the mock broker.
    pub engine: Arc<KafkaLogEngine>,
    /// The repository under test.
    pub repository: TopicRepository,
    /// Kafka settings pointing at the mock broker.
    pub config: KafkaConfig,
}

impl KafkaTestHarness {
    /// Start a mock broker with the fixture topics and connect to it.
    pub async fn new() -> Self {
        TestHarnessBuilder::new().build_with_mock_broker().await
    }

    /// Get the mock broker address.
    #[must_use]
    pub fn broker_address(&self) -> &str {
        &self.mock_broker_addr
    }

    /// The mock broker, for changing cluster state mid-test.
    #[must_use]
    pub fn broker(&self) -> &MockBroker {
        &self.mock_broker
    }

    /// Get all recorded broker calls.
    pub async fn get_broker_calls(&self) -> Vec<BrokerCall> {
        self.mock_broker.get_calls().await
    }

    /// Get broker calls filtered by API key.
    pub async fn get_broker_calls_for_api(&self, api_key: i16) -> Vec<BrokerCall> {
        self.mock_broker.get_calls_for_api(api_key).await
    }

    /// Clear all recorded broker calls.
    pub async fn clear_broker_calls(&self) {
        self.mock_broker.clear_calls().await;
    }

    /// Shutdown the test harness.
    pub async fn shutdown(&mut self) {
        self.engine.shutdown().await;
        self.mock_broker.stop().await;
    }
}

/// Builder for creating test harnesses with specific configuration.
pub struct TestHarnessBuilder {
    topics: Vec<(String, Vec<FixturePartition>)>,
    send_timeout: Duration,
    max_partitions: u32,
    poll_timeout: Duration,
    calibration: CalibrationTable,
}

impl TestHarnessBuilder {
    /// Create a new builder with the fixture topics and default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: fixture_topics(),
            send_timeout: Duration::from_secs(1),
            max_partitions: 1000,
            poll_timeout: Duration::from_millis(100),
            calibration: fixture_calibration(),
        }
    }

    /// Drop the fixture topics.
    #[must_use]
    pub fn empty(mut self) -> Self {
        self.topics.clear();
        self
    }

    /// Add a topic with `(partition, earliest, latest)` watermarks.
    #[must_use]
    pub fn topic(mut self, name: &str, partitions: &[FixturePartition]) -> Self {
        self.topics.retain(|(existing, _)| existing != name);
        self.topics.push((name.to_string(), partitions.to_vec()));
        self
    }

    /// Set how long a batch waits for confirmations.
    #[must_use]
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the partition count ceiling.
    #[must_use]
    pub fn max_partitions(mut self, max: u32) -> Self {
        self.max_partitions = max;
        self
    }

    /// Set the calibration table.
    #[must_use]
    pub fn calibration(mut self, table: CalibrationTable) -> Self {
        self.calibration = table;
        self
    }

    fn settings(&self) -> RepositorySettings {
        RepositorySettings {
            send_timeout: self.send_timeout,
            max_partitions: self.max_partitions,
            poll_timeout: self.poll_timeout,
            calibration: self.calibration.clone(),
        }
    }

    /// Build a harness over an in-memory engine.
    #[must_use]
    pub fn build(self) -> RepositoryTestHarness {
        let engine = self
            .topics
            .iter()
            .fold(InMemoryEngine::new(), |engine, (name, partitions)| {
                engine.with_topic(name, partitions)
            });
        let engine = Arc::new(engine);
        let metrics = Arc::new(RepositoryMetrics::new());
        let repository = TopicRepository::new(engine.clone(), engine.clone(), self.settings())
            .with_metrics(Arc::clone(&metrics));

        RepositoryTestHarness {
            engine,
            repository,
            metrics,
        }
    }

    /// Build a harness over a Kafka engine connected to a fresh mock broker.
    pub async fn build_with_mock_broker(self) -> KafkaTestHarness {
        let mut mock_broker = MockBroker::new("127.0.0.1:0");
        let mock_broker_addr = mock_broker
            .start()
            .await
            .expect("Failed to start mock broker");
        for (name, partitions) in &self.topics {
            mock_broker.add_topic(name, partitions);
        }

        let config = KafkaConfig {
            bootstrap_servers: vec![mock_broker_addr.clone()],
            client_id: "topic-repository-test".to_string(),
            connection_timeout_ms: 5000,
            request_timeout_ms: 10000,
            metadata_refresh_interval_secs: 0, // Disable auto refresh
            acks: -1,
            max_in_flight_sends: 64,
        };

        let engine = Arc::new(
            KafkaLogEngine::connect(&config)
                .await
                .expect("Failed to connect to mock broker"),
        );
        let repository = TopicRepository::new(engine.clone(), engine.clone(), self.settings());

        KafkaTestHarness {
            mock_broker,
            mock_broker_addr,
            engine,
            repository,
            config,
        }
    }
}

impl Default for TestHarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_creation() {
        let harness = RepositoryTestHarness::new();

        let topics = harness.repository.list_topics().await.unwrap();
        assert!(topics.contains("my-topic"));
        assert!(topics.contains("another-topic"));
    }

    #[tokio::test]
    async fn test_harness_builder() {
        let harness = TestHarnessBuilder::new()
            .empty()
            .topic("orders", &[(0, 0, 5)])
            .build();

        let topics = harness.repository.list_topics().await.unwrap();
        assert_eq!(topics.len(), 1);
        assert!(topics.contains("orders"));
    }

    #[tokio::test]
    async fn test_mock_broker_harness() {
        let mut harness = KafkaTestHarness::new().await;

        assert!(!harness.broker_address().is_empty());
        assert!(harness.repository.topic_exists("my-topic").await.unwrap());

        harness.shutdown().await;
    }

    #[test]
    fn test_fixture_calibration() {
        assert_eq!(fixture_calibration().tiers().len(), 4);
    }
}
