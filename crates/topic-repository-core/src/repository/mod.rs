//! The topic repository facade.
//!
//! [`TopicRepository`] answers topic and partition queries from
//! [`PartitionDirectory`] snapshots, opens consumers from validated cursors,
//! sizes new topics and publishes batches. Every call takes a fresh snapshot;
//! nothing is cached between calls.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cursor::{validate_cursors, Cursor, BEFORE_OLDEST_OFFSET};
use crate::engine::{EngineReadPosition, LogEngine, PartitionDirectory, PartitionWatermarks};
use crate::error::{EngineError, RepositoryError, Result};
use crate::metrics::RepositoryMetrics;
use crate::partitioning::{CalibrationTable, PartitionSizeCalculator, ThroughputProfile};
use crate::publish::{BatchItem, BatchPublisher};

/// Public view of one partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition_id: String,
    /// Oldest retained sequence number.
    pub oldest_available_offset: String,
    /// Last written sequence number, or the sentinel for an empty partition.
    pub newest_available_offset: String,
}

impl TopicPartition {
    #[must_use]
    pub fn from_watermarks(topic: &str, watermarks: &PartitionWatermarks) -> Self {
        let newest_available_offset = if watermarks.is_empty() {
            BEFORE_OLDEST_OFFSET.to_string()
        } else {
            (watermarks.latest - 1).to_string()
        };
        Self {
            topic: topic.to_string(),
            partition_id: watermarks.partition_id(),
            oldest_available_offset: watermarks.earliest.to_string(),
            newest_available_offset,
        }
    }
}

/// Handle bound to validated read positions.
///
/// Reading itself belongs to the consumer path outside the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventConsumer {
    topic: String,
    positions: Vec<EngineReadPosition>,
    poll_timeout: Duration,
}

impl EventConsumer {
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Read positions, one per cursor, in cursor order.
    #[must_use]
    pub fn positions(&self) -> &[EngineReadPosition] {
        &self.positions
    }

    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }
}

/// Runtime settings of a [`TopicRepository`].
#[derive(Debug, Clone)]
pub struct RepositorySettings {
    pub send_timeout: Duration,
    pub max_partitions: u32,
    pub poll_timeout: Duration,
    pub calibration: CalibrationTable,
}

/// Facade over the partition directory and the log engine.
pub struct TopicRepository {
    directory: Arc<dyn PartitionDirectory>,
    publisher: BatchPublisher,
    calculator: PartitionSizeCalculator,
    max_partitions: u32,
    poll_timeout: Duration,
    metrics: Option<Arc<RepositoryMetrics>>,
}

impl TopicRepository {
    pub fn new(
        directory: Arc<dyn PartitionDirectory>,
        engine: Arc<dyn LogEngine>,
        settings: RepositorySettings,
    ) -> Self {
        info!(
            max_partitions = settings.max_partitions,
            send_timeout_ms = settings.send_timeout.as_millis() as u64,
            calibration_tiers = settings.calibration.tiers().len(),
            "topic repository created"
        );
        Self {
            directory,
            publisher: BatchPublisher::new(engine, settings.send_timeout),
            calculator: PartitionSizeCalculator::new(settings.calibration),
            max_partitions: settings.max_partitions,
            poll_timeout: settings.poll_timeout,
            metrics: None,
        }
    }

    /// Record repository activity into `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<RepositoryMetrics>) -> Self {
        self.publisher = self.publisher.with_metrics(Arc::clone(&metrics));
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn metrics(&self) -> Option<&Arc<RepositoryMetrics>> {
        self.metrics.as_ref()
    }

    /// Names of all topics.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] if the directory fails.
    pub async fn list_topics(&self) -> Result<BTreeSet<String>> {
        self.directory
            .list_topics()
            .await
            .map_err(|e| self.directory_error(e))
    }

    /// Whether `topic` exists.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] if the directory fails.
    pub async fn topic_exists(&self, topic: &str) -> Result<bool> {
        Ok(self.list_topics().await?.contains(topic))
    }

    /// All partitions of `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::TopicNotFound`] for an unknown topic and
    /// [`RepositoryError::Unavailable`] if the directory fails.
    pub async fn list_partitions(&self, topic: &str) -> Result<Vec<TopicPartition>> {
        let snapshot = self.snapshot(topic).await?;
        Ok(snapshot
            .iter()
            .map(|watermarks| TopicPartition::from_watermarks(topic, watermarks))
            .collect())
    }

    /// One partition of `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::PartitionNotFound`] if the partition is not
    /// in the snapshot, besides the errors of [`Self::list_partitions`].
    pub async fn get_partition(&self, topic: &str, partition_id: &str) -> Result<TopicPartition> {
        self.snapshot(topic)
            .await?
            .iter()
            .find(|watermarks| watermarks.partition_id() == partition_id)
            .map(|watermarks| TopicPartition::from_watermarks(topic, watermarks))
            .ok_or_else(|| RepositoryError::PartitionNotFound {
                topic: topic.to_string(),
                partition: partition_id.to_string(),
            })
    }

    /// Whether `partition_id` exists in `topic`. An unknown topic has no
    /// partitions.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] if the directory fails.
    pub async fn partition_exists(&self, topic: &str, partition_id: &str) -> Result<bool> {
        match self.snapshot(topic).await {
            Ok(snapshot) => Ok(snapshot.iter().any(|p| p.partition_id() == partition_id)),
            Err(RepositoryError::TopicNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Validate `cursors` and bind a consumer to the resulting positions.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidCursor`] for the first invalid
    /// cursor, [`RepositoryError::TopicNotFound`] for an unknown topic and
    /// [`RepositoryError::Unavailable`] if the directory fails.
    pub async fn create_event_consumer(
        &self,
        topic: &str,
        cursors: &[Cursor],
    ) -> Result<EventConsumer> {
        let snapshot = self.snapshot(topic).await?;
        let positions = validate_cursors(&snapshot, cursors).map_err(|e| {
            warn!(topic, cursor = %e.cursor, error = e.error.as_str(), "invalid cursor");
            if let Some(metrics) = &self.metrics {
                metrics.record_cursor_rejection(e.error);
            }
            e
        })?;

        debug!(topic, positions = positions.len(), "event consumer created");
        Ok(EventConsumer {
            topic: topic.to_string(),
            positions,
            poll_timeout: self.poll_timeout,
        })
    }

    /// Publish `items` to `topic`, updating each item's result in place.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::EventPublishing`] if any item failed.
    pub async fn sync_post_batch(&self, topic: &str, items: &mut [BatchItem]) -> Result<()> {
        self.publisher.publish(topic, items).await?;
        Ok(())
    }

    /// Partition count for a new topic with the given throughput profile.
    #[must_use]
    pub fn calculate_partition_count(&self, profile: &ThroughputProfile) -> u32 {
        self.calculator.recommend(profile, self.max_partitions)
    }

    async fn snapshot(&self, topic: &str) -> Result<Vec<PartitionWatermarks>> {
        self.directory
            .list_partitions(topic)
            .await
            .map_err(|e| self.directory_error(e))
    }

    fn directory_error(&self, error: EngineError) -> RepositoryError {
        if !matches!(error, EngineError::UnknownTopic { .. }) {
            warn!(error = %error, "partition directory unavailable");
            if let Some(metrics) = &self.metrics {
                metrics.record_directory_error();
            }
        }
        error.into()
    }
}
