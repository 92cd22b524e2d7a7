//! Boundary to the partitioned log engine.
//!
//! The repository talks to the engine through two traits:
//!
//! - [`PartitionDirectory`] - point-in-time topic and partition snapshots
//! - [`LogEngine`] - asynchronous, per-record sends
//!
//! The production implementation of both is
//! [`KafkaLogEngine`](crate::broker::KafkaLogEngine); tests use the in-memory
//! fake from the `testing` module.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::EngineResult;

/// Engine watermarks of one partition at the time of the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionWatermarks {
    /// Engine partition index.
    pub partition: i32,
    /// Oldest sequence number still retained.
    pub earliest: i64,
    /// Next sequence number to be written.
    pub latest: i64,
}

impl PartitionWatermarks {
    #[must_use]
    pub fn new(partition: i32, earliest: i64, latest: i64) -> Self {
        Self {
            partition,
            earliest,
            latest,
        }
    }

    /// The partition holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.earliest == self.latest
    }

    /// Portable partition id.
    #[must_use]
    pub fn partition_id(&self) -> String {
        self.partition.to_string()
    }
}

/// Engine-native read position produced by cursor validation.
///
/// `offset` is the next sequence number to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineReadPosition {
    pub partition: i32,
    pub offset: i64,
}

impl EngineReadPosition {
    #[must_use]
    pub fn new(partition: i32, offset: i64) -> Self {
        Self { partition, offset }
    }
}

/// A record handed to the engine for publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub topic: String,
    /// Target partition id; `None` lets the engine choose.
    pub partition: Option<String>,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

/// Confirmation of a written record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMetadata {
    pub partition: i32,
    pub offset: i64,
}

/// Resolves once the engine confirms or fails a send.
pub type SendFuture = BoxFuture<'static, EngineResult<RecordMetadata>>;

/// Source of topic and partition snapshots.
///
/// Each call takes an independent snapshot; two calls may disagree.
#[async_trait]
pub trait PartitionDirectory: Send + Sync {
    /// Names of all topics currently known.
    async fn list_topics(&self) -> EngineResult<BTreeSet<String>>;

    /// Watermarks of every partition of `topic`.
    ///
    /// Returns [`EngineError::UnknownTopic`](crate::error::EngineError::UnknownTopic)
    /// when the topic does not exist.
    async fn list_partitions(&self, topic: &str) -> EngineResult<Vec<PartitionWatermarks>>;
}

/// Asynchronous record sink.
pub trait LogEngine: Send + Sync {
    /// Submit one record.
    ///
    /// An `Err` means the client rejected the record before any I/O (bad
    /// partition, exhausted buffer). An `Ok` future resolves on confirmed
    /// write or asynchronous failure and keeps running if dropped.
    fn send(&self, record: ProducerRecord) -> EngineResult<SendFuture>;
}
