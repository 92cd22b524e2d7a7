//! Deterministic in-memory partition directory and log engine.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future;

use crate::engine::{
    LogEngine, PartitionDirectory, PartitionWatermarks, ProducerRecord, RecordMetadata,
    SendFuture,
};
use crate::error::{EngineError, EngineResult};

/// How the fake engine treats sends to one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendBehaviour {
    /// Append and confirm immediately.
    #[default]
    Ack,
    /// Refuse the send before returning a confirmation future.
    Reject,
    /// Accept the send, then fail the confirmation.
    FailAsync,
    /// Accept the send and never confirm it.
    Hang,
}

/// In-memory topics with per-partition send behaviour.
#[derive(Default)]
pub struct InMemoryEngine {
    topics: DashMap<String, Vec<PartitionWatermarks>>,
    behaviours: DashMap<(String, i32), SendBehaviour>,
    sent: Mutex<Vec<ProducerRecord>>,
    unavailable: AtomicBool,
    directory_calls: AtomicUsize,
    round_robin: AtomicUsize,
}

impl InMemoryEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a topic with `(partition, earliest, latest)` watermarks.
    #[must_use]
    pub fn with_topic(self, topic: &str, partitions: &[(i32, i64, i64)]) -> Self {
        self.set_topic(topic, partitions);
        self
    }

    /// Replace the partitions of `topic`.
    pub fn set_topic(&self, topic: &str, partitions: &[(i32, i64, i64)]) {
        let watermarks = partitions
            .iter()
            .map(|&(partition, earliest, latest)| {
                PartitionWatermarks::new(partition, earliest, latest)
            })
            .collect();
        self.topics.insert(topic.to_string(), watermarks);
    }

    pub fn remove_topic(&self, topic: &str) {
        self.topics.remove(topic);
    }

    pub fn set_behaviour(&self, topic: &str, partition: i32, behaviour: SendBehaviour) {
        self.behaviours
            .insert((topic.to_string(), partition), behaviour);
    }

    /// Make every directory call fail as if the cluster were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Records accepted by [`LogEngine::send`], in submission order.
    #[must_use]
    pub fn sent_records(&self) -> Vec<ProducerRecord> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Number of directory calls served.
    #[must_use]
    pub fn directory_calls(&self) -> usize {
        self.directory_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn watermarks(&self, topic: &str, partition: i32) -> Option<PartitionWatermarks> {
        self.topics
            .get(topic)?
            .iter()
            .find(|w| w.partition == partition)
            .copied()
    }

    fn check_available(&self) -> EngineResult<()> {
        self.directory_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::NoBrokersAvailable);
        }
        Ok(())
    }

    fn resolve_partition(&self, record: &ProducerRecord) -> EngineResult<i32> {
        let invalid = || EngineError::InvalidPartition {
            topic: record.topic.clone(),
            partition: record.partition.clone().unwrap_or_default(),
        };

        let topic = self
            .topics
            .get(&record.topic)
            .ok_or_else(|| EngineError::UnknownTopic {
                topic: record.topic.clone(),
            })?;

        match record.partition.as_deref() {
            Some(id) => topic
                .iter()
                .find(|w| w.partition_id() == id)
                .map(|w| w.partition)
                .ok_or_else(invalid),
            None if topic.is_empty() => Err(invalid()),
            None => {
                let next = self.round_robin.fetch_add(1, Ordering::SeqCst);
                Ok(topic[next % topic.len()].partition)
            }
        }
    }

    /// Append one record and return its offset.
    fn append(&self, topic: &str, partition: i32) -> EngineResult<RecordMetadata> {
        let mut partitions =
            self.topics
                .get_mut(topic)
                .ok_or_else(|| EngineError::UnknownTopic {
                    topic: topic.to_string(),
                })?;
        let watermarks = partitions
            .iter_mut()
            .find(|w| w.partition == partition)
            .ok_or_else(|| EngineError::InvalidPartition {
                topic: topic.to_string(),
                partition: partition.to_string(),
            })?;
        let offset = watermarks.latest;
        watermarks.latest += 1;
        Ok(RecordMetadata { partition, offset })
    }
}

#[async_trait]
impl PartitionDirectory for InMemoryEngine {
    async fn list_topics(&self) -> EngineResult<BTreeSet<String>> {
        self.check_available()?;
        Ok(self.topics.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn list_partitions(&self, topic: &str) -> EngineResult<Vec<PartitionWatermarks>> {
        self.check_available()?;
        self.topics
            .get(topic)
            .map(|partitions| partitions.value().clone())
            .ok_or_else(|| EngineError::UnknownTopic {
                topic: topic.to_string(),
            })
    }
}

impl LogEngine for InMemoryEngine {
    fn send(&self, record: ProducerRecord) -> EngineResult<SendFuture> {
        let partition = match self.resolve_partition(&record) {
            Ok(partition) => partition,
            Err(e) => return Ok(Box::pin(future::ready(Err(e)))),
        };

        let behaviour = self
            .behaviours
            .get(&(record.topic.clone(), partition))
            .map(|b| *b.value())
            .unwrap_or_default();

        let confirmation: SendFuture = match behaviour {
            SendBehaviour::Reject => return Err(EngineError::BufferExhausted { limit: 0 }),
            SendBehaviour::Ack => Box::pin(future::ready(self.append(&record.topic, partition))),
            SendBehaviour::FailAsync => Box::pin(future::ready(Err(EngineError::BrokerError {
                topic: record.topic.clone(),
                partition,
                code: -1,
            }))),
            SendBehaviour::Hang => Box::pin(future::pending()),
        };

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(record);
        }
        Ok(confirmation)
    }
}
