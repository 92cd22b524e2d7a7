//! Kafka-backed partition directory and log engine.
//!
//! [`KafkaLogEngine`] answers directory queries with Metadata and ListOffsets
//! requests and publishes records with Produce requests sent to each
//! partition's leader. Partition leaders are cached per topic and refreshed on
//! every directory call, by the [`MetadataRefresher`](super::MetadataRefresher)
//! and after leadership errors.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use kafka_protocol::messages::list_offsets_request::{ListOffsetsPartition, ListOffsetsTopic};
use kafka_protocol::messages::metadata_request::MetadataRequestTopic;
use kafka_protocol::messages::produce_request::{PartitionProduceData, TopicProduceData};
use kafka_protocol::messages::{
    ApiKey, BrokerId, ListOffsetsRequest, ListOffsetsResponse, MetadataRequest,
    MetadataResponse, ProduceRequest, ProduceResponse, TopicName,
};
use kafka_protocol::protocol::StrBytes;
use kafka_protocol::records::{
    Compression, Record, RecordBatchEncoder, RecordEncodeOptions, TimestampType,
};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::KafkaConfig;
use crate::engine::{
    LogEngine, PartitionDirectory, PartitionWatermarks, ProducerRecord, RecordMetadata,
    SendFuture,
};
use crate::error::{EngineError, EngineResult};

use super::pool::{BrokerInfo, BrokerPool};
use super::protocol::{
    error_codes, EARLIEST_TIMESTAMP, LATEST_TIMESTAMP, LIST_OFFSETS_VERSION, METADATA_VERSION,
    PRODUCE_VERSION,
};

/// Partition index to leader broker id.
type LeaderMap = BTreeMap<i32, i32>;

/// Kafka client implementing [`PartitionDirectory`] and [`LogEngine`].
pub struct KafkaLogEngine {
    state: Arc<EngineState>,
    in_flight: Arc<Semaphore>,
    max_in_flight: usize,
}

struct EngineState {
    pool: Arc<BrokerPool>,
    acks: i16,
    produce_timeout_ms: i32,
    layouts: DashMap<String, LeaderMap>,
    round_robin: AtomicUsize,
}

impl KafkaLogEngine {
    /// Connect to the cluster and load the initial metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if no bootstrap server is reachable or the first
    /// metadata request fails.
    pub async fn connect(config: &KafkaConfig) -> EngineResult<Self> {
        let pool = Arc::new(BrokerPool::new(config.clone()));
        pool.connect().await?;

        let engine = Self::with_pool(pool, config);
        engine.refresh_metadata().await?;
        info!(
            brokers = engine.state.pool.broker_count(),
            topics = engine.state.layouts.len(),
            "kafka log engine ready"
        );
        Ok(engine)
    }

    /// Build an engine over an existing pool without any I/O.
    #[must_use]
    pub fn with_pool(pool: Arc<BrokerPool>, config: &KafkaConfig) -> Self {
        let produce_timeout_ms = i32::try_from(config.request_timeout_ms).unwrap_or(i32::MAX);
        Self {
            state: Arc::new(EngineState {
                pool,
                acks: config.acks,
                produce_timeout_ms,
                layouts: DashMap::new(),
                round_robin: AtomicUsize::new(0),
            }),
            in_flight: Arc::new(Semaphore::new(config.max_in_flight_sends)),
            max_in_flight: config.max_in_flight_sends,
        }
    }

    /// Sends accepted and not yet resolved.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.in_flight.available_permits()
    }

    /// Reload brokers and partition leaders for all topics.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata request fails.
    pub async fn refresh_metadata(&self) -> EngineResult<()> {
        let response = self.state.fetch_metadata(None).await?;
        let live: BTreeSet<String> = response
            .topics
            .iter()
            .filter_map(|t| t.name.as_ref().map(|n| n.to_string()))
            .collect();
        self.state.layouts.retain(|topic, _| live.contains(topic));
        Ok(())
    }

    /// Close all broker connections.
    pub async fn shutdown(&self) {
        self.state.pool.disconnect_all().await;
    }
}

impl EngineState {
    async fn fetch_metadata(&self, topic: Option<&str>) -> EngineResult<MetadataResponse> {
        let topics = topic.map(|name| {
            vec![MetadataRequestTopic::default().with_name(Some(topic_name(name)))]
        });
        let request = MetadataRequest::default()
            .with_topics(topics)
            .with_allow_auto_topic_creation(false);

        let response: MetadataResponse = self
            .pool
            .request(None, ApiKey::Metadata, METADATA_VERSION, &request)
            .await?;

        let brokers = response
            .brokers
            .iter()
            .map(|b| BrokerInfo::new(b.node_id.0, b.host.to_string(), b.port))
            .collect();
        self.pool.update_brokers(brokers);

        for t in &response.topics {
            let Some(name) = t.name.as_ref().map(|n| n.to_string()) else {
                continue;
            };
            if t.error_code != error_codes::NONE {
                self.layouts.remove(&name);
                continue;
            }
            let leaders: LeaderMap = t
                .partitions
                .iter()
                .map(|p| (p.partition_index, p.leader_id.0))
                .collect();
            self.layouts.insert(name, leaders);
        }

        debug!(
            brokers = response.brokers.len(),
            topics = response.topics.len(),
            "metadata fetched"
        );
        Ok(response)
    }

    /// Leaders of `topic`, from the cache or a fresh metadata request.
    async fn layout(&self, topic: &str) -> EngineResult<LeaderMap> {
        if let Some(layout) = self.layouts.get(topic) {
            return Ok(layout.value().clone());
        }
        self.fetch_metadata(Some(topic)).await?;
        self.layouts
            .get(topic)
            .map(|layout| layout.value().clone())
            .ok_or_else(|| EngineError::UnknownTopic {
                topic: topic.to_string(),
            })
    }

    async fn choose_partition(&self, topic: &str) -> EngineResult<i32> {
        let layout = self.layout(topic).await?;
        let partitions: Vec<i32> = layout.keys().copied().collect();
        if partitions.is_empty() {
            return Err(EngineError::UnknownTopic {
                topic: topic.to_string(),
            });
        }
        let next = self.round_robin.fetch_add(1, Ordering::Relaxed);
        Ok(partitions[next % partitions.len()])
    }

    async fn leader_for(&self, topic: &str, partition: i32) -> EngineResult<i32> {
        let layout = self.layout(topic).await?;
        let leader = *layout
            .get(&partition)
            .ok_or_else(|| EngineError::InvalidPartition {
                topic: topic.to_string(),
                partition: partition.to_string(),
            })?;
        if leader < 0 {
            self.layouts.remove(topic);
            return Err(EngineError::LeaderNotAvailable {
                topic: topic.to_string(),
                partition,
            });
        }
        Ok(leader)
    }

    async fn list_offsets(
        &self,
        leader: i32,
        topic: &str,
        partitions: &[i32],
        timestamp: i64,
    ) -> EngineResult<HashMap<i32, i64>> {
        let request = ListOffsetsRequest::default()
            .with_replica_id(BrokerId(-1))
            .with_isolation_level(0)
            .with_topics(vec![ListOffsetsTopic::default()
                .with_name(topic_name(topic))
                .with_partitions(
                    partitions
                        .iter()
                        .map(|&p| {
                            ListOffsetsPartition::default()
                                .with_partition_index(p)
                                .with_current_leader_epoch(-1)
                                .with_timestamp(timestamp)
                        })
                        .collect(),
                )]);

        let response: ListOffsetsResponse = self
            .pool
            .request(Some(leader), ApiKey::ListOffsets, LIST_OFFSETS_VERSION, &request)
            .await?;

        let mut offsets = HashMap::with_capacity(partitions.len());
        for t in &response.topics {
            for p in &t.partitions {
                if p.error_code != error_codes::NONE {
                    if p.error_code == error_codes::NOT_LEADER_OR_FOLLOWER {
                        self.layouts.remove(topic);
                    }
                    return Err(EngineError::BrokerError {
                        topic: topic.to_string(),
                        partition: p.partition_index,
                        code: p.error_code,
                    });
                }
                offsets.insert(p.partition_index, p.offset);
            }
        }
        Ok(offsets)
    }

    async fn produce(
        &self,
        topic: String,
        partition: Option<i32>,
        key: Option<Bytes>,
        payload: Bytes,
    ) -> EngineResult<RecordMetadata> {
        let partition = match partition {
            Some(p) => p,
            None => self.choose_partition(&topic).await?,
        };
        let leader = self.leader_for(&topic, partition).await?;
        let records = encode_record_batch(key, payload)?;

        let request = ProduceRequest::default()
            .with_acks(self.acks)
            .with_timeout_ms(self.produce_timeout_ms)
            .with_topic_data(vec![TopicProduceData::default()
                .with_name(topic_name(&topic))
                .with_partition_data(vec![PartitionProduceData::default()
                    .with_index(partition)
                    .with_records(Some(records))])]);

        let response: ProduceResponse = self
            .pool
            .request(Some(leader), ApiKey::Produce, PRODUCE_VERSION, &request)
            .await?;

        let result = response
            .responses
            .iter()
            .flat_map(|t| t.partition_responses.iter())
            .find(|p| p.index == partition)
            .ok_or_else(|| EngineError::ProtocolDecode {
                message: format!("produce response has no entry for {topic}/{partition}"),
            })?;

        if result.error_code != error_codes::NONE {
            if matches!(
                result.error_code,
                error_codes::NOT_LEADER_OR_FOLLOWER | error_codes::LEADER_NOT_AVAILABLE
            ) {
                self.layouts.remove(&topic);
            }
            return Err(EngineError::BrokerError {
                topic,
                partition,
                code: result.error_code,
            });
        }

        Ok(RecordMetadata {
            partition,
            offset: result.base_offset,
        })
    }
}

#[async_trait]
impl PartitionDirectory for KafkaLogEngine {
    async fn list_topics(&self) -> EngineResult<BTreeSet<String>> {
        let response = self.state.fetch_metadata(None).await?;
        Ok(response
            .topics
            .iter()
            .filter(|t| t.error_code == error_codes::NONE && !t.is_internal)
            .filter_map(|t| t.name.as_ref().map(|n| n.to_string()))
            .collect())
    }

    async fn list_partitions(&self, topic: &str) -> EngineResult<Vec<PartitionWatermarks>> {
        let response = self.state.fetch_metadata(Some(topic)).await?;
        let metadata = response
            .topics
            .iter()
            .find(|t| t.name.as_ref().is_some_and(|n| n.to_string() == topic))
            .ok_or_else(|| EngineError::UnknownTopic {
                topic: topic.to_string(),
            })?;

        match metadata.error_code {
            error_codes::NONE => {}
            error_codes::UNKNOWN_TOPIC_OR_PARTITION => {
                return Err(EngineError::UnknownTopic {
                    topic: topic.to_string(),
                })
            }
            code => {
                return Err(EngineError::BrokerError {
                    topic: topic.to_string(),
                    partition: -1,
                    code,
                })
            }
        }

        let mut by_leader: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
        for p in &metadata.partitions {
            if p.leader_id.0 < 0 {
                return Err(EngineError::LeaderNotAvailable {
                    topic: topic.to_string(),
                    partition: p.partition_index,
                });
            }
            by_leader
                .entry(p.leader_id.0)
                .or_default()
                .push(p.partition_index);
        }

        let mut watermarks = Vec::with_capacity(metadata.partitions.len());
        for (leader, partitions) in by_leader {
            let earliest = self
                .state
                .list_offsets(leader, topic, &partitions, EARLIEST_TIMESTAMP)
                .await?;
            let latest = self
                .state
                .list_offsets(leader, topic, &partitions, LATEST_TIMESTAMP)
                .await?;

            for partition in partitions {
                match (earliest.get(&partition), latest.get(&partition)) {
                    (Some(&e), Some(&l)) => {
                        watermarks.push(PartitionWatermarks::new(partition, e, l));
                    }
                    _ => {
                        return Err(EngineError::ProtocolDecode {
                            message: format!("no offsets returned for {topic}/{partition}"),
                        })
                    }
                }
            }
        }

        watermarks.sort_by_key(|w| w.partition);
        debug!(topic, partitions = watermarks.len(), "partition snapshot taken");
        Ok(watermarks)
    }
}

impl LogEngine for KafkaLogEngine {
    /// Each produce runs on its own task and its own broker stream, bounded
    /// by `kafka.request_timeout_ms`. A produce the caller stopped waiting
    /// for keeps only its stream busy; later sends to the same leader dial
    /// another stream instead of queueing behind it.
    fn send(&self, record: ProducerRecord) -> EngineResult<SendFuture> {
        let partition = record
            .partition
            .as_deref()
            .map(|id| parse_partition(&record.topic, id))
            .transpose()?;

        let runtime = Handle::try_current()
            .map_err(|e| EngineError::Internal(format!("no async runtime: {e}")))?;

        let permit = Arc::clone(&self.in_flight)
            .try_acquire_owned()
            .map_err(|_| {
                warn!(
                    topic = %record.topic,
                    limit = self.max_in_flight,
                    "send buffer exhausted"
                );
                EngineError::BufferExhausted {
                    limit: self.max_in_flight,
                }
            })?;

        let state = Arc::clone(&self.state);
        let task = runtime.spawn(async move {
            let _permit = permit;
            state
                .produce(record.topic, partition, record.key, record.payload)
                .await
        });

        Ok(Box::pin(async move {
            task.await
                .map_err(|e| EngineError::Internal(format!("send task failed: {e}")))?
        }))
    }
}

fn topic_name(name: &str) -> TopicName {
    TopicName(StrBytes::from_string(name.to_string()))
}

/// Parse a portable partition id into a Kafka partition index.
fn parse_partition(topic: &str, id: &str) -> EngineResult<i32> {
    let invalid = || EngineError::InvalidPartition {
        topic: topic.to_string(),
        partition: id.to_string(),
    };
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    id.parse::<i32>().map_err(|_| invalid())
}

/// Encode a single-record v2 batch.
fn encode_record_batch(key: Option<Bytes>, payload: Bytes) -> EngineResult<Bytes> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0);

    let record = Record {
        transactional: false,
        control: false,
        partition_leader_epoch: -1,
        producer_id: -1,
        producer_epoch: -1,
        timestamp_type: TimestampType::Creation,
        offset: 0,
        sequence: -1,
        timestamp,
        key,
        value: Some(payload),
        headers: Default::default(),
    };

    let options = RecordEncodeOptions {
        version: 2,
        compression: Compression::None,
    };

    let mut buf = BytesMut::new();
    RecordBatchEncoder::encode(&mut buf, std::slice::from_ref(&record), &options).map_err(
        |e| EngineError::ProtocolEncode {
            message: format!("record batch: {e}"),
        },
    )?;
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(max_in_flight_sends: usize) -> KafkaConfig {
        KafkaConfig {
            bootstrap_servers: vec!["127.0.0.1:59999".to_string()],
            client_id: "test".to_string(),
            connection_timeout_ms: 100,
            request_timeout_ms: 1000,
            metadata_refresh_interval_secs: 0,
            acks: -1,
            max_in_flight_sends,
        }
    }

    fn offline_engine(max_in_flight_sends: usize) -> KafkaLogEngine {
        let config = test_config(max_in_flight_sends);
        KafkaLogEngine::with_pool(Arc::new(BrokerPool::new(config.clone())), &config)
    }

    fn record(partition: Option<&str>) -> ProducerRecord {
        ProducerRecord {
            topic: "my-topic".to_string(),
            partition: partition.map(ToString::to_string),
            key: None,
            payload: Bytes::from_static(b"{}"),
        }
    }

    #[test]
    fn test_parse_partition() {
        assert_eq!(parse_partition("t", "0").unwrap(), 0);
        assert_eq!(parse_partition("t", "17").unwrap(), 17);
        for bad in ["", "-1", "+1", "abc", "1.0", "99999999999"] {
            assert!(
                matches!(parse_partition("t", bad), Err(EngineError::InvalidPartition { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_encode_record_batch() {
        let batch = encode_record_batch(Some(Bytes::from_static(b"1")), Bytes::from_static(b"{}"))
            .unwrap();
        // base offset (8) + batch length (4) + leader epoch (4) + magic (1)
        assert!(batch.len() > 17);
        assert_eq!(batch[16], 2, "magic byte must be 2");
    }

    #[tokio::test]
    async fn test_invalid_partition_rejected_synchronously() {
        let engine = offline_engine(8);
        let result = engine.send(record(Some("abc")));
        assert!(matches!(result, Err(EngineError::InvalidPartition { .. })));
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_buffer_exhausted() {
        let engine = offline_engine(1);

        let first = engine.send(record(Some("0")));
        assert!(first.is_ok());
        let second = engine.send(record(Some("1")));
        assert!(matches!(
            second,
            Err(EngineError::BufferExhausted { limit: 1 })
        ));
    }

    #[tokio::test]
    async fn test_send_fails_asynchronously_without_brokers() {
        let engine = offline_engine(8);

        let confirmation = engine.send(record(Some("0"))).unwrap();
        let result = confirmation.await;
        assert!(matches!(result, Err(EngineError::NoBrokersAvailable)));
        assert_eq!(engine.in_flight(), 0);
    }
}
