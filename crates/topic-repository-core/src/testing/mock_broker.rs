//! Mock Kafka broker for integration testing.
//!
//! A lightweight single-node broker that:
//! - Accepts Kafka protocol connections
//! - Records all requests received
//! - Answers Metadata, ListOffsets and Produce from an in-memory cluster
//! - Returns custom responses for registered API keys

use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::list_offsets_response::{
    ListOffsetsPartitionResponse, ListOffsetsTopicResponse,
};
use kafka_protocol::messages::metadata_response::{
    MetadataResponseBroker, MetadataResponsePartition, MetadataResponseTopic,
};
use kafka_protocol::messages::produce_response::{PartitionProduceResponse, TopicProduceResponse};
use kafka_protocol::messages::{
    BrokerId, ListOffsetsRequest, ListOffsetsResponse, MetadataRequest, MetadataResponse,
    ProduceRequest, ProduceResponse, RequestHeader, ResponseHeader, TopicName,
};
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion, StrBytes};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock as SyncRwLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};

use crate::broker::protocol::{error_codes, EARLIEST_TIMESTAMP};
use crate::engine::PartitionWatermarks;

/// API keys for Kafka protocol
pub mod api_keys {
    pub const PRODUCE: i16 = 0;
    pub const LIST_OFFSETS: i16 = 2;
    pub const METADATA: i16 = 3;
    pub const API_VERSIONS: i16 = 18;
}

/// Node id the mock broker advertises for itself.
pub const MOCK_NODE_ID: i32 = 1;

/// A recorded broker call.
#[derive(Debug, Clone)]
pub struct BrokerCall {
    /// The API key of the request.
    pub api_key: i16,
    /// The API version of the request.
    pub api_version: i16,
    /// The correlation ID.
    pub correlation_id: i32,
    /// The raw request bytes (without length prefix).
    pub request_bytes: Bytes,
}

/// Response generator function type.
pub type ResponseGenerator = Arc<dyn Fn(&BrokerCall) -> Bytes + Send + Sync>;

/// Topics and partitions served by the mock broker.
#[derive(Debug, Default)]
struct MockCluster {
    host: String,
    port: i32,
    topics: BTreeMap<String, Vec<PartitionWatermarks>>,
    internal: BTreeSet<String>,
    produce_errors: HashMap<(String, i32), i16>,
    produce_delays: HashMap<(String, i32), Duration>,
}

type SharedCluster = Arc<SyncRwLock<MockCluster>>;

/// Mock Kafka broker for testing.
pub struct MockBroker {
    address: String,
    listener: Option<TcpListener>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    call_log: Arc<RwLock<Vec<BrokerCall>>>,
    response_handlers: Arc<RwLock<HashMap<i16, ResponseGenerator>>>,
    cluster: SharedCluster,
}

impl MockBroker {
    /// Create a new mock broker that will bind to the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            listener: None,
            shutdown_tx: None,
            call_log: Arc::new(RwLock::new(Vec::new())),
            response_handlers: Arc::new(RwLock::new(HashMap::new())),
            cluster: SharedCluster::default(),
        }
    }

    /// Start the mock broker.
    ///
    /// Returns the actual address the broker is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn start(&mut self) -> std::io::Result<String> {
        let listener = TcpListener::bind(&self.address).await?;
        let local = listener.local_addr()?;
        let actual_address = local.to_string();
        self.address = actual_address.clone();

        if let Ok(mut cluster) = self.cluster.write() {
            cluster.host = local.ip().to_string();
            cluster.port = i32::from(local.port());
        }

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let call_log = self.call_log.clone();
        let response_handlers = self.response_handlers.clone();
        let cluster = self.cluster.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        // Spawn the accept loop
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _addr)) => {
                                let call_log = call_log.clone();
                                let response_handlers = response_handlers.clone();
                                let cluster = cluster.clone();
                                let shutdown_rx = shutdown_tx.subscribe();

                                tokio::spawn(async move {
                                    Self::handle_connection(
                                        stream,
                                        call_log,
                                        response_handlers,
                                        cluster,
                                        shutdown_rx,
                                    )
                                    .await;
                                });
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        Ok(actual_address)
    }

    /// Stop the mock broker.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Register a response handler for a specific API key.
    pub async fn register_handler(&self, api_key: i16, handler: ResponseGenerator) {
        self.response_handlers
            .write()
            .await
            .insert(api_key, handler);
    }

    /// Get all recorded calls.
    pub async fn get_calls(&self) -> Vec<BrokerCall> {
        self.call_log.read().await.clone()
    }

    /// Get calls filtered by API key.
    pub async fn get_calls_for_api(&self, api_key: i16) -> Vec<BrokerCall> {
        self.call_log
            .read()
            .await
            .iter()
            .filter(|c| c.api_key == api_key)
            .cloned()
            .collect()
    }

    /// Clear the call log.
    pub async fn clear_calls(&self) {
        self.call_log.write().await.clear();
    }

    /// Get the broker address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Add or replace a topic with `(partition, earliest, latest)` watermarks.
    pub fn add_topic(&self, topic: &str, partitions: &[(i32, i64, i64)]) {
        if let Ok(mut cluster) = self.cluster.write() {
            let watermarks = partitions
                .iter()
                .map(|&(p, earliest, latest)| PartitionWatermarks::new(p, earliest, latest))
                .collect();
            cluster.topics.insert(topic.to_string(), watermarks);
        }
    }

    /// Add a topic flagged as internal, like `__consumer_offsets`.
    pub fn add_internal_topic(&self, topic: &str, partitions: &[(i32, i64, i64)]) {
        self.add_topic(topic, partitions);
        if let Ok(mut cluster) = self.cluster.write() {
            cluster.internal.insert(topic.to_string());
        }
    }

    /// Answer produce requests for one partition with `code`.
    pub fn set_produce_error(&self, topic: &str, partition: i32, code: i16) {
        if let Ok(mut cluster) = self.cluster.write() {
            cluster
                .produce_errors
                .insert((topic.to_string(), partition), code);
        }
    }

    /// Hold produce responses that touch one partition for `delay`.
    pub fn set_produce_delay(&self, topic: &str, partition: i32, delay: Duration) {
        if let Ok(mut cluster) = self.cluster.write() {
            cluster
                .produce_delays
                .insert((topic.to_string(), partition), delay);
        }
    }

    /// Current watermarks of one partition.
    #[must_use]
    pub fn watermarks(&self, topic: &str, partition: i32) -> Option<PartitionWatermarks> {
        let cluster = self.cluster.read().ok()?;
        cluster
            .topics
            .get(topic)?
            .iter()
            .find(|w| w.partition == partition)
            .copied()
    }

    /// Handle a single client connection.
    async fn handle_connection(
        mut stream: TcpStream,
        call_log: Arc<RwLock<Vec<BrokerCall>>>,
        response_handlers: Arc<RwLock<HashMap<i16, ResponseGenerator>>>,
        cluster: SharedCluster,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                result = Self::read_frame(&mut stream) => {
                    match result {
                        Ok(Some(frame)) => {
                            if frame.len() < 8 {
                                continue;
                            }

                            let api_key = i16::from_be_bytes([frame[0], frame[1]]);
                            let api_version = i16::from_be_bytes([frame[2], frame[3]]);
                            let correlation_id = i32::from_be_bytes([
                                frame[4], frame[5], frame[6], frame[7],
                            ]);

                            let call = BrokerCall {
                                api_key,
                                api_version,
                                correlation_id,
                                request_bytes: Bytes::copy_from_slice(&frame),
                            };

                            call_log.write().await.push(call.clone());

                            let response = {
                                let handlers = response_handlers.read().await;
                                if let Some(handler) = handlers.get(&api_key) {
                                    handler(&call)
                                } else {
                                    Self::cluster_response(&call, &cluster)
                                }
                            };

                            if let Some(delay) = Self::produce_delay(&call, &cluster) {
                                tokio::time::sleep(delay).await;
                            }
                            if Self::write_frame(&mut stream, &response).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(_) => break,
                    }
                }
            }
        }
    }

    /// Read a Kafka frame (4-byte length prefix + body).
    async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await?;
        Ok(Some(buf))
    }

    /// Write a Kafka frame (4-byte length prefix + body).
    async fn write_frame(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
        let mut buf = BytesMut::with_capacity(4 + data.len());
        buf.put_u32(data.len() as u32);
        buf.extend_from_slice(data);
        stream.write_all(&buf).await?;
        stream.flush().await
    }

    /// Generate a default response (correlation ID only).
    fn default_response(call: &BrokerCall) -> Bytes {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_i32(call.correlation_id);
        buf.freeze()
    }

    fn produce_delay(call: &BrokerCall, cluster: &SharedCluster) -> Option<Duration> {
        if call.api_key != api_keys::PRODUCE {
            return None;
        }
        let request = decode_request::<ProduceRequest>(call)?;
        let cluster = cluster.read().ok()?;
        request
            .topic_data
            .iter()
            .flat_map(|t| {
                t.partition_data
                    .iter()
                    .map(move |p| (t.name.to_string(), p.index))
            })
            .filter_map(|key| cluster.produce_delays.get(&key).copied())
            .max()
    }

    fn cluster_response(call: &BrokerCall, cluster: &SharedCluster) -> Bytes {
        let response = match call.api_key {
            api_keys::METADATA => decode_request::<MetadataRequest>(call).and_then(|request| {
                let cluster = cluster.read().ok()?;
                encode_response(call, &metadata(&cluster, &request))
            }),
            api_keys::LIST_OFFSETS => {
                decode_request::<ListOffsetsRequest>(call).and_then(|request| {
                    let cluster = cluster.read().ok()?;
                    encode_response(call, &list_offsets(&cluster, &request))
                })
            }
            api_keys::PRODUCE => decode_request::<ProduceRequest>(call).and_then(|request| {
                let mut cluster = cluster.write().ok()?;
                encode_response(call, &produce(&mut cluster, &request))
            }),
            _ => None,
        };
        response.unwrap_or_else(|| Self::default_response(call))
    }
}

fn decode_request<R: Decodable + HeaderVersion>(call: &BrokerCall) -> Option<R> {
    let mut buf = call.request_bytes.clone();
    RequestHeader::decode(&mut buf, R::header_version(call.api_version)).ok()?;
    R::decode(&mut buf, call.api_version).ok()
}

fn encode_response<R: Encodable + HeaderVersion>(call: &BrokerCall, response: &R) -> Option<Bytes> {
    let mut buf = BytesMut::new();
    ResponseHeader::default()
        .with_correlation_id(call.correlation_id)
        .encode(&mut buf, R::header_version(call.api_version))
        .ok()?;
    response.encode(&mut buf, call.api_version).ok()?;
    Some(buf.freeze())
}

fn topic_name(name: &str) -> TopicName {
    TopicName(StrBytes::from_string(name.to_string()))
}

fn metadata(cluster: &MockCluster, request: &MetadataRequest) -> MetadataResponse {
    let names: Vec<String> = match &request.topics {
        Some(topics) => topics
            .iter()
            .filter_map(|t| t.name.as_ref().map(|n| n.to_string()))
            .collect(),
        None => cluster.topics.keys().cloned().collect(),
    };

    let topics = names
        .into_iter()
        .map(|name| match cluster.topics.get(&name) {
            Some(partitions) => MetadataResponseTopic::default()
                .with_name(Some(topic_name(&name)))
                .with_is_internal(cluster.internal.contains(&name))
                .with_partitions(
                    partitions
                        .iter()
                        .map(|w| {
                            MetadataResponsePartition::default()
                                .with_partition_index(w.partition)
                                .with_leader_id(BrokerId(MOCK_NODE_ID))
                                .with_replica_nodes(vec![BrokerId(MOCK_NODE_ID)])
                                .with_isr_nodes(vec![BrokerId(MOCK_NODE_ID)])
                        })
                        .collect(),
                ),
            None => MetadataResponseTopic::default()
                .with_error_code(error_codes::UNKNOWN_TOPIC_OR_PARTITION)
                .with_name(Some(topic_name(&name))),
        })
        .collect();

    MetadataResponse::default()
        .with_brokers(vec![MetadataResponseBroker::default()
            .with_node_id(BrokerId(MOCK_NODE_ID))
            .with_host(StrBytes::from_string(cluster.host.clone()))
            .with_port(cluster.port)])
        .with_cluster_id(Some(StrBytes::from_static_str("mock-cluster")))
        .with_controller_id(BrokerId(MOCK_NODE_ID))
        .with_topics(topics)
}

fn list_offsets(cluster: &MockCluster, request: &ListOffsetsRequest) -> ListOffsetsResponse {
    let topics = request
        .topics
        .iter()
        .map(|t| {
            let name = t.name.to_string();
            let partitions = t
                .partitions
                .iter()
                .map(|p| {
                    let response =
                        ListOffsetsPartitionResponse::default().with_partition_index(p.partition_index);
                    let watermarks = cluster
                        .topics
                        .get(&name)
                        .and_then(|ws| ws.iter().find(|w| w.partition == p.partition_index));
                    match watermarks {
                        Some(w) => response.with_timestamp(-1).with_offset(
                            if p.timestamp == EARLIEST_TIMESTAMP {
                                w.earliest
                            } else {
                                w.latest
                            },
                        ),
                        None => response
                            .with_error_code(error_codes::UNKNOWN_TOPIC_OR_PARTITION)
                            .with_offset(-1),
                    }
                })
                .collect();
            ListOffsetsTopicResponse::default()
                .with_name(t.name.clone())
                .with_partitions(partitions)
        })
        .collect();

    ListOffsetsResponse::default().with_topics(topics)
}

/// Each partition entry of a produce request appends one record.
fn produce(cluster: &mut MockCluster, request: &ProduceRequest) -> ProduceResponse {
    let mut responses = Vec::with_capacity(request.topic_data.len());
    for t in &request.topic_data {
        let name = t.name.to_string();
        let mut partition_responses = Vec::with_capacity(t.partition_data.len());
        for p in &t.partition_data {
            let response = PartitionProduceResponse::default()
                .with_index(p.index)
                .with_log_append_time_ms(-1);

            if let Some(&code) = cluster.produce_errors.get(&(name.clone(), p.index)) {
                partition_responses.push(response.with_error_code(code).with_base_offset(-1));
                continue;
            }

            let watermarks = cluster
                .topics
                .get_mut(&name)
                .and_then(|ws| ws.iter_mut().find(|w| w.partition == p.index));
            match watermarks {
                Some(w) => {
                    let base_offset = w.latest;
                    w.latest += 1;
                    partition_responses.push(
                        response
                            .with_base_offset(base_offset)
                            .with_log_start_offset(w.earliest),
                    );
                }
                None => partition_responses.push(
                    response
                        .with_error_code(error_codes::UNKNOWN_TOPIC_OR_PARTITION)
                        .with_base_offset(-1),
                ),
            }
        }
        responses.push(
            TopicProduceResponse::default()
                .with_name(t.name.clone())
                .with_partition_responses(partition_responses),
        );
    }

    ProduceResponse::default().with_responses(responses)
}
