//! Domain error types for the topic repository.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.

use thiserror::Error;

use crate::cursor::Cursor;

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The calibration table has no tiers.
    #[error("partition calibration table must contain at least one tier")]
    EmptyCalibrationTable,

    /// Calibration thresholds must grow strictly from tier to tier.
    #[error("calibration tier {index}: bytes_per_second {bytes_per_second} must be greater than the previous tier's {previous}")]
    UnorderedCalibrationTier {
        index: usize,
        bytes_per_second: u64,
        previous: u64,
    },

    /// Partition counts must never shrink as throughput grows.
    #[error("calibration tier {index}: partitions {partitions} must be at least the previous tier's {previous}")]
    DecreasingCalibrationTier {
        index: usize,
        partitions: u32,
        previous: u32,
    },

    /// Every tier must recommend at least one partition.
    #[error("calibration tier {index}: partitions must be at least 1")]
    ZeroPartitionTier { index: usize },

    /// Maximum partitions per topic must be at least 1.
    #[error("max_partitions must be at least 1, got {0}")]
    InvalidMaxPartitions(u32),

    /// At least one bootstrap server is required.
    #[error("kafka.bootstrap_servers must not be empty")]
    NoBootstrapServers,

    /// The in-flight send limit must be at least 1.
    #[error("kafka.max_in_flight_sends must be at least 1")]
    InvalidInFlightLimit,

    /// Only acknowledged produce modes are supported.
    #[error("kafka.acks must be -1 or 1, got {0}")]
    InvalidAcks(i16),

    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Why a single cursor was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorError {
    /// The cursor has no partition id.
    #[error("cursor partition is missing")]
    NullPartition,

    /// The cursor has no offset.
    #[error("cursor offset is missing")]
    NullOffset,

    /// The partition is absent from the current snapshot.
    #[error("partition not found")]
    PartitionNotFound,

    /// The offset is neither the sentinel nor a non-negative integer.
    #[error("invalid offset format")]
    InvalidFormat,

    /// The partition holds no messages and the offset is not the sentinel.
    #[error("partition is empty")]
    EmptyPartition,

    /// The offset has expired from retention or has not been written yet.
    #[error("offset unavailable")]
    Unavailable,
}

impl CursorError {
    /// Stable label used for metrics and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NullPartition => "null_partition",
            Self::NullOffset => "null_offset",
            Self::PartitionNotFound => "partition_not_found",
            Self::InvalidFormat => "invalid_format",
            Self::EmptyPartition => "empty_partition",
            Self::Unavailable => "unavailable",
        }
    }
}

/// A cursor that failed validation, with the exact reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid cursor {cursor}: {error}")]
pub struct InvalidCursorError {
    /// The offending cursor as supplied by the caller.
    pub cursor: Cursor,
    /// The classified reason.
    pub error: CursorError,
}

impl InvalidCursorError {
    #[must_use]
    pub fn new(cursor: Cursor, error: CursorError) -> Self {
        Self { cursor, error }
    }
}

/// A batch publish in which at least one item did not succeed.
///
/// Per-item details stay on the items themselves.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("failed to publish {failed} of {total} events")]
pub struct EventPublishingError {
    /// Number of items that ended in `Failed`.
    pub failed: usize,
    /// Number of items in the batch.
    pub total: usize,
}

/// Errors raised by the log engine client and the partition directory.
#[derive(Error, Debug)]
pub enum EngineError {
    /// TCP/IO connection error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Failed to decode Kafka protocol message.
    #[error("protocol decode error: {message}")]
    ProtocolDecode { message: String },

    /// Failed to encode Kafka protocol message.
    #[error("protocol encode error: {message}")]
    ProtocolEncode { message: String },

    /// Broker is not available or connection failed.
    #[error("broker {broker_id} unavailable: {message}")]
    BrokerUnavailable { broker_id: i32, message: String },

    /// No brokers available to handle request.
    #[error("no brokers available")]
    NoBrokersAvailable,

    /// Request correlation ID mismatch.
    #[error("correlation ID mismatch: expected {expected}, got {actual}")]
    CorrelationIdMismatch { expected: i32, actual: i32 },

    /// Topic is not known to the cluster.
    #[error("unknown topic: {topic}")]
    UnknownTopic { topic: String },

    /// Partition id cannot be addressed on the engine.
    #[error("invalid partition '{partition}' for topic {topic}")]
    InvalidPartition { topic: String, partition: String },

    /// No leader is currently known for the partition.
    #[error("no leader for {topic}/{partition}")]
    LeaderNotAvailable { topic: String, partition: i32 },

    /// The client refused the send because too many are in flight.
    #[error("send buffer exhausted ({limit} sends in flight)")]
    BufferExhausted { limit: usize },

    /// The broker answered with a Kafka error code.
    #[error("broker returned error code {code} for {topic}/{partition}")]
    BrokerError {
        topic: String,
        partition: i32,
        code: i16,
    },

    /// Anything else that prevented confirmation.
    #[error("internal engine error: {0}")]
    Internal(String),
}

/// Errors surfaced by the topic repository facade.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// A cursor failed validation.
    #[error(transparent)]
    InvalidCursor(#[from] InvalidCursorError),

    /// A batch publish did not fully succeed.
    #[error(transparent)]
    EventPublishing(#[from] EventPublishingError),

    /// Topic was not found in the directory.
    #[error("topic not found: {topic}")]
    TopicNotFound { topic: String },

    /// Partition was not found in the directory.
    #[error("partition {partition} not found for topic {topic}")]
    PartitionNotFound { topic: String, partition: String },

    /// The partition directory or engine client could not be reached.
    #[error("repository unavailable: {0}")]
    Unavailable(#[source] EngineError),
}

impl From<EngineError> for RepositoryError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::UnknownTopic { topic } => Self::TopicNotFound { topic },
            other => Self::Unavailable(other),
        }
    }
}

/// Result type alias for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for engine and directory operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
