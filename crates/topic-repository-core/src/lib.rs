//! Topic Repository Core Library
//!
//! This library exposes a partitioned, append-only event log (a Kafka
//! cluster) to clients as named topics whose partitions are addressed by
//! string ids and read from string cursors.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`cursor`] - Cursor offsets, the before-oldest sentinel and validation
//! - [`engine`] - The directory and log engine seams
//! - [`broker`] - Kafka connection pool and the Kafka-backed engine
//! - [`publish`] - Batch publishing with per-item outcomes
//! - [`partitioning`] - Partition count sizing from a calibration table
//! - [`repository`] - The [`TopicRepository`] facade
//! - [`metrics`] - Prometheus metrics collection
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use topic_repository_core::{KafkaLogEngine, RepositoryConfig, TopicRepository};
//!
//! let config = RepositoryConfig::from_file("config.yaml")?;
//! let engine = Arc::new(KafkaLogEngine::connect(&config.kafka).await?);
//! let repository = TopicRepository::new(
//!     engine.clone(),
//!     engine,
//!     config.repository_settings()?,
//! );
//!
//! for partition in repository.list_partitions("orders").await? {
//!     println!("{} {}", partition.partition_id, partition.newest_available_offset);
//! }
//! ```

#![forbid(unsafe_code)]

pub mod broker;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod partitioning;
pub mod publish;
pub mod repository;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use broker::{BrokerPool, KafkaLogEngine, MetadataRefresher};
pub use config::RepositoryConfig;
pub use cursor::{Cursor, BEFORE_OLDEST_OFFSET};
pub use engine::{EngineReadPosition, LogEngine, PartitionDirectory, PartitionWatermarks};
pub use error::{
    ConfigError, CursorError, EngineError, EventPublishingError, InvalidCursorError,
    RepositoryError, Result,
};
pub use metrics::RepositoryMetrics;
pub use partitioning::{CalibrationTable, CalibrationTier, ThroughputProfile};
pub use publish::{BatchItem, PublishResult, PublishingStatus};
pub use repository::{EventConsumer, RepositorySettings, TopicPartition, TopicRepository};
