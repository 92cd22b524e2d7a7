//! Kafka adapter for the partition directory and log engine.
//!
//! This module provides:
//! - Connection management to Kafka brokers
//! - Connection pooling with per-broker connections
//! - Request/response correlation and typed message framing
//! - The [`KafkaLogEngine`] directory and producer
//! - Background metadata refresh

pub mod connection;
pub mod kafka;
pub mod metadata_refresh;
pub mod pool;
pub mod protocol;

pub use connection::BrokerConnection;
pub use kafka::KafkaLogEngine;
pub use metadata_refresh::MetadataRefresher;
pub use pool::{BrokerInfo, BrokerPool};
