//! Test utilities for the topic repository.
//!
//! This module provides infrastructure for integration testing:
//!
//! - [`InMemoryEngine`] - A deterministic directory and log engine
//! - [`MockBroker`] - A lightweight mock Kafka broker for testing
//! - [`RepositoryTestHarness`] - A repository over the in-memory fixture cluster
//! - [`KafkaTestHarness`] - A repository over a Kafka engine and mock broker
//! - [`TestHarnessBuilder`] - Builder pattern for custom test configurations
//!
//! # Example
//!
//! ```rust,ignore
//! use topic_repository_core::testing::RepositoryTestHarness;
//!
//! #[tokio::test]
//! async fn test_list_partitions() {
//!     let harness = RepositoryTestHarness::new();
//!
//!     let partitions = harness.repository.list_partitions("my-topic").await.unwrap();
//!     assert_eq!(partitions.len(), 3);
//! }
//! ```

pub mod harness;
pub mod in_memory;
pub mod mock_broker;

pub use harness::{
    fixture_calibration, fixture_topics, KafkaTestHarness, RepositoryTestHarness,
    TestHarnessBuilder,
};
pub use in_memory::{InMemoryEngine, SendBehaviour};
pub use mock_broker::{api_keys, BrokerCall, MockBroker, ResponseGenerator};
