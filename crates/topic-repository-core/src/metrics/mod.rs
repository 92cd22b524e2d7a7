//! Metrics collection for the topic repository.
//!
//! Provides Prometheus-compatible metrics for cursor validation, publishing
//! outcomes and directory availability.

pub mod prometheus;

pub use prometheus::RepositoryMetrics;
