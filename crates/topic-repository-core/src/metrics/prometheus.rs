//! Prometheus metrics for the topic repository.
//!
//! Provides counters and histograms for cursor validation, batch publishing
//! and partition directory health.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::error::CursorError;
use crate::publish::PublishingStatus;

/// Repository metrics collection.
pub struct RepositoryMetrics {
    /// The Prometheus registry.
    pub registry: Registry,

    /// Published events by terminal status.
    pub events_published: IntCounterVec,

    /// Rejected cursors by error kind.
    pub cursor_rejections: IntCounterVec,

    /// Wall time of a whole batch publish.
    pub publish_batch_duration_seconds: Histogram,

    /// Failed partition directory lookups.
    pub directory_errors: IntCounter,
}

impl RepositoryMetrics {
    /// Create a new metrics collection.
    ///
    /// # Panics
    ///
    /// Panics if metric registration fails (should not happen with unique names).
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_published = IntCounterVec::new(
            Opts::new(
                "topic_repository_events_published_total",
                "Events that reached a terminal publishing status",
            ),
            &["status"],
        )
        .expect("metric creation should succeed");

        let cursor_rejections = IntCounterVec::new(
            Opts::new(
                "topic_repository_cursor_rejections_total",
                "Cursors rejected during consumer creation by error kind",
            ),
            &["error"],
        )
        .expect("metric creation should succeed");

        let publish_batch_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "topic_repository_publish_batch_duration_seconds",
                "Time to bring every item of a batch to a terminal status",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
        )
        .expect("metric creation should succeed");

        let directory_errors = IntCounter::new(
            "topic_repository_directory_errors_total",
            "Partition directory lookups that failed",
        )
        .expect("metric creation should succeed");

        registry
            .register(Box::new(events_published.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(cursor_rejections.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(publish_batch_duration_seconds.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(directory_errors.clone()))
            .expect("metric registration should succeed");

        Self {
            registry,
            events_published,
            cursor_rejections,
            publish_batch_duration_seconds,
            directory_errors,
        }
    }

    /// Record one item reaching a terminal status.
    pub fn record_event(&self, status: PublishingStatus) {
        self.events_published
            .with_label_values(&[status.as_str()])
            .inc();
    }

    /// Record a rejected cursor.
    pub fn record_cursor_rejection(&self, error: CursorError) {
        self.cursor_rejections
            .with_label_values(&[error.as_str()])
            .inc();
    }

    /// Record batch publish duration.
    pub fn record_batch_duration(&self, duration_seconds: f64) {
        self.publish_batch_duration_seconds.observe(duration_seconds);
    }

    pub fn record_directory_error(&self) {
        self.directory_errors.inc();
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = String::new();
        encoder.encode_utf8(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for RepositoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}
