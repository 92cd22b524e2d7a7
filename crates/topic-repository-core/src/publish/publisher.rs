use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, warn};

use super::{BatchItem, PublishResult, PublishingStatus};
use crate::engine::{LogEngine, ProducerRecord};
use crate::error::EventPublishingError;
use crate::metrics::RepositoryMetrics;

/// Failure detail when no confirmation arrived within the send timeout.
pub const TIMED_OUT_DETAIL: &str = "timed out";

/// Failure detail when the engine refused or failed the send.
pub const INTERNAL_ERROR_DETAIL: &str = "internal error";

/// Sends batches to a [`LogEngine`] and records per-item outcomes.
pub struct BatchPublisher {
    engine: Arc<dyn LogEngine>,
    send_timeout: Duration,
    metrics: Option<Arc<RepositoryMetrics>>,
}

impl BatchPublisher {
    pub fn new(engine: Arc<dyn LogEngine>, send_timeout: Duration) -> Self {
        Self {
            engine,
            send_timeout,
            metrics: None,
        }
    }

    /// Record outcomes into `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<RepositoryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Publish `items` to `topic`, updating each item's result in place.
    ///
    /// Sends are dispatched independently and awaited concurrently, each
    /// bounded by the send timeout. Sends that time out are not cancelled
    /// at the engine and are never retried.
    ///
    /// # Errors
    ///
    /// Returns [`EventPublishingError`] if any item ended `Failed`. All items
    /// are terminal by then.
    pub async fn publish(
        &self,
        topic: &str,
        items: &mut [BatchItem],
    ) -> Result<(), EventPublishingError> {
        let started = Instant::now();
        let mut in_flight = Vec::with_capacity(items.len());

        for (index, item) in items.iter_mut().enumerate() {
            let record = ProducerRecord {
                topic: topic.to_string(),
                partition: item.partition.clone(),
                key: item
                    .partition
                    .as_ref()
                    .map(|p| Bytes::copy_from_slice(p.as_bytes())),
                payload: item.payload.clone(),
            };

            match self.engine.send(record) {
                Ok(confirmation) => {
                    item.result = PublishResult::submitted();
                    in_flight.push((index, confirmation));
                }
                Err(e) => {
                    warn!(
                        topic,
                        partition = ?item.partition,
                        error = %e,
                        "engine rejected send"
                    );
                    item.result = PublishResult::failed(INTERNAL_ERROR_DETAIL);
                }
            }
        }

        let timeout = self.send_timeout;
        let outcomes = join_all(in_flight.into_iter().map(|(index, confirmation)| async move {
            (index, tokio::time::timeout(timeout, confirmation).await)
        }))
        .await;

        for (index, outcome) in outcomes {
            let item = &mut items[index];
            match outcome {
                Ok(Ok(metadata)) => {
                    if item.partition.is_none() {
                        item.partition = Some(metadata.partition.to_string());
                    }
                    debug!(
                        topic,
                        partition = metadata.partition,
                        offset = metadata.offset,
                        "event confirmed"
                    );
                    item.result = PublishResult::succeeded();
                }
                Ok(Err(e)) => {
                    warn!(
                        topic,
                        partition = ?item.partition,
                        error = %e,
                        "event send failed"
                    );
                    item.result = PublishResult::failed(INTERNAL_ERROR_DETAIL);
                }
                Err(_) => {
                    warn!(
                        topic,
                        partition = ?item.partition,
                        timeout_ms = timeout.as_millis() as u64,
                        "event confirmation timed out"
                    );
                    item.result = PublishResult::failed(TIMED_OUT_DETAIL);
                }
            }
        }

        let failed = items
            .iter()
            .filter(|item| item.status() == PublishingStatus::Failed)
            .count();

        if let Some(metrics) = &self.metrics {
            for item in items.iter() {
                metrics.record_event(item.status());
            }
            metrics.record_batch_duration(started.elapsed().as_secs_f64());
        }

        debug!(
            topic,
            total = items.len(),
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch published"
        );

        if failed > 0 {
            return Err(EventPublishingError {
                failed,
                total: items.len(),
            });
        }
        Ok(())
    }
}
