//! Background metadata refresh task.
//!
//! Periodically reloads broker addresses and partition leaders so sends keep
//! reaching the right broker after leadership moves, without waiting for a
//! send to fail first.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::kafka::KafkaLogEngine;

/// Background task that periodically refreshes metadata from Kafka.
pub struct MetadataRefresher {
    engine: Arc<KafkaLogEngine>,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetadataRefresher {
    /// Create a new metadata refresher.
    ///
    /// # Arguments
    ///
    /// * `engine` - The engine whose broker pool and leader cache are refreshed
    /// * `interval_secs` - Refresh interval in seconds (0 to disable)
    /// * `shutdown_rx` - Shutdown signal receiver
    #[must_use]
    pub fn new(
        engine: Arc<KafkaLogEngine>,
        interval_secs: u64,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            interval: Duration::from_secs(interval_secs),
            shutdown_rx,
        }
    }

    /// Run the background refresh loop.
    ///
    /// This method runs until a shutdown signal is received.
    pub async fn run(mut self) {
        if self.interval.is_zero() {
            info!("metadata refresh disabled (interval=0)");
            return;
        }

        info!(
            interval_secs = self.interval.as_secs(),
            "starting background metadata refresh"
        );

        let mut interval = tokio::time::interval(self.interval);
        // The engine loaded metadata when it connected
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.refresh().await;
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("metadata refresher shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn refresh(&self) {
        debug!("refreshing metadata from kafka");
        if let Err(e) = self.engine.refresh_metadata().await {
            warn!(error = %e, "failed to refresh metadata");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerPool;
    use crate::config::KafkaConfig;

    fn engine() -> Arc<KafkaLogEngine> {
        let config = KafkaConfig {
            bootstrap_servers: vec!["localhost:9092".to_string()],
            client_id: "test".to_string(),
            connection_timeout_ms: 1000,
            request_timeout_ms: 5000,
            metadata_refresh_interval_secs: 0,
            acks: -1,
            max_in_flight_sends: 8,
        };
        Arc::new(KafkaLogEngine::with_pool(
            Arc::new(BrokerPool::new(config.clone())),
            &config,
        ))
    }

    #[tokio::test]
    async fn test_disabled_when_interval_zero() {
        let (_tx, rx) = watch::channel(false);
        let refresher = MetadataRefresher::new(engine(), 0, rx);

        let result = tokio::time::timeout(Duration::from_millis(100), refresher.run()).await;

        assert!(result.is_ok(), "should complete immediately when disabled");
    }

    #[tokio::test]
    async fn test_stops_on_shutdown_signal() {
        let (tx, rx) = watch::channel(false);
        let refresher = MetadataRefresher::new(engine(), 3600, rx);
        let handle = tokio::spawn(refresher.run());

        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "refresher should stop after shutdown");
    }
}
