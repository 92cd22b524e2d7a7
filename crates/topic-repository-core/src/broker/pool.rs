//! Connections to every broker the cluster advertises.
//!
//! The pool starts from one reachable bootstrap server, learns the broker
//! list from each Metadata response and routes typed requests either to a
//! given broker (partition leaders) or to whichever broker is reachable
//! (metadata).

use std::sync::Arc;

use dashmap::DashMap;
use kafka_protocol::messages::ApiKey;
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::KafkaConfig;
use crate::error::{EngineError, EngineResult};

use super::connection::BrokerConnection;
use super::protocol::{decode_response, encode_request};

/// Id used for the bootstrap server before its node id is known.
const BOOTSTRAP_ID: i32 = -1;

/// Broker connections keyed by node id, plus the bootstrap server.
pub struct BrokerPool {
    config: KafkaConfig,
    brokers: DashMap<i32, Arc<BrokerConnection>>,
    bootstrap: RwLock<Option<Arc<BrokerConnection>>>,
}

impl BrokerPool {
    #[must_use]
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            brokers: DashMap::new(),
            bootstrap: RwLock::new(None),
        }
    }

    /// Dial the bootstrap servers in order and keep the first that answers.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoBrokersAvailable`] if none is reachable.
    pub async fn connect(&self) -> EngineResult<()> {
        for server in self.config.bootstrap_servers() {
            let conn = self.connection_to(BOOTSTRAP_ID, server.clone());
            match conn.connect().await {
                Ok(()) => {
                    info!(server = %server, "connected to bootstrap server");
                    *self.bootstrap.write().await = Some(Arc::new(conn));
                    return Ok(());
                }
                Err(e) => warn!(server = %server, error = %e, "bootstrap server unreachable"),
            }
        }
        Err(EngineError::NoBrokersAvailable)
    }

    fn connection_to(&self, broker_id: i32, address: String) -> BrokerConnection {
        BrokerConnection::with_timeouts(
            broker_id,
            address,
            self.config.connection_timeout(),
            self.config.request_timeout(),
        )
    }

    /// Connection to broker `broker_id`, as advertised by the last metadata.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BrokerUnavailable`] for a broker the cluster
    /// has not advertised.
    pub fn broker(&self, broker_id: i32) -> EngineResult<Arc<BrokerConnection>> {
        self.brokers
            .get(&broker_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::BrokerUnavailable {
                broker_id,
                message: "broker not in pool".to_string(),
            })
    }

    /// A connection for cluster-wide requests.
    ///
    /// The bootstrap server is used while it is reachable; otherwise the
    /// first reachable advertised broker, and failing that the bootstrap
    /// server again so the request redials it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoBrokersAvailable`] before [`Self::connect`]
    /// succeeded and when no broker is known.
    pub async fn any_broker(&self) -> EngineResult<Arc<BrokerConnection>> {
        let bootstrap = self.bootstrap.read().await.clone();
        if let Some(conn) = bootstrap.as_ref().filter(|c| c.is_connected()) {
            return Ok(Arc::clone(conn));
        }

        let reachable = self
            .brokers
            .iter()
            .find(|entry| entry.value().is_connected())
            .map(|entry| Arc::clone(entry.value()));

        reachable
            .or(bootstrap)
            .or_else(|| self.brokers.iter().next().map(|e| Arc::clone(e.value())))
            .ok_or(EngineError::NoBrokersAvailable)
    }

    /// Encode `request`, exchange it and decode the typed response.
    ///
    /// `broker_id` selects the target broker; `None` uses [`Self::any_broker`].
    ///
    /// # Errors
    ///
    /// Returns an error if routing, encoding, the exchange or decoding fails.
    pub async fn request<Req, Resp>(
        &self,
        broker_id: Option<i32>,
        api_key: ApiKey,
        api_version: i16,
        request: &Req,
    ) -> EngineResult<Resp>
    where
        Req: Encodable + HeaderVersion,
        Resp: Decodable,
    {
        let conn = match broker_id {
            Some(id) => self.broker(id)?,
            None => self.any_broker().await?,
        };
        let frame = encode_request(
            api_key,
            api_version,
            conn.next_correlation_id(),
            &self.config.client_id,
            request,
        )?;
        let response = conn.round_trip(&frame).await?;
        decode_response(&response, api_version)
    }

    /// Replace the broker set with the one a Metadata response advertised.
    ///
    /// Connections to brokers whose address is unchanged are kept; new or
    /// moved brokers are dialled on their first request.
    pub fn update_brokers(&self, brokers: Vec<BrokerInfo>) {
        let advertised: Vec<i32> = brokers.iter().map(|b| b.node_id).collect();
        self.brokers.retain(|id, _| advertised.contains(id));

        for broker in brokers {
            let address = broker.address();
            let unchanged = self
                .brokers
                .get(&broker.node_id)
                .is_some_and(|conn| conn.address() == address);
            if unchanged {
                continue;
            }
            debug!(broker_id = broker.node_id, address = %address, "registering broker");
            self.brokers.insert(
                broker.node_id,
                Arc::new(self.connection_to(broker.node_id, address)),
            );
        }
    }

    /// Number of advertised brokers.
    #[must_use]
    pub fn broker_count(&self) -> usize {
        self.brokers.len()
    }

    /// Whether a bootstrap server or any broker is known.
    pub async fn is_connected(&self) -> bool {
        self.bootstrap.read().await.is_some() || !self.brokers.is_empty()
    }

    /// Close every connection and forget all brokers.
    pub async fn disconnect_all(&self) {
        if let Some(conn) = self.bootstrap.write().await.take() {
            conn.disconnect().await;
        }
        let known: Vec<Arc<BrokerConnection>> = self
            .brokers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.brokers.clear();
        for conn in known {
            conn.disconnect().await;
        }
    }
}

/// A broker entry from a Metadata response.
#[derive(Debug, Clone)]
pub struct BrokerInfo {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
}

impl BrokerInfo {
    #[must_use]
    pub fn new(node_id: i32, host: String, port: i32) -> Self {
        Self { node_id, host, port }
    }

    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(bootstrap: &str) -> KafkaConfig {
        KafkaConfig {
            bootstrap_servers: vec![bootstrap.to_string()],
            client_id: "test".to_string(),
            connection_timeout_ms: 100,
            request_timeout_ms: 1000,
            metadata_refresh_interval_secs: 0,
            acks: -1,
            max_in_flight_sends: 16,
        }
    }

    #[tokio::test]
    async fn test_pool_creation() {
        let pool = BrokerPool::new(test_config("localhost:9092"));
        assert_eq!(pool.broker_count(), 0);
        assert!(!pool.is_connected().await);
    }

    #[test]
    fn test_unknown_broker() {
        let pool = BrokerPool::new(test_config("localhost:9092"));
        let result = pool.broker(1);
        assert!(matches!(result, Err(EngineError::BrokerUnavailable { broker_id: 1, .. })));
    }

    #[tokio::test]
    async fn test_any_broker_before_connect() {
        let pool = BrokerPool::new(test_config("localhost:9092"));
        let result = pool.any_broker().await;
        assert!(matches!(result, Err(EngineError::NoBrokersAvailable)));
    }

    #[tokio::test]
    async fn test_connect_to_invalid_bootstrap() {
        let pool = BrokerPool::new(test_config("127.0.0.1:59999"));
        let result = pool.connect().await;
        assert!(matches!(result, Err(EngineError::NoBrokersAvailable)));
    }

    #[tokio::test]
    async fn test_update_brokers_tracks_advertised_set() {
        let pool = BrokerPool::new(test_config("localhost:9092"));
        pool.update_brokers(vec![
            BrokerInfo::new(1, "broker1".to_string(), 9092),
            BrokerInfo::new(2, "broker2".to_string(), 9092),
        ]);
        assert_eq!(pool.broker_count(), 2);
        let first = pool.broker(1).unwrap();

        pool.update_brokers(vec![
            BrokerInfo::new(1, "broker1".to_string(), 9092),
            BrokerInfo::new(3, "broker3".to_string(), 9093),
        ]);
        assert_eq!(pool.broker_count(), 2);
        assert!(Arc::ptr_eq(&first, &pool.broker(1).unwrap()));
        assert!(pool.broker(2).is_err());
        assert_eq!(pool.broker(3).unwrap().address(), "broker3:9093");
        assert!(pool.is_connected().await);

        pool.disconnect_all().await;
        assert_eq!(pool.broker_count(), 0);
        assert!(!pool.is_connected().await);
    }

    #[test]
    fn test_broker_info_address() {
        let info = BrokerInfo::new(1, "broker1.example.com".to_string(), 9092);
        assert_eq!(info.node_id, 1);
        assert_eq!(info.address(), "broker1.example.com:9092");
    }
}
