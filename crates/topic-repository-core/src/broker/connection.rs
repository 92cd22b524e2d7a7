//! Connection to a single Kafka broker.
//!
//! A [`BrokerConnection`] owns a small set of idle TCP streams to one broker.
//! Each request checks a stream out, performs one framed write/read exchange
//! on it and hands it back only once a complete response with the expected
//! correlation id has been read. A stream whose exchange failed, timed out or
//! was cancelled is dropped, and the next request dials a fresh one.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::{EngineError, EngineResult};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle streams kept per broker; extra streams are closed on return.
const MAX_IDLE_STREAMS: usize = 4;

/// Streams to one Kafka broker.
///
/// Concurrent requests never share a stream: a request that finds no idle
/// stream dials its own, so one slow response only delays its own caller.
pub struct BrokerConnection {
    broker_id: i32,
    address: String,
    idle: Mutex<Vec<TcpStream>>,
    reachable: AtomicBool,
    correlation_id: AtomicI32,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl BrokerConnection {
    #[must_use]
    pub fn new(broker_id: i32, address: String) -> Self {
        Self::with_timeouts(
            broker_id,
            address,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    /// `request_timeout` bounds one whole exchange, write and read together.
    #[must_use]
    pub fn with_timeouts(
        broker_id: i32,
        address: String,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            broker_id,
            address,
            idle: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(false),
            correlation_id: AtomicI32::new(0),
            connect_timeout,
            request_timeout,
        }
    }

    #[must_use]
    pub fn broker_id(&self) -> i32 {
        self.broker_id
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the last dial or exchange with this broker succeeded.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.reachable.load(Ordering::Relaxed)
    }

    /// Open a stream now and keep it idle for the next request.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BrokerUnavailable`] if the broker cannot be
    /// reached within the connect timeout.
    #[instrument(skip(self), fields(broker_id = self.broker_id, address = %self.address))]
    pub async fn connect(&self) -> EngineResult<()> {
        let stream = self.dial().await?;
        self.idle.lock().await.push(stream);
        debug!("connected to broker");
        Ok(())
    }

    /// Close every idle stream. Streams in use close when their exchange ends.
    pub async fn disconnect(&self) {
        self.idle.lock().await.clear();
        self.reachable.store(false, Ordering::Relaxed);
    }

    /// Next correlation id for a request on this broker.
    #[must_use]
    pub fn next_correlation_id(&self) -> i32 {
        self.correlation_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send one encoded request (header and body, no length prefix) and
    /// return the response body, starting at its correlation id.
    ///
    /// # Errors
    ///
    /// Fails if the request has no header, the broker cannot be reached,
    /// the exchange exceeds the request timeout, or the response is
    /// truncated or answers a different correlation id. In every failing
    /// case the stream is discarded.
    #[instrument(skip(self, request), fields(broker_id = self.broker_id))]
    pub async fn round_trip(&self, request: &[u8]) -> EngineResult<Bytes> {
        let correlation_id = request_correlation_id(request)?;
        let mut stream = self.checkout().await?;

        debug!(correlation_id, request_len = request.len(), "sending request");
        let response = match timeout(self.request_timeout, exchange(&mut stream, request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(correlation_id, error = %e, "broker exchange failed");
                self.reachable.store(false, Ordering::Relaxed);
                return Err(EngineError::Connection(e));
            }
            Err(_) => {
                warn!(correlation_id, "broker request timed out");
                return Err(EngineError::BrokerUnavailable {
                    broker_id: self.broker_id,
                    message: "request timeout".to_string(),
                });
            }
        };

        let Some(header) = response.get(..4) else {
            return Err(EngineError::ProtocolDecode {
                message: "response too short".to_string(),
            });
        };
        let actual = i32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        if actual != correlation_id {
            warn!(expected = correlation_id, actual, "dropping out-of-sync stream");
            return Err(EngineError::CorrelationIdMismatch {
                expected: correlation_id,
                actual,
            });
        }

        debug!(correlation_id, response_len = response.len(), "received response");
        self.checkin(stream).await;
        Ok(Bytes::from(response))
    }

    async fn checkout(&self) -> EngineResult<TcpStream> {
        if let Some(stream) = self.idle.lock().await.pop() {
            return Ok(stream);
        }
        self.dial().await
    }

    async fn checkin(&self, stream: TcpStream) {
        let mut idle = self.idle.lock().await;
        if idle.len() < MAX_IDLE_STREAMS {
            idle.push(stream);
        }
    }

    async fn dial(&self) -> EngineResult<TcpStream> {
        let result = match timeout(self.connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => stream.set_nodelay(true).map(|()| stream).map_err(|e| e.to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("connection timeout".to_string()),
        };

        match result {
            Ok(stream) => {
                self.reachable.store(true, Ordering::Relaxed);
                Ok(stream)
            }
            Err(message) => {
                warn!(broker_id = self.broker_id, address = %self.address, error = %message, "failed to connect to broker");
                self.reachable.store(false, Ordering::Relaxed);
                Err(EngineError::BrokerUnavailable {
                    broker_id: self.broker_id,
                    message,
                })
            }
        }
    }
}

/// Correlation id at bytes 4..8 of a request header.
fn request_correlation_id(request: &[u8]) -> EngineResult<i32> {
    match request.get(4..8) {
        Some(id) => Ok(i32::from_be_bytes([id[0], id[1], id[2], id[3]])),
        None => Err(EngineError::ProtocolEncode {
            message: "request too short".to_string(),
        }),
    }
}

async fn exchange(stream: &mut TcpStream, request: &[u8]) -> std::io::Result<Vec<u8>> {
    let len = u32::try_from(request.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "request too large"))?;
    let mut frame = BytesMut::with_capacity(4 + request.len());
    frame.put_u32(len);
    frame.extend_from_slice(request);
    stream.write_all(&frame).await?;
    stream.flush().await?;

    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let mut response = vec![0u8; u32::from_be_bytes(len_buf) as usize];
    stream.read_exact(&mut response).await?;
    Ok(response)
}
