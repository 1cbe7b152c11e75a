//! Durable exchange on Redis Streams.
//!
//! Each exchange maps to one stream key. A message becomes a stream entry
//! with `routing_key`, `content_type` and `body` fields; consumers bind with
//! consumer groups and apply topic patterns on `routing_key` themselves.
//! Streams are capped with an approximate `MAXLEN` so an idle consumer cannot
//! grow memory without bound.

use crate::broker::{BrokerError, MessageBroker, OutboundMessage};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RedisStreamConfig {
    /// Prefix for stream keys, e.g. `keel:exchange:`.
    pub stream_prefix: String,
    /// Approximate cap on entries per stream.
    pub max_len: u64,
    /// Upper bound for a single Redis round trip.
    pub operation_timeout: Duration,
}

impl Default for RedisStreamConfig {
    fn default() -> Self {
        Self {
            stream_prefix: "keel:exchange:".into(),
            max_len: 100_000,
            operation_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Clone)]
pub struct RedisStreamBroker {
    connection: ConnectionManager,
    config: RedisStreamConfig,
    closed: Arc<AtomicBool>,
}

fn unavailable(err: RedisError) -> BrokerError {
    BrokerError::Unavailable {
        reason: err.to_string(),
    }
}

impl RedisStreamBroker {
    /// Connect to Redis at `url`.
    pub async fn connect(url: &str, config: RedisStreamConfig) -> Result<Self, BrokerError> {
        let client = Client::open(url).map_err(unavailable)?;
        let connection = tokio::time::timeout(config.operation_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| BrokerError::Timeout {
                operation: "connect".into(),
            })?
            .map_err(unavailable)?;
        Ok(Self {
            connection,
            config,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn stream_key(&self, exchange: &str) -> String {
        format!("{}{}", self.config.stream_prefix, exchange)
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessageBroker for RedisStreamBroker {
    /// Streams come into existence on first append; declaring only proves the
    /// server is reachable.
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut conn = self.connection.clone();
        let ping = async move {
            let pong: Result<String, RedisError> = redis::cmd("PING").query_async(&mut conn).await;
            pong
        };
        tokio::time::timeout(self.config.operation_timeout, ping)
            .await
            .map_err(|_| BrokerError::Timeout {
                operation: "declare_exchange".into(),
            })?
            .map_err(unavailable)?;
        debug!(stream = %self.stream_key(exchange), "Exchange declared");
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(self.stream_key(&message.exchange))
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_len)
            .arg("*")
            .arg("routing_key")
            .arg(&message.routing_key)
            .arg("content_type")
            .arg(&message.content_type)
            .arg("body")
            .arg(message.body);
        let mut conn = self.connection.clone();
        let append = async move {
            let entry_id: Result<String, RedisError> = cmd.query_async(&mut conn).await;
            entry_id
        };
        let entry_id = tokio::time::timeout(self.config.operation_timeout, append)
            .await
            .map_err(|_| BrokerError::Timeout {
                operation: "publish".into(),
            })?
            .map_err(unavailable)?;
        debug!(routing_key = %message.routing_key, entry_id = %entry_id, "Appended to stream");
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
