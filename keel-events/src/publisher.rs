//! Queue-backed event publisher.
//!
//! `publish` never touches the network: it serializes the payload and
//! `try_send`s it onto a bounded channel. A single worker task owns the
//! broker side and delivers in enqueue order. When the queue is full the
//! event is dropped and counted rather than applying backpressure to the
//! request path.

use crate::broker::{BrokerError, MessageBroker, OutboundMessage, JSON_CONTENT_TYPE};
use crate::event::{DomainEvent, EventCategory};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("Event publisher is disabled")]
    Disabled,

    #[error("Event publisher is closed")]
    Closed,

    #[error("Event queue is full, event dropped")]
    QueueFull,

    #[error("Failed to serialize event: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Exchange declared at startup and used for every message.
    pub exchange: String,
    /// Maximum number of events waiting for the worker.
    pub queue_capacity: usize,
    /// Upper bound for one broker publish.
    pub publish_timeout: Duration,
    /// Upper bound for exchange declaration at startup.
    pub declare_timeout: Duration,
    /// How long `close` waits for the worker to drain.
    pub shutdown_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: "api_exchange".into(),
            queue_capacity: 1024,
            publish_timeout: Duration::from_secs(2),
            declare_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl PublisherConfig {
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Accepted by the broker.
    pub published: u64,
    /// Rejected by the broker or timed out.
    pub failed: u64,
    /// Never reached the worker (queue full).
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

struct Queued {
    routing_key: String,
    body: Vec<u8>,
}

struct Shared {
    exchange: String,
    enabled: bool,
    sender: Mutex<Option<mpsc::Sender<Queued>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    broker: Option<Arc<dyn MessageBroker>>,
    counters: Arc<Counters>,
    shutdown_timeout: Duration,
}

/// Cloneable handle to the publishing pipeline.
#[derive(Clone)]
pub struct EventPublisher {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("exchange", &self.shared.exchange)
            .field("enabled", &self.shared.enabled)
            .finish_non_exhaustive()
    }
}

impl EventPublisher {
    /// Declare the exchange and spawn the delivery worker.
    ///
    /// If the exchange cannot be declared the returned publisher is disabled:
    /// every publish fails fast with [`PublishError::Disabled`] and the rest of
    /// the service runs without events.
    pub async fn start(broker: Arc<dyn MessageBroker>, config: PublisherConfig) -> Self {
        let declared = tokio::time::timeout(
            config.declare_timeout,
            broker.declare_exchange(&config.exchange),
        )
        .await
        .unwrap_or_else(|_| {
            Err(BrokerError::Timeout {
                operation: "declare_exchange".into(),
            })
        });

        if let Err(err) = declared {
            error!(
                exchange = %config.exchange,
                error = %err,
                "Failed to declare exchange, continuing without events"
            );
            return Self::disabled(config.exchange);
        }

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(run_worker(
            Arc::clone(&broker),
            rx,
            config.exchange.clone(),
            config.publish_timeout,
            Arc::clone(&counters),
        ));

        info!(exchange = %config.exchange, "Event publisher started with topic exchange");
        Self {
            shared: Arc::new(Shared {
                exchange: config.exchange,
                enabled: true,
                sender: Mutex::new(Some(tx)),
                worker: Mutex::new(Some(worker)),
                broker: Some(broker),
                counters,
                shutdown_timeout: config.shutdown_timeout,
            }),
        }
    }

    /// A publisher that accepts nothing.
    pub fn disabled(exchange: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                exchange: exchange.into(),
                enabled: false,
                sender: Mutex::new(None),
                worker: Mutex::new(None),
                broker: None,
                counters: Arc::new(Counters::default()),
                shutdown_timeout: Duration::ZERO,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled
    }

    pub fn exchange(&self) -> &str {
        &self.shared.exchange
    }

    pub fn stats(&self) -> PublisherStats {
        let counters = &self.shared.counters;
        PublisherStats {
            published: counters.published.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Serialize `payload` as JSON and enqueue it under `routing_key`.
    ///
    /// Returning `Ok` means the event was queued, not delivered.
    pub fn publish<T: Serialize + ?Sized>(
        &self,
        routing_key: &str,
        payload: &T,
    ) -> Result<(), PublishError> {
        if !self.shared.enabled {
            return Err(PublishError::Disabled);
        }
        let body = serde_json::to_vec(payload)
            .map_err(|err| PublishError::Serialization(err.to_string()))?;

        let guard = self
            .shared
            .sender
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        let sender = guard.as_ref().ok_or(PublishError::Closed)?;
        let queued = Queued {
            routing_key: routing_key.to_string(),
            body,
        };
        match sender.try_send(queued) {
            Ok(()) => {
                debug!(routing_key = routing_key, "Event queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(routing_key = routing_key, "Event queue full, dropping event");
                Err(PublishError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PublishError::Closed),
        }
    }

    /// Publish `user.{event_type}` with the user's id as subject.
    pub fn publish_user_event<T: Serialize + ?Sized>(
        &self,
        event_type: &str,
        user_id: i64,
        data: &T,
    ) -> Result<(), PublishError> {
        self.publish_event(EventCategory::User, event_type, Some(user_id), data)
    }

    /// Publish `system.{event_type}` without a subject.
    pub fn publish_system_event<T: Serialize + ?Sized>(
        &self,
        event_type: &str,
        data: &T,
    ) -> Result<(), PublishError> {
        self.publish_event(EventCategory::System, event_type, None, data)
    }

    fn publish_event<T: Serialize + ?Sized>(
        &self,
        category: EventCategory,
        event_type: &str,
        subject_id: Option<i64>,
        data: &T,
    ) -> Result<(), PublishError> {
        let data = serde_json::to_value(data)
            .map_err(|err| PublishError::Serialization(err.to_string()))?;
        let event = DomainEvent::new(event_type, subject_id, data);
        self.publish(&category.routing_key(event_type), &event)
    }

    /// Stop accepting events, let the worker drain what is queued (bounded by
    /// the shutdown timeout), then close the broker. Safe to call repeatedly.
    ///
    /// Queued events are handed to the broker but broker acknowledgement is
    /// not awaited.
    pub async fn close(&self) {
        let sender = self
            .shared
            .sender
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take();
        drop(sender);

        let worker = self
            .shared
            .worker
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take();
        if let Some(mut worker) = worker {
            if tokio::time::timeout(self.shared.shutdown_timeout, &mut worker)
                .await
                .is_err()
            {
                warn!(exchange = %self.shared.exchange, "Event worker did not drain in time, aborting");
                worker.abort();
            }
        }

        if let Some(broker) = &self.shared.broker {
            if let Err(err) = broker.close().await {
                warn!(error = %err, "Error closing broker connection");
            }
        }
    }
}

async fn run_worker(
    broker: Arc<dyn MessageBroker>,
    mut rx: mpsc::Receiver<Queued>,
    exchange: String,
    publish_timeout: Duration,
    counters: Arc<Counters>,
) {
    while let Some(queued) = rx.recv().await {
        let routing_key = queued.routing_key.clone();
        let message = OutboundMessage {
            exchange: exchange.clone(),
            routing_key: queued.routing_key,
            content_type: JSON_CONTENT_TYPE.to_string(),
            body: queued.body,
        };
        match tokio::time::timeout(publish_timeout, broker.publish(message)).await {
            Ok(Ok(())) => {
                counters.published.fetch_add(1, Ordering::Relaxed);
                info!(
                    exchange = %exchange,
                    routing_key = %routing_key,
                    "Published message to exchange"
                );
            }
            Ok(Err(err)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(routing_key = %routing_key, error = %err, "Failed to publish event");
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(routing_key = %routing_key, "Timed out publishing event");
            }
        }
    }
    debug!(exchange = %exchange, "Event worker drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use async_trait::async_trait;
    use serde_json::json;

    struct RefusingBroker;

    #[async_trait]
    impl MessageBroker for RefusingBroker {
        async fn declare_exchange(&self, _exchange: &str) -> Result<(), BrokerError> {
            Err(BrokerError::Unavailable {
                reason: "connection refused".into(),
            })
        }
        async fn publish(&self, _message: OutboundMessage) -> Result<(), BrokerError> {
            Err(BrokerError::Closed)
        }
        async fn close(&self) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    /// Declares fine, then blocks on every publish until released.
    struct StalledBroker {
        release: tokio::sync::Semaphore,
    }

    #[async_trait]
    impl MessageBroker for StalledBroker {
        async fn declare_exchange(&self, _exchange: &str) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn publish(&self, _message: OutboundMessage) -> Result<(), BrokerError> {
            let _permit = self.release.acquire().await.map_err(|_| BrokerError::Closed)?;
            Ok(())
        }
        async fn close(&self) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn user_events_reach_subscribers() {
        let broker = InMemoryBroker::new(16);
        let mut sub = broker.subscribe("api_exchange", "user.*");
        let publisher =
            EventPublisher::start(Arc::new(broker.clone()), PublisherConfig::default()).await;
        assert!(publisher.is_enabled());

        publisher
            .publish_user_event("created", 42, &json!({"username": "ada"}))
            .unwrap();

        let message = sub.recv().await.unwrap();
        assert_eq!(message.routing_key, "user.created");
        assert_eq!(message.content_type, "application/json");
        let event: DomainEvent = serde_json::from_slice(&message.body).unwrap();
        assert_eq!(event.event_type, "created");
        assert_eq!(event.subject_id, Some(42));
        assert_eq!(event.data["username"], "ada");

        publisher.close().await;
        assert_eq!(publisher.stats().published, 1);
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn failed_declare_disables_publisher() {
        let publisher =
            EventPublisher::start(Arc::new(RefusingBroker), PublisherConfig::default()).await;
        assert!(!publisher.is_enabled());
        assert_eq!(
            publisher.publish_system_event("health_check", &json!({})),
            Err(PublishError::Disabled)
        );
        publisher.close().await;
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let broker = Arc::new(StalledBroker {
            release: tokio::sync::Semaphore::new(0),
        });
        let config = PublisherConfig::default()
            .with_queue_capacity(1)
            .with_shutdown_timeout(Duration::from_millis(50));
        let publisher = EventPublisher::start(broker.clone(), config).await;

        // The worker takes the first event and blocks on it; the second fills
        // the queue; the third has nowhere to go.
        publisher.publish("user.created", &json!(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher.publish("user.created", &json!(2)).unwrap();
        assert_eq!(
            publisher.publish("user.created", &json!(3)),
            Err(PublishError::QueueFull)
        );
        assert_eq!(publisher.stats().dropped, 1);

        publisher.close().await;
        assert_eq!(
            publisher.publish("user.created", &json!(4)),
            Err(PublishError::Closed)
        );
    }

    #[tokio::test]
    async fn close_drains_queued_events() {
        let broker = InMemoryBroker::new(64);
        let mut sub = broker.subscribe("api_exchange", "#");
        let publisher =
            EventPublisher::start(Arc::new(broker.clone()), PublisherConfig::default()).await;
        for i in 0..10 {
            publisher.publish_user_event("updated", i, &json!({})).unwrap();
        }
        publisher.close().await;

        let mut seen = 0;
        while sub.try_recv().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 10);
        assert_eq!(publisher.stats().published, 10);
    }

    #[tokio::test]
    async fn broker_failures_are_counted_not_raised() {
        let broker = InMemoryBroker::new(16);
        let publisher =
            EventPublisher::start(Arc::new(broker.clone()), PublisherConfig::default()).await;
        broker.close().await.unwrap();

        publisher.publish("user.deleted", &json!({})).unwrap();
        publisher.close().await;
        assert_eq!(publisher.stats().failed, 1);
    }
}
