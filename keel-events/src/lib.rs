//! Keel Events - Best-Effort Domain Event Publishing
//!
//! Mutations emit one [`DomainEvent`] each onto a durable, topic-routed
//! exchange. Routing keys are `{category}.{eventType}` (`user.created`,
//! `system.health_check`, ...), message bodies are JSON with content type
//! `application/json`.
//!
//! # Delivery model
//!
//! [`EventPublisher`] hands messages to a bounded queue drained by a single
//! worker task, so request latency never depends on the broker. Delivery is
//! best effort: a full queue drops the event, a broker failure is logged, and
//! neither ever rolls back the mutation that produced the event.
//!
//! # Brokers
//!
//! - [`InMemoryBroker`]: in-process fan-out with AMQP-style topic patterns.
//! - [`RedisStreamBroker`]: one Redis stream per exchange.

mod broker;
mod event;
mod memory;
mod publisher;
mod redis_stream;

pub use broker::{topic_matches, BrokerError, MessageBroker, OutboundMessage, JSON_CONTENT_TYPE};
pub use event::{DomainEvent, EventCategory};
pub use memory::{InMemoryBroker, TopicSubscription};
pub use publisher::{EventPublisher, PublishError, PublisherConfig, PublisherStats};
pub use redis_stream::{RedisStreamBroker, RedisStreamConfig};
