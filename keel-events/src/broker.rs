//! Broker seam.

use async_trait::async_trait;
use thiserror::Error;

/// Content type stamped on every published message.
pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Exchange '{exchange}' has not been declared")]
    UnknownExchange { exchange: String },

    #[error("Broker timed out during {operation}")]
    Timeout { operation: String },

    #[error("Broker connection is closed")]
    Closed,
}

/// A message ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Connection to a topic-routed message bus.
///
/// One long-lived handle is shared by every request; implementations must
/// be safe for concurrent use.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Declare a durable topic exchange. Idempotent.
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BrokerError>;

    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError>;

    /// Release the connection. Further publishes fail with `Closed`.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// AMQP topic matching: words are dot-separated, `*` matches exactly one
/// word and `#` matches zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn go(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.split_first(), key.split_first()) {
            (None, None) => true,
            (Some((&"#", rest)), _) => {
                go(rest, key) || key.split_first().is_some_and(|(_, tail)| go(pattern, tail))
            }
            (Some((&"*", rest)), Some((_, tail))) => go(rest, tail),
            (Some((word, rest)), Some((head, tail))) => word == head && go(rest, tail),
            _ => false,
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    go(&pattern, &key)
}
