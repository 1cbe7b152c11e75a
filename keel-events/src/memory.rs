//! In-process broker.
//!
//! Messages fan out over a `tokio::sync::broadcast` channel; each
//! subscription filters by its own topic pattern. Nothing is persisted, and
//! a message published while nobody is subscribed is dropped, which is what
//! a topic exchange with no bound queues does too.

use crate::broker::{topic_matches, BrokerError, MessageBroker, OutboundMessage};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Clone)]
pub struct InMemoryBroker {
    tx: broadcast::Sender<OutboundMessage>,
    exchanges: Arc<Mutex<HashSet<String>>>,
    closed: Arc<AtomicBool>,
}

impl InMemoryBroker {
    /// `capacity` bounds how far a slow subscriber may lag before it starts
    /// missing messages.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            exchanges: Arc::new(Mutex::new(HashSet::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bind a subscription to `exchange` for routing keys matching `pattern`.
    pub fn subscribe(&self, exchange: &str, pattern: &str) -> TopicSubscription {
        TopicSubscription {
            rx: self.tx.subscribe(),
            exchange: exchange.to_string(),
            pattern: pattern.to_string(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        self.exchanges
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .insert(exchange.to_string());
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let declared = self
            .exchanges
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .contains(&message.exchange);
        if !declared {
            return Err(BrokerError::UnknownExchange {
                exchange: message.exchange,
            });
        }
        let routing_key = message.routing_key.clone();
        match self.tx.send(message) {
            Ok(receivers) => debug!(routing_key = %routing_key, receivers, "Broadcast event"),
            Err(_) => debug!(routing_key = %routing_key, "No receivers for event"),
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Receiving end of [`InMemoryBroker::subscribe`].
pub struct TopicSubscription {
    rx: broadcast::Receiver<OutboundMessage>,
    exchange: String,
    pattern: String,
}

impl TopicSubscription {
    /// Next matching message. `None` once the broker is gone.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => {
                    if message.exchange == self.exchange
                        && topic_matches(&self.pattern, &message.routing_key)
                    {
                        return Some(message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, pattern = %self.pattern, "Subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant for tests and polling consumers.
    pub fn try_recv(&mut self) -> Option<OutboundMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => {
                    if message.exchange == self.exchange
                        && topic_matches(&self.pattern, &message.routing_key)
                    {
                        return Some(message);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
