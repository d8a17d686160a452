//! Topic-addressed broadcast bus shared by every client in a session.
//!
//! Delivery is best effort: every subscriber on a topic sees each message,
//! including the publishing instance itself, but nothing is acknowledged or
//! retried. Slow subscribers observe `RecvError::Lagged` and must recover on
//! their own.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

const DEFAULT_TOPIC_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    /// Identity of the participant that published the message.
    pub sender: String,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus: Send + Sync {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage>;
    fn publish(&self, topic: &str, sender: &str, payload: Bytes) -> BusResult<()>;
}

impl<B: Bus + ?Sized> Bus for std::sync::Arc<B> {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        (**self).subscribe(topic)
    }

    fn publish(&self, topic: &str, sender: &str, payload: Bytes) -> BusResult<()> {
        (**self).publish(topic, sender, payload)
    }
}

/// In-process bus for tests, simulations and single-host sessions.
#[derive(Debug)]
pub struct LocalBus {
    capacity: usize,
    topics: parking_lot::RwLock<std::collections::HashMap<String, broadcast::Sender<BusMessage>>>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-topic buffer depth; subscribers further behind than this lag.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: parking_lot::RwLock::new(std::collections::HashMap::new()),
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        let mut guard = self.topics.write();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        self.sender_for(topic).subscribe()
    }

    fn publish(&self, topic: &str, sender: &str, payload: Bytes) -> BusResult<()> {
        let channel = self.sender_for(topic);
        // No subscribers is not an error for a broadcast medium.
        let _ = channel.send(BusMessage {
            topic: topic.to_string(),
            sender: sender.to_string(),
            payload,
        });
        Ok(())
    }
}
