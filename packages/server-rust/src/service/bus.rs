//! In-process event bus with per-topic broadcast channels.
//!
//! Delivery is at-most-once: a subscriber that falls behind by more than the
//! channel capacity sees [`BusSignal::Lagged`] and must re-read whatever state
//! it was tracking. Events are signals, not payloads.

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use conduit_core::messages::BusEvent;

use super::telemetry::Telemetry;

/// Something observed on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum BusSignal {
    Event(BusEvent),
    /// Events were dropped; the receiver should re-fetch state.
    Lagged(u64),
}

/// Topic -> broadcast sender map.
pub struct EventBus {
    topics: DashMap<String, broadcast::Sender<BusEvent>>,
    capacity: usize,
    telemetry: Telemetry,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize, telemetry: Telemetry) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
            telemetry,
        }
    }

    /// Publishes `event` on `topic`, returning how many subscribers received it.
    ///
    /// Topics nobody has subscribed to are not created.
    pub fn publish(&self, topic: &str, event: BusEvent) -> usize {
        let Some(sender) = self.topics.get(topic).map(|s| s.clone()) else {
            return 0;
        };
        let reached = sender.send(event).unwrap_or(0);
        trace!(parent: self.telemetry.span(), topic, reached, "bus publish");
        reached
    }

    /// Subscribes to `topic`, creating it on first use.
    pub fn subscribe(&self, topic: &str) -> BusSubscription {
        let receiver = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        BusSubscription {
            topic: topic.to_string(),
            receiver,
        }
    }

    /// Number of live subscriptions on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Drops topics without subscribers. Returns the number removed.
    pub fn prune(&self) -> usize {
        let before = self.topics.len();
        self.topics.retain(|_, sender| sender.receiver_count() > 0);
        before - self.topics.len()
    }
}

/// Live subscription to one topic. Dropping it unsubscribes.
pub struct BusSubscription {
    topic: String,
    receiver: broadcast::Receiver<BusEvent>,
}

impl BusSubscription {
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next signal. `None` once the topic is gone.
    pub async fn recv(&mut self) -> Option<BusSignal> {
        match self.receiver.recv().await {
            Ok(event) => Some(BusSignal::Event(event)),
            Err(broadcast::error::RecvError::Lagged(missed)) => Some(BusSignal::Lagged(missed)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
